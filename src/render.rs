//! CIR Rendering
//!
//! Sinks that consume a batch of CIR profiles once per completed cycle:
//! - `SvgRenderer` draws every profile of the batch as one line (delay on x,
//!   normalized magnitude on y) and replaces the artifact file atomically
//! - `LogSink` logs the strongest components of each profile

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use plotters::prelude::*;
use snafu::{ResultExt, Snafu};
use tracing::{debug, info};

use crate::runner::{CirBatch, CirSink};

/// Default artifact path, served by the status page
pub const DEFAULT_OUTPUT: &str = "static/rtlsdr.svg";

/// Number of components reported per profile by `LogSink`
pub const NUM_PEAKS: usize = 6;

#[derive(Debug, Snafu)]
pub enum RenderError {
    /// Batch holds no profiles
    #[snafu(display("nothing to render: batch {cycle} has no profiles"))]
    EmptyBatch { cycle: u64 },

    /// Plotting backend failed
    #[snafu(display("failed to draw CIR plot: {message}"))]
    Draw { message: String },

    /// Output directory could not be created
    #[snafu(display("failed to create {}: {source}", path.display()))]
    CreateDir { path: PathBuf, source: io::Error },

    /// Artifact could not be written
    #[snafu(display("failed to write {}: {source}", path.display()))]
    Write { path: PathBuf, source: io::Error },
}

fn draw_error<E: std::fmt::Display>(e: E) -> RenderError {
    RenderError::Draw {
        message: e.to_string(),
    }
}

/// Render a batch of profiles to an SVG document
pub fn render_svg(batch: &CirBatch, size: (u32, u32)) -> Result<String, RenderError> {
    if batch.profiles.is_empty() {
        return Err(RenderError::EmptyBatch { cycle: batch.cycle });
    }

    let num_delays = batch.profiles.iter().map(|p| p.len()).max().unwrap_or(0).max(1);
    let y_max = batch
        .profiles
        .iter()
        .flat_map(|p| p.magnitudes().iter().copied())
        .fold(0.0f32, f32::max);
    let y_max = if y_max > 0.0 { y_max * 1.1 } else { 1.0 };

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, size).into_drawing_area();
        root.fill(&WHITE).map_err(draw_error)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(
                format!("Channel impulse response, {} frames", batch.profiles.len()),
                ("sans-serif", 20),
            )
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(70)
            .build_cartesian_2d(0f32..num_delays as f32, 0f32..y_max)
            .map_err(draw_error)?;

        chart
            .configure_mesh()
            .x_desc("Delay (samples)")
            .y_desc("Normalized magnitude")
            .draw()
            .map_err(draw_error)?;

        for (i, profile) in batch.profiles.iter().enumerate() {
            let points = profile
                .magnitudes()
                .iter()
                .enumerate()
                .map(|(d, &m)| (d as f32, m));
            chart
                .draw_series(LineSeries::new(points, Palette99::pick(i).stroke_width(1)))
                .map_err(draw_error)?;
        }

        root.present().map_err(draw_error)?;
    }

    Ok(svg)
}

/// Writes each batch to an SVG file
#[derive(Debug, Clone)]
pub struct SvgRenderer {
    path: PathBuf,
    size: (u32, u32),
}

impl SvgRenderer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            size: (1024, 600),
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = (width, height);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render and replace the artifact
    ///
    /// The SVG goes to a sibling temporary file first and is renamed over the
    /// artifact, so readers never see a half-written plot.
    pub fn write(&self, batch: &CirBatch) -> Result<(), RenderError> {
        let svg = render_svg(batch, self.size)?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).context(CreateDirSnafu { path: dir })?;
        }

        let tmp = self.path.with_extension("svg.tmp");
        fs::write(&tmp, svg).context(WriteSnafu { path: &tmp })?;
        fs::rename(&tmp, &self.path).context(WriteSnafu { path: &self.path })?;

        debug!(path = %self.path.display(), cycle = batch.cycle, "CIR plot written");
        Ok(())
    }
}

impl CirSink for SvgRenderer {
    fn publish(&mut self, batch: &CirBatch) -> Result<(), RenderError> {
        self.write(batch)
    }
}

/// Logs the strongest components of every profile
#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl CirSink for LogSink {
    fn publish(&mut self, batch: &CirBatch) -> Result<(), RenderError> {
        for (frame, profile) in batch.profiles.iter().enumerate() {
            let peaks = profile.strongest(NUM_PEAKS);
            info!(
                cycle = batch.cycle,
                frame,
                null_index = profile.null_index,
                peaks = ?peaks,
                "strongest CIR components"
            );
        }
        Ok(())
    }
}

/// Forwards each batch to several sinks, stopping at the first failure
impl CirSink for Vec<Box<dyn CirSink>> {
    fn publish(&mut self, batch: &CirBatch) -> Result<(), RenderError> {
        for sink in self.iter_mut() {
            sink.publish(batch)?;
        }
        Ok(())
    }
}
