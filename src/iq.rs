//! IQ Sample Decoding
//!
//! Converts raw capture bytes into complex baseband samples.
//!
//! **Wire formats**:
//! - `u8`: interleaved unsigned 8-bit I/Q pairs as produced by RTL-SDR dongles
//!   (center 127/128). Decoded as `((I - 127) + j(Q - 127)) / 128`, then the
//!   mean of the whole block is subtracted to remove the DC spike.
//! - `cf32`: interleaved 32-bit IEEE-754 float I/Q pairs in native byte order,
//!   read as complex samples directly. No DC removal.

use std::fmt;
use std::str::FromStr;

use num::complex::Complex32;
use snafu::Snafu;

/// Offset subtracted from each unsigned byte before scaling
const U8_CENTER: f32 = 127.0;

/// Scale applied after centering so the result lies in [-1, 1]
const U8_SCALE: f32 = 128.0;

/// Raw sample wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IqFormat {
    /// Unsigned 8-bit I/Q byte pairs
    #[default]
    U8,
    /// Interleaved 32-bit float I/Q pairs, native byte order
    Cf32,
}

impl IqFormat {
    /// Number of raw bytes holding one complex sample
    pub fn bytes_per_sample(self) -> usize {
        match self {
            IqFormat::U8 => 2,
            IqFormat::Cf32 => 8,
        }
    }
}

impl fmt::Display for IqFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IqFormat::U8 => write!(f, "u8"),
            IqFormat::Cf32 => write!(f, "cf32"),
        }
    }
}

impl FromStr for IqFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "u8" | "cu8" => Ok(IqFormat::U8),
            "cf32" | "fc32" | "fc64" => Ok(IqFormat::Cf32),
            other => Err(format!("unknown IQ format '{}' (expected u8 or cf32)", other)),
        }
    }
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum DecodeError {
    /// Unsigned byte input must hold whole I/Q pairs
    #[snafu(display("u8 IQ input has odd length {len}"))]
    OddLength { len: usize },

    /// Float input must hold whole 8-byte I/Q pairs
    #[snafu(display("cf32 IQ input length {len} is not a multiple of 8"))]
    MisalignedFloatPairs { len: usize },
}

/// Decode a raw byte block into complex samples
///
/// # Arguments
/// * `raw` - Captured bytes in the given wire format
/// * `format` - Wire format of `raw`
///
/// # Returns
/// One sample per I/Q pair, in capture order
pub fn decode(raw: &[u8], format: IqFormat) -> Result<Vec<Complex32>, DecodeError> {
    match format {
        IqFormat::U8 => decode_u8(raw),
        IqFormat::Cf32 => decode_cf32(raw),
    }
}

fn decode_u8(raw: &[u8]) -> Result<Vec<Complex32>, DecodeError> {
    if raw.len() % 2 != 0 {
        return Err(DecodeError::OddLength { len: raw.len() });
    }

    let mut samples: Vec<Complex32> = raw
        .chunks_exact(2)
        .map(|pair| {
            Complex32::new(
                (pair[0] as f32 - U8_CENTER) / U8_SCALE,
                (pair[1] as f32 - U8_CENTER) / U8_SCALE,
            )
        })
        .collect();

    if samples.is_empty() {
        return Ok(samples);
    }

    // Accumulate in f64, blocks are millions of samples long
    let (sum_re, sum_im) = samples
        .iter()
        .fold((0.0f64, 0.0f64), |(re, im), s| (re + s.re as f64, im + s.im as f64));
    let n = samples.len() as f64;
    let mean = Complex32::new((sum_re / n) as f32, (sum_im / n) as f32);

    for s in samples.iter_mut() {
        *s -= mean;
    }

    Ok(samples)
}

fn decode_cf32(raw: &[u8]) -> Result<Vec<Complex32>, DecodeError> {
    if raw.len() % 8 != 0 {
        return Err(DecodeError::MisalignedFloatPairs { len: raw.len() });
    }

    Ok(raw
        .chunks_exact(8)
        .map(|pair| {
            let re = f32::from_ne_bytes([pair[0], pair[1], pair[2], pair[3]]);
            let im = f32::from_ne_bytes([pair[4], pair[5], pair[6], pair[7]]);
            Complex32::new(re, im)
        })
        .collect())
}

/// Encode complex samples in the given wire format
pub fn encode(samples: &[Complex32], format: IqFormat) -> Vec<u8> {
    match format {
        IqFormat::U8 => encode_u8(samples),
        IqFormat::Cf32 => encode_cf32(samples),
    }
}

/// Quantize complex samples to unsigned 8-bit I/Q pairs
///
/// Components outside [-1, 1] saturate.
pub fn encode_u8(samples: &[Complex32]) -> Vec<u8> {
    let quantize = |x: f32| (x * U8_SCALE + U8_CENTER).round().clamp(0.0, 255.0) as u8;
    samples
        .iter()
        .flat_map(|s| [quantize(s.re), quantize(s.im)])
        .collect()
}

/// Encode complex samples as native-endian cf32 bytes
///
/// Inverse of the `cf32` decode path, used for reference files and simulated recordings.
pub fn encode_cf32(samples: &[Complex32]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(samples.len() * 8);
    for s in samples {
        raw.extend_from_slice(&s.re.to_ne_bytes());
        raw.extend_from_slice(&s.im.to_ne_bytes());
    }
    raw
}
