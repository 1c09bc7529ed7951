//! Capture Device Supervision
//!
//! Starts the external capture source, runs a receiver thread that feeds every
//! received chunk into the shared [`StreamBuffer`], and tears both down on stop.
//!
//! **Sources**:
//! - `Process`: an `rtl_sdr`-compatible program started as
//!   `<program> -f <Hz> -s <Hz> -g <dB> -S -`, read through its stdout pipe
//! - `RtlTcp`: an `rtl_tcp` server, configured over the socket after the handshake
//!
//! **Startup**: a capture program that exits within [`STARTUP_GRACE`] (no
//! dongle, device busy) is a start failure, not a stream that ended.
//!
//! **Stopping**: the stop flag alone cannot interrupt a blocking read, so `stop`
//! also kills the process (closing the pipe) or shuts the socket down, then joins
//! the receiver. It returns only once the receiver has exited. On unix the
//! program runs in its own process group and the whole group is killed, so
//! wrapper scripts that fork the real capture tool do not keep the pipe open.
//!
//! Read failures end the receiver and are logged; restarting is up to the owner.

pub mod receiver;
pub mod rtl_tcp;

use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use snafu::{ResultExt, Snafu};
use tracing::{info, warn};

use crate::stream::StreamBuffer;

/// Timeout for the TCP connect and the rtl_tcp greeting
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a freshly spawned capture program must survive to count as started
pub const STARTUP_GRACE: Duration = Duration::from_millis(300);

const EXIT_POLL: Duration = Duration::from_millis(20);

/// Default capture program
pub const DEFAULT_PROGRAM: &str = "rtl_sdr";

/// Where capture bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSource {
    /// Program writing u8 IQ to stdout, taking rtl_sdr arguments
    Process { program: PathBuf },
    /// rtl_tcp server
    RtlTcp { addr: SocketAddr },
}

impl fmt::Display for DeviceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSource::Process { program } => write!(f, "process {}", program.display()),
            DeviceSource::RtlTcp { addr } => write!(f, "rtl_tcp {}", addr),
        }
    }
}

/// Capture parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceParams {
    pub source: DeviceSource,
    /// Center frequency in Hz
    pub frequency_hz: u32,
    /// Sample rate in Hz
    pub sample_rate_hz: u32,
    /// Tuner gain in tenths of a dB
    pub gain_tenths_db: u32,
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            source: DeviceSource::Process {
                program: PathBuf::from(DEFAULT_PROGRAM),
            },
            frequency_hz: 227_360_000, // DAB block 13C
            sample_rate_hz: 2_048_000,
            gain_tenths_db: 200,
        }
    }
}

impl DeviceParams {
    /// Command line arguments for a `Process` source
    pub fn process_args(&self) -> Vec<String> {
        vec![
            "-f".to_string(),
            self.frequency_hz.to_string(),
            "-s".to_string(),
            self.sample_rate_hz.to_string(),
            "-g".to_string(),
            format!("{:.1}", self.gain_tenths_db as f32 / 10.0),
            "-S".to_string(),
            "-".to_string(),
        ]
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DeviceError {
    /// Capture program could not be started
    #[snafu(display("failed to start capture program {}: {source}", program.display()))]
    Spawn { program: PathBuf, source: io::Error },

    /// Capture program exited right after starting
    #[snafu(display("capture program {} exited during startup ({status})", program.display()))]
    Exited { program: PathBuf, status: ExitStatus },

    /// Capture program started without a stdout pipe
    #[snafu(display("capture program has no stdout pipe"))]
    MissingStdout,

    /// TCP connection failed
    #[snafu(display("failed to connect to rtl_tcp at {addr}: {source}"))]
    Connect { addr: SocketAddr, source: io::Error },

    /// Dongle header could not be read
    #[snafu(display("rtl_tcp handshake failed: {source}"))]
    Handshake { source: io::Error },

    /// Server is not rtl_tcp
    #[snafu(display("unexpected rtl_tcp magic {found:?}"))]
    BadMagic { found: [u8; 4] },

    /// Tuning commands could not be sent
    #[snafu(display("failed to configure rtl_tcp: {source}"))]
    Configure { source: io::Error },

    /// Socket handle for shutdown could not be cloned
    #[snafu(display("failed to clone device socket: {source}"))]
    CloneSocket { source: io::Error },

    /// Receiver thread could not be spawned
    #[snafu(display("failed to spawn receiver thread: {source}"))]
    SpawnReceiver { source: io::Error },
}

#[derive(Debug, Snafu)]
pub enum ReceiveError {
    /// Read from the device connection failed
    #[snafu(display("device read failed after {total} bytes: {source}"))]
    Read { source: io::Error, total: u64 },

    /// Device closed the connection
    #[snafu(display("device stream ended after {total} bytes"))]
    EndOfStream { total: u64 },

    /// Receiver thread panicked
    #[snafu(display("receiver thread panicked"))]
    ReceiverPanicked,
}

impl ReceiveError {
    /// Bytes delivered before the receiver ended
    pub fn bytes_received(&self) -> u64 {
        match self {
            ReceiveError::Read { total, .. } | ReceiveError::EndOfStream { total } => *total,
            ReceiveError::ReceiverPanicked => 0,
        }
    }
}

enum Connection {
    Process(Child),
    Socket(TcpStream),
}

/// Running capture source plus its receiver thread
pub struct DeviceSupervisor {
    connection: Connection,
    stop: Arc<AtomicBool>,
    receiver: Option<JoinHandle<Result<u64, ReceiveError>>>,
    source: DeviceSource,
}

impl DeviceSupervisor {
    /// Start the capture source and begin feeding `buffer`
    ///
    /// The buffer is cleared first so bytes from an earlier connection never
    /// mix with the new stream.
    pub fn start(params: &DeviceParams, buffer: Arc<StreamBuffer>) -> Result<Self, DeviceError> {
        buffer.clear();
        let stop = Arc::new(AtomicBool::new(false));

        let supervisor = match &params.source {
            DeviceSource::Process { program } => {
                Self::start_process(program, params, buffer, stop)?
            }
            DeviceSource::RtlTcp { addr } => Self::start_rtl_tcp(*addr, params, buffer, stop)?,
        };

        info!(
            source = %params.source,
            frequency_hz = params.frequency_hz,
            sample_rate_hz = params.sample_rate_hz,
            "capture started"
        );
        Ok(supervisor)
    }

    fn start_process(
        program: &Path,
        params: &DeviceParams,
        buffer: Arc<StreamBuffer>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, DeviceError> {
        let mut command = Command::new(program);
        command
            .args(params.process_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command.spawn().context(SpawnSnafu { program })?;

        let Some(stdout) = child.stdout.take() else {
            kill_and_reap(&mut child);
            return Err(DeviceError::MissingStdout);
        };

        let receiver = match spawn_receiver(stdout, buffer, Arc::clone(&stop)) {
            Ok(handle) => handle,
            Err(e) => {
                kill_and_reap(&mut child);
                return Err(e);
            }
        };

        if let Some(status) = early_exit(&mut child) {
            stop.store(true, Ordering::Release);
            kill_and_reap(&mut child);
            if let Ok(Err(e)) = receiver.join() {
                warn!(error = %e, "receiver ended with capture program");
            }
            return Err(DeviceError::Exited {
                program: program.to_path_buf(),
                status,
            });
        }

        Ok(Self {
            connection: Connection::Process(child),
            stop,
            receiver: Some(receiver),
            source: params.source.clone(),
        })
    }

    fn start_rtl_tcp(
        addr: SocketAddr,
        params: &DeviceParams,
        buffer: Arc<StreamBuffer>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, DeviceError> {
        let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).context(ConnectSnafu { addr })?;

        stream.set_read_timeout(Some(CONNECT_TIMEOUT)).context(HandshakeSnafu)?;
        let dongle = rtl_tcp::read_header(&mut stream)?;
        info!(tuner_type = dongle.tuner_type, gain_count = dongle.gain_count, "rtl_tcp dongle");
        stream.set_read_timeout(None).context(HandshakeSnafu)?;

        rtl_tcp::configure(&mut stream, params)?;

        let control = stream.try_clone().context(CloneSocketSnafu)?;
        let receiver = spawn_receiver(stream, buffer, Arc::clone(&stop))?;

        Ok(Self {
            connection: Connection::Socket(control),
            stop,
            receiver: Some(receiver),
            source: params.source.clone(),
        })
    }

    /// Whether the receiver thread is still reading
    pub fn is_receiving(&self) -> bool {
        self.receiver.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the capture source and wait for the receiver to exit
    ///
    /// # Returns
    /// Total bytes received, or the error that had already ended the receiver
    pub fn stop(mut self) -> Result<u64, ReceiveError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<u64, ReceiveError> {
        let Some(receiver) = self.receiver.take() else {
            return Ok(0);
        };

        self.stop.store(true, Ordering::Release);

        match &mut self.connection {
            Connection::Process(child) => kill_and_reap(child),
            Connection::Socket(socket) => {
                if let Err(e) = socket.shutdown(Shutdown::Both) {
                    if e.kind() != io::ErrorKind::NotConnected {
                        warn!(error = %e, "socket shutdown failed");
                    }
                }
            }
        }

        let result = receiver.join().unwrap_or(Err(ReceiveError::ReceiverPanicked));
        match &result {
            Ok(total) => info!(source = %self.source, total_bytes = total, "capture stopped"),
            Err(e) => warn!(source = %self.source, error = %e, "capture stopped after receiver failure"),
        }
        result
    }
}

impl Drop for DeviceSupervisor {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn spawn_receiver<R: io::Read + Send + 'static>(
    reader: R,
    buffer: Arc<StreamBuffer>,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<Result<u64, ReceiveError>>, DeviceError> {
    thread::Builder::new()
        .name("device-receiver".to_string())
        .spawn(move || receiver::receive_loop(reader, &buffer, &stop))
        .context(SpawnReceiverSnafu)
}

/// Exit status of `child` if it terminates within `STARTUP_GRACE`
fn early_exit(child: &mut Child) -> Option<ExitStatus> {
    let deadline = Instant::now() + STARTUP_GRACE;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) if Instant::now() >= deadline => return None,
            Ok(None) => thread::sleep(EXIT_POLL),
            Err(e) => {
                warn!(error = %e, "failed to poll capture program");
                return None;
            }
        }
    }
}

fn kill_and_reap(child: &mut Child) {
    kill_process_group(child);
    // kill() fails with InvalidInput once the child has already exited
    if let Err(e) = child.kill() {
        if e.kind() != io::ErrorKind::InvalidInput {
            warn!(error = %e, "failed to kill capture program");
        }
    }
    if let Err(e) = child.wait() {
        warn!(error = %e, "failed to reap capture program");
    }
}

/// SIGKILL the group the program leads, reaching anything it forked
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: kill() has no memory-safety preconditions
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        let e = io::Error::last_os_error();
        if e.raw_os_error() != Some(libc::ESRCH) {
            warn!(error = %e, pgid, "failed to kill capture process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}
