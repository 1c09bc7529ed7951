//! Receiver loop: blocking reads from the device connection into the stream buffer

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, trace};

use super::ReceiveError;
use crate::stream::StreamBuffer;

/// Bytes requested per read
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Push everything read from `reader` into `buffer` until stopped
///
/// The stop flag is checked after every read returns. Stopping is only prompt
/// if the owner also closes the connection so a pending read unblocks; errors
/// and EOF observed after the flag is set are the expected result of that close.
///
/// # Returns
/// Total bytes received, or the error that ended the stream unexpectedly
pub fn receive_loop<R: Read>(
    mut reader: R,
    buffer: &StreamBuffer,
    stop: &AtomicBool,
) -> Result<u64, ReceiveError> {
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let result = reader.read(&mut chunk);

        if stop.load(Ordering::Acquire) {
            debug!(total_bytes = total, "receiver stopped");
            return Ok(total);
        }

        match result {
            Ok(0) => {
                error!(total_bytes = total, "device stream ended");
                return Err(ReceiveError::EndOfStream { total });
            }
            Ok(n) => {
                buffer.push(&chunk[..n]);
                total += n as u64;
                trace!(n, total_bytes = total, "received chunk");
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(source) => {
                error!(total_bytes = total, error = %source, "device read failed");
                return Err(ReceiveError::Read { source, total });
            }
        }
    }
}
