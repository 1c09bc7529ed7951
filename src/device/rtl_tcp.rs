//! rtl_tcp client handshake
//!
//! The server greets with a 12-byte dongle header (`RTL0`, tuner type, gain
//! count) and accepts 5-byte commands: one opcode byte followed by a big-endian u32.

use std::io::{Read, Write};

use snafu::ResultExt;
use tracing::debug;

use super::{ConfigureSnafu, DeviceError, DeviceParams, HandshakeSnafu};

/// Magic at the start of the dongle header
pub const MAGIC: &[u8; 4] = b"RTL0";

/// Length of the dongle header
pub const HEADER_LEN: usize = 12;

const CMD_SET_FREQUENCY: u8 = 0x01;
const CMD_SET_SAMPLE_RATE: u8 = 0x02;
const CMD_SET_GAIN_MODE: u8 = 0x03;
const CMD_SET_GAIN: u8 = 0x04;

/// Dongle description sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DongleInfo {
    pub tuner_type: u32,
    pub gain_count: u32,
}

/// Encode one rtl_tcp command
pub fn command(opcode: u8, value: u32) -> [u8; 5] {
    let v = value.to_be_bytes();
    [opcode, v[0], v[1], v[2], v[3]]
}

/// Read and check the dongle header
pub fn read_header<R: Read>(stream: &mut R) -> Result<DongleInfo, DeviceError> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).context(HandshakeSnafu)?;

    if &header[..4] != MAGIC {
        return Err(DeviceError::BadMagic {
            found: [header[0], header[1], header[2], header[3]],
        });
    }

    Ok(DongleInfo {
        tuner_type: u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
        gain_count: u32::from_be_bytes([header[8], header[9], header[10], header[11]]),
    })
}

/// Tune the dongle: sample rate, frequency, manual gain
pub fn configure<W: Write>(stream: &mut W, params: &DeviceParams) -> Result<(), DeviceError> {
    let commands = [
        command(CMD_SET_SAMPLE_RATE, params.sample_rate_hz),
        command(CMD_SET_FREQUENCY, params.frequency_hz),
        command(CMD_SET_GAIN_MODE, 1),
        command(CMD_SET_GAIN, params.gain_tenths_db),
    ];
    for cmd in &commands {
        stream.write_all(cmd).context(ConfigureSnafu)?;
    }
    stream.flush().context(ConfigureSnafu)?;

    debug!(
        frequency_hz = params.frequency_hz,
        sample_rate_hz = params.sample_rate_hz,
        gain_tenths_db = params.gain_tenths_db,
        "rtl_tcp configured"
    );
    Ok(())
}
