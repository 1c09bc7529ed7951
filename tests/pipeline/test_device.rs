//! Device supervision against a fake rtl_tcp server and a fake capture program

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rustycir::device::rtl_tcp::{command, MAGIC};
use rustycir::device::{DeviceError, DeviceParams, DeviceSource, DeviceSupervisor, ReceiveError};
use rustycir::StreamBuffer;

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Accepts one client, records its 4 commands, then streams `payload` repeatedly
/// until the client goes away (or once, if `close_after_payload`)
fn fake_rtl_tcp(payload: Vec<u8>, close_after_payload: bool) -> (std::net::SocketAddr, mpsc::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let mut header = MAGIC.to_vec();
        header.extend_from_slice(&5u32.to_be_bytes());
        header.extend_from_slice(&29u32.to_be_bytes());
        socket.write_all(&header).unwrap();

        let mut commands = vec![0u8; 20];
        socket.read_exact(&mut commands).unwrap();
        tx.send(commands).unwrap();

        if close_after_payload {
            let _ = socket.write_all(&payload);
            return;
        }
        while socket.write_all(&payload).is_ok() {
            thread::sleep(Duration::from_millis(1));
        }
    });

    (addr, rx)
}

#[test]
fn test_rtl_tcp_handshake_and_streaming() {
    let (addr, commands) = fake_rtl_tcp(vec![127u8; 4096], false);
    let params = DeviceParams {
        source: DeviceSource::RtlTcp { addr },
        frequency_hz: 222_064_000,
        sample_rate_hz: 2_048_000,
        gain_tenths_db: 197,
    };
    let buffer = Arc::new(StreamBuffer::new(1 << 20));
    buffer.push(b"stale bytes from an earlier connection");

    let supervisor = DeviceSupervisor::start(&params, Arc::clone(&buffer)).unwrap();

    let mut expected = Vec::new();
    expected.extend_from_slice(&command(0x02, 2_048_000));
    expected.extend_from_slice(&command(0x01, 222_064_000));
    expected.extend_from_slice(&command(0x03, 1));
    expected.extend_from_slice(&command(0x04, 197));
    assert_eq!(commands.recv_timeout(Duration::from_secs(5)).unwrap(), expected);

    assert!(wait_for(Duration::from_secs(5), || buffer.len() >= 8192));
    assert!(supervisor.is_receiving());
    // Only server bytes, the stale prefix was cleared on start
    assert!(buffer.try_take(8192).unwrap().iter().all(|&b| b == 127));

    let started = Instant::now();
    let total = supervisor.stop().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(total >= 8192);
}

#[test]
fn test_server_hangup_ends_receiver() {
    let (addr, _commands) = fake_rtl_tcp(vec![1u8; 1000], true);
    let params = DeviceParams {
        source: DeviceSource::RtlTcp { addr },
        ..DeviceParams::default()
    };
    let buffer = Arc::new(StreamBuffer::new(1 << 16));

    let supervisor = DeviceSupervisor::start(&params, Arc::clone(&buffer)).unwrap();
    assert!(wait_for(Duration::from_secs(5), || !supervisor.is_receiving()));

    match supervisor.stop() {
        Err(ReceiveError::EndOfStream { total }) => assert_eq!(total, 1000),
        other => panic!("expected EndOfStream, got {:?}", other),
    }
    assert_eq!(buffer.len(), 1000);
}

#[test]
fn test_bad_magic_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let _ = socket.write_all(b"HTTP/1.1 200");
        thread::sleep(Duration::from_millis(200));
    });

    let params = DeviceParams {
        source: DeviceSource::RtlTcp { addr },
        ..DeviceParams::default()
    };
    let err = DeviceSupervisor::start(&params, Arc::new(StreamBuffer::new(64))).err().unwrap();
    assert!(err.to_string().contains("magic"), "{}", err);
}

#[cfg(unix)]
#[test]
fn test_process_source_stops_promptly() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let program = dir.path().join("fake_rtl_sdr");
    std::fs::write(&program, "#!/bin/sh\nprintf '%s ' \"$@\"\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

    let params = DeviceParams {
        source: DeviceSource::Process { program },
        frequency_hz: 222_064_000,
        sample_rate_hz: 2_048_000,
        gain_tenths_db: 205,
    };
    let buffer = Arc::new(StreamBuffer::new(4096));
    let supervisor = DeviceSupervisor::start(&params, Arc::clone(&buffer)).unwrap();

    let expected = b"-f 222064000 -s 2048000 -g 20.5 -S - ";
    assert!(wait_for(Duration::from_secs(5), || buffer.len() >= expected.len()));
    assert_eq!(buffer.try_take(expected.len()).unwrap(), expected.to_vec());

    // The program is blocked in sleep; stop must not wait for it
    let started = Instant::now();
    assert_eq!(supervisor.stop().unwrap(), expected.len() as u64);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[cfg(unix)]
fn fake_program(dir: &std::path::Path, script: &str) -> DeviceParams {
    use std::os::unix::fs::PermissionsExt;

    let program = dir.join("fake_rtl_sdr");
    std::fs::write(&program, script).unwrap();
    std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
    DeviceParams {
        source: DeviceSource::Process { program },
        ..DeviceParams::default()
    }
}

#[cfg(unix)]
#[test]
fn test_program_exiting_at_startup_is_device_error() {
    let dir = tempfile::tempdir().unwrap();
    let params = fake_program(
        dir.path(),
        "#!/bin/sh\necho 'No supported devices found.' >&2\nexit 1\n",
    );

    let err = DeviceSupervisor::start(&params, Arc::new(StreamBuffer::new(4096))).err().unwrap();
    match err {
        DeviceError::Exited { status, .. } => assert_eq!(status.code(), Some(1)),
        other => panic!("expected Exited, got {:?}", other),
    }
}

#[cfg(unix)]
#[test]
fn test_stop_reaches_forked_children() {
    let dir = tempfile::tempdir().unwrap();
    // No exec: sleep runs as a grandchild holding the stdout pipe
    let params = fake_program(dir.path(), "#!/bin/sh\nprintf ready\nsleep 30\n");

    let buffer = Arc::new(StreamBuffer::new(4096));
    let supervisor = DeviceSupervisor::start(&params, Arc::clone(&buffer)).unwrap();
    assert!(wait_for(Duration::from_secs(5), || buffer.len() >= 5));

    let started = Instant::now();
    assert_eq!(supervisor.stop().unwrap(), 5);
    assert!(started.elapsed() < Duration::from_secs(5));
}
