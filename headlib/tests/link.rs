use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

use headlib::protocol::MotorTelemetry;
use headlib::{
    ChannelSink, CommandPipeline, ConnectError, FrameLogger, Link, LinkConfig, LogSink,
    RawSetpoints, SetpointPolicies, TelemetryQueue, Transport, WriteError,
};

const TIMEOUT: Duration = Duration::from_millis(50);

// a fake device on the far side of a loopback socket
fn device() -> (LinkConfig, impl FnOnce() -> TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let config = LinkConfig::new(addr.to_string())
        .with_transport(Transport::Tcp)
        .with_read_timeout(TIMEOUT);
    (config, move || listener.accept().unwrap().0)
}

fn wait_for<T>(mut poll: impl FnMut() -> Option<T>) -> T {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(v) = poll() {
            return v;
        }
        assert!(Instant::now() < deadline, "timed out waiting");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn telemetry_reaches_queue() {
    let (config, accept) = device();
    let queue = TelemetryQueue::new();
    let link = Link::open(&config, queue.clone(), FrameLogger::disabled(), LogSink).unwrap();
    let mut remote = accept();

    remote.write_all(b"P:1,12.5,300.0,0,180.0,0.0\n").unwrap();

    let telemetry = wait_for(|| queue.try_pop());
    assert_eq!(
        telemetry,
        MotorTelemetry {
            moving_a: true,
            position_a: 12.5,
            speed_a: 300.0,
            moving_b: false,
            position_b: 180.0,
            speed_b: 0.0,
        }
    );
    link.close();
}

#[test]
fn bad_frame_skipped() {
    let (config, accept) = device();
    let queue = TelemetryQueue::new();
    let link = Link::open(&config, queue.clone(), FrameLogger::disabled(), LogSink).unwrap();
    let mut remote = accept();

    // split across writes, with a pause longer than the read timeout
    remote.write_all(b"P:1,2,3\nP:0,1.5,").unwrap();
    std::thread::sleep(TIMEOUT * 3);
    remote.write_all(b"0,0,2.5,0\r\n").unwrap();

    let telemetry = wait_for(|| queue.try_pop());
    assert_eq!(telemetry.position_a, 1.5);
    assert_eq!(telemetry.position_b, 2.5);
    assert!(queue.is_empty());

    let stats = link.stats();
    assert_eq!(stats.decode_errors, 1);
    assert_eq!(stats.telemetry, 1);
}

#[test]
fn info_lines_to_sink() {
    let (config, accept) = device();
    let (tx, rx) = crossbeam_channel::unbounded();
    let queue = TelemetryQueue::new();
    let _link = Link::open(&config, queue.clone(), FrameLogger::disabled(), ChannelSink(tx))
        .unwrap();
    let mut remote = accept();

    remote
        .write_all(b"S:ready\nI:Invalid frame: x\nhello\nP:0,0,0,0,0,0\n")
        .unwrap();

    let received: Vec<String> = (0..3)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    assert_eq!(received, vec!["S:ready", "I:Invalid frame: x", "hello"]);
    wait_for(|| queue.try_pop());
}

#[test]
fn command_on_the_wire() {
    let (config, accept) = device();
    let link = Link::open(
        &config,
        TelemetryQueue::new(),
        FrameLogger::disabled(),
        LogSink,
    )
    .unwrap();
    let remote = accept();

    let raw = RawSetpoints {
        target_a: 45.0,
        speed_a: 17.0,
        accel_a: 50.0,
        target_b: 10.0,
        speed_b: 17.0,
        accel_b: 50.0,
        ..Default::default()
    };
    CommandPipeline::default().submit(&link, &raw).unwrap();

    let mut line = String::new();
    BufReader::new(remote).read_line(&mut line).unwrap();
    assert_eq!(line, "45.0,17.0,50.0,10.0,17.0,2,50.0\n");
}

#[test]
fn close_is_prompt_and_idempotent() {
    let (config, accept) = device();
    let link = Link::open(
        &config,
        TelemetryQueue::new(),
        FrameLogger::disabled(),
        LogSink,
    )
    .unwrap();
    let _remote = accept();
    assert!(link.is_open());

    let started = Instant::now();
    link.close();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!link.is_open());

    link.close();
    assert!(matches!(link.write_line("1"), Err(WriteError::NotOpen)));
}

// run `f` on its own thread, failing instead of hanging if it blocks
fn within<T, F>(limit: Duration, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(limit).expect("blocked past its deadline")
}

fn file_config(path: impl AsRef<std::path::Path>) -> LinkConfig {
    LinkConfig::new(path.as_ref().to_string_lossy())
        .with_transport(Transport::File)
        .with_read_timeout(TIMEOUT)
}

#[test]
fn plain_file_close_is_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.txt");
    std::fs::write(&path, "S:ready\nP:0,3.0,0,0,4.0,0\n").unwrap();

    let queue = TelemetryQueue::new();
    let link = Link::open(&file_config(&path), queue.clone(), FrameLogger::disabled(), LogSink)
        .unwrap();
    assert_eq!(wait_for(|| queue.try_pop()).position_b, 4.0);

    // the reader is now backing off at EOF
    std::thread::sleep(TIMEOUT * 2);
    let started = Instant::now();
    link.close();
    assert!(started.elapsed() < TIMEOUT * 3);
}

#[cfg(unix)]
#[test]
fn fifo_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fifo");
    let status = std::process::Command::new("mkfifo")
        .arg(&path)
        .status()
        .unwrap();
    assert!(status.success());

    let config = file_config(&path);
    let res = within(Duration::from_secs(2), move || {
        Link::open(&config, TelemetryQueue::new(), FrameLogger::disabled(), LogSink)
            .map(|link| link.close())
    });
    assert!(matches!(res, Err(ConnectError::Unsupported { .. })));
}

#[cfg(unix)]
#[test]
fn pty_close_is_prompt() {
    use serialport::SerialPort;

    let (mut master, slave) = serialport::TTYPort::pair().unwrap();
    let name = slave.name().unwrap();

    let queue = TelemetryQueue::new();
    let link = Link::open(&file_config(&name), queue.clone(), FrameLogger::disabled(), LogSink)
        .unwrap();
    master.write_all(b"P:1,7.5,0,0,0,0\n").unwrap();
    assert_eq!(wait_for(|| queue.try_pop()).position_a, 7.5);

    // nothing more arrives, so the reader sits in timed-out reads
    std::thread::sleep(TIMEOUT * 3);
    let elapsed = within(Duration::from_secs(2), move || {
        let started = Instant::now();
        link.close();
        started.elapsed()
    });
    assert!(elapsed < TIMEOUT * 3);
    drop(slave);
}

#[test]
fn unwritable_log_still_works() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("no-such-dir").join("frames.log");
    let logger = FrameLogger::open_or_disabled(Some(&path));

    let (config, accept) = device();
    let link = Link::open(&config, TelemetryQueue::new(), logger.clone(), LogSink).unwrap();
    let remote = accept();

    let pipeline = CommandPipeline::new(SetpointPolicies::default(), logger);
    pipeline.submit(&link, &RawSetpoints::default()).unwrap();

    let mut line = String::new();
    BufReader::new(remote).read_line(&mut line).unwrap();
    assert!(line.ends_with('\n'));
    assert!(!path.exists());
}

#[test]
fn both_directions_logged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frames.log");
    let logger = FrameLogger::open(&path).unwrap();

    let (config, accept) = device();
    let queue = TelemetryQueue::new();
    let link = Link::open(&config, queue.clone(), logger.clone(), LogSink).unwrap();
    let mut remote = accept();

    let pipeline = CommandPipeline::new(SetpointPolicies::default(), logger);
    pipeline.submit(&link, &RawSetpoints::default()).unwrap();
    remote.write_all(b"P:0,0.0,0.0,0,0.0,0.0\n").unwrap();
    wait_for(|| queue.try_pop());
    link.close();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents
        .lines()
        .any(|l| l.ends_with(" Serial -> 0.0,1500.0,50.0,0.0,1500.0,2,50.0")));
    assert!(contents
        .lines()
        .any(|l| l.ends_with(" Serial <- P:0,0.0,0.0,0,0.0,0.0")));
}
