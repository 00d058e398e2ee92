use std::io::{Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use face_tracker::ingest::encode_length_prefixed;
use face_tracker::{
    ConnectionSupervisor, SessionReport, StatsSink, SupervisorHandle, ThroughputReport,
    TrackerConfig,
};

#[derive(Default)]
struct Recorder {
    sessions: Mutex<Vec<SessionReport>>,
    throughput: Mutex<Vec<ThroughputReport>>,
}

impl StatsSink for Recorder {
    fn throughput(&self, report: &ThroughputReport) {
        self.throughput.lock().unwrap().push(report.clone());
    }

    fn session(&self, report: &SessionReport) {
        self.sessions.lock().unwrap().push(report.clone());
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn start(keep_alive: Duration) -> (SupervisorHandle, Arc<Recorder>, String) {
    let stream_addr = format!("127.0.0.1:{}", free_port());
    let mut config = TrackerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        ..TrackerConfig::default()
    };
    config.transport.stream_addr = stream_addr.clone();
    config.transport.read_timeout = Duration::from_millis(100);
    config.control.keep_alive = keep_alive;
    config.validate().unwrap();

    let recorder = Arc::new(Recorder::default());
    let handle = ConnectionSupervisor::bind(config)
        .unwrap()
        .with_stats_sink(recorder.clone())
        .spawn()
        .unwrap();
    (handle, recorder, stream_addr)
}

fn wait_for_sessions(handle: &SupervisorHandle, count: u64) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while handle.sessions_served() < count && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(handle.sessions_served(), count);
}

fn face_jpeg() -> Vec<u8> {
    let mut img = RgbImage::from_pixel(640, 480, Rgb([30, 60, 200]));
    for y in 180..300 {
        for x in 380..480 {
            img.put_pixel(x, y, Rgb([220, 170, 140]));
        }
    }
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
        .unwrap();
    out
}

fn parse_command(raw: &str) -> (f64, f64) {
    let inner = raw
        .trim_end()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or_else(|| panic!("malformed command {:?}", raw));
    let (pan, tilt) = inner.split_once(',').unwrap();
    (pan.parse().unwrap(), tilt.parse().unwrap())
}

#[test]
fn camera_face_turns_the_robot() {
    let (handle, recorder, stream_addr) = start(Duration::from_secs(60));

    let mut robot = TcpStream::connect(handle.addr).unwrap();
    robot.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    robot.write_all(b"OK").unwrap();

    let camera = std::thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut stream = loop {
            match TcpStream::connect(&stream_addr) {
                Ok(stream) => break stream,
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(err) => panic!("camera could not connect: {}", err),
            }
        };
        let frame = encode_length_prefixed(&face_jpeg()).unwrap();
        for _ in 0..3 {
            if stream.write_all(&frame).is_err() {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    });

    let mut buf = [0u8; 256];
    let read = robot.read(&mut buf).unwrap();
    let (pan, tilt) = parse_command(&String::from_utf8_lossy(&buf[..read]));
    // Face right of centre: pan decreases from its start of pi.
    assert!(pan < std::f64::consts::PI - 0.1, "pan {}", pan);
    assert!(pan > std::f64::consts::PI - 0.35, "pan {}", pan);
    assert!((-35f64.to_radians()..=5f64.to_radians()).contains(&tilt));

    drop(robot);
    camera.join().unwrap();
    wait_for_sessions(&handle, 1);
    handle.stop().unwrap();

    let sessions = recorder.sessions.lock().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].commands_sent, 1);
    assert_eq!(sessions[0].keep_alives_sent, 0);
    assert!(sessions[0].faces_used >= 1);
    assert_eq!(sessions[0].outcome, "closed by peer");

    let throughput = recorder.throughput.lock().unwrap();
    assert!(throughput.iter().any(|r| r.frames >= 1));
}

#[test]
fn empty_ack_disconnects_and_frees_supervisor() {
    let (handle, recorder, _stream_addr) = start(Duration::from_millis(50));

    for round in 1..=2 {
        let mut robot = TcpStream::connect(handle.addr).unwrap();
        robot.set_read_timeout(Some(Duration::from_secs(10))).unwrap();

        robot.write_all(b"OK\n").unwrap();
        let mut buf = [0u8; 256];
        let read = robot.read(&mut buf).unwrap();
        let (pan, tilt) = parse_command(&String::from_utf8_lossy(&buf[..read]));
        assert!((pan - std::f64::consts::PI).abs() < 1e-12);
        assert!((tilt - (-15f64).to_radians()).abs() < 1e-12);

        robot.write_all(b"  \n").unwrap();
        assert_eq!(robot.read(&mut buf).unwrap(), 0, "server closes after empty ack");
        wait_for_sessions(&handle, round);
    }
    handle.stop().unwrap();

    let sessions = recorder.sessions.lock().unwrap();
    assert_eq!(sessions.len(), 2);
    assert!(sessions
        .iter()
        .all(|s| s.outcome == "closed by peer" && s.keep_alives_sent == 1));
}
