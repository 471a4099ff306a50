use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const SERVER_ENV: &str = "Mqtt_subscribe_server";
const TOPIC_ENV: &str = "Mqtt_subscribe_topics";

/// Command for the binary, isolated from the caller's environment: it runs in
/// `dir`, sees no `Mqtt_subscribe_*` variables and no per-user settings file.
fn subscriber(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_mqtt-subscribe"));
    cmd.current_dir(dir)
        .env_remove(SERVER_ENV)
        .env_remove(TOPIC_ENV)
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir)
        .env("NO_COLOR", "1")
        .stdin(Stdio::null());
    cmd
}

fn run(dir: &Path, args: &[&str]) -> Output {
    subscriber(dir).args(args).output().unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn missing_configuration_exits_1_without_connecting() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &[]);

    assert_eq!(output.status.code(), Some(1), "{}", stderr(&output));
    assert!(!stdout(&output).contains("Connecting to"));
    assert!(stderr(&output).contains("no server or topic found"));
}

#[test]
fn single_argument_is_not_a_configuration() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &["tcp://127.0.0.1:1883"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(!stdout(&output).contains("Connecting to"));
}

#[test]
fn unknown_flag_exits_1() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &["--bogus"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(!stdout(&output).contains("Connecting to"));
}

#[test]
fn usage_error_exits_1() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &["--config"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("--config"));
}

#[test]
fn help_exits_0() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &["--help"]);

    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("Usage"));
}

#[test]
fn unsupported_broker_scheme_exits_1() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &["ssl://127.0.0.1:8883", "sensors/temp"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Invalid broker address"));
}

#[test]
fn refused_connection_exits_1() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &["tcp://127.0.0.1:1", "-neg/topic"]);

    assert_eq!(output.status.code(), Some(1), "{}", stderr(&output));
    assert!(stdout(&output).contains("subscribing to topic '-neg/topic'"));
    assert!(stderr(&output).contains("Error connecting to MQTT broker"));
}

#[test]
fn config_file_in_working_directory_is_used() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.ini"),
        "server = tcp://127.0.0.1:1 ; nothing listens here\ntopic = from/file\n",
    )
    .unwrap();
    let output = run(dir.path(), &[]);

    assert_eq!(output.status.code(), Some(1));
    let logs = stdout(&output);
    assert!(logs.contains("Using configuration file"), "{}", logs);
    assert!(logs.contains("subscribing to topic 'from/file'"), "{}", logs);
}

#[test]
fn environment_is_used_last() {
    let dir = TempDir::new().unwrap();
    let output = subscriber(dir.path())
        .env(SERVER_ENV, "tcp://127.0.0.1:1")
        .env(TOPIC_ENV, "from/env")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let logs = stdout(&output);
    assert!(logs.contains("Using environment variables"), "{}", logs);
    assert!(logs.contains("subscribing to topic 'from/env'"), "{}", logs);
}

const CONNECT: u8 = 1;
const SUBSCRIBE: u8 = 8;
const UNSUBSCRIBE: u8 = 10;
const DISCONNECT: u8 = 14;

/// Reads one MQTT control packet; `None` once the client has closed the socket.
fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let mut byte = [0u8; 1];
    stream.read_exact(&mut byte).ok()?;
    let kind = byte[0] >> 4;

    let mut len = 0usize;
    let mut shift = 0;
    loop {
        stream.read_exact(&mut byte).ok()?;
        len |= ((byte[0] & 0x7f) as usize) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).ok()?;
    Some((kind, body))
}

fn publish_packet(topic: &str, payload: &str) -> Vec<u8> {
    let remaining = 2 + topic.len() + payload.len();
    assert!(remaining < 128);
    let mut packet = vec![0x30, remaining as u8, 0, topic.len() as u8];
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload.as_bytes());
    packet
}

/// Accepts one client and answers CONNECT, SUBSCRIBE and UNSUBSCRIBE, pushing a
/// single message after the subscription. Returns the packet types and the
/// subscribed topic.
fn serve_one_client(listener: TcpListener) -> (Vec<u8>, String) {
    let (mut stream, _) = listener.accept().unwrap();
    let mut seen = Vec::new();
    let mut topic = String::new();

    while let Some((kind, body)) = read_packet(&mut stream) {
        seen.push(kind);
        match kind {
            CONNECT => stream.write_all(&[0x20, 0x02, 0x00, 0x00]).unwrap(),
            SUBSCRIBE => {
                let topic_len = u16::from_be_bytes([body[2], body[3]]) as usize;
                topic = String::from_utf8_lossy(&body[4..4 + topic_len]).into_owned();
                stream
                    .write_all(&[0x90, 0x03, body[0], body[1], 0x00])
                    .unwrap();
                stream.write_all(&publish_packet(&topic, "21.5")).unwrap();
            }
            UNSUBSCRIBE => stream
                .write_all(&[0xb0, 0x02, body[0], body[1]])
                .unwrap(),
            DISCONNECT => break,
            _ => {}
        }
    }
    (seen, topic)
}

#[cfg(unix)]
#[test]
fn interrupt_unsubscribes_disconnects_and_exits_0() {
    let dir = TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let broker = format!("tcp://127.0.0.1:{}", listener.local_addr().unwrap().port());
    let broker_thread = thread::spawn(move || serve_one_client(listener));

    let mut child = subscriber(dir.path())
        .args([broker.as_str(), "sensors/temp"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let (lines_tx, lines_rx) = mpsc::channel();
    let child_stdout = child.stdout.take().unwrap();
    thread::spawn(move || {
        for line in BufReader::new(child_stdout).lines().map_while(Result::ok) {
            if lines_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut printed = Vec::new();
    let mut message_seen = false;
    while let Ok(line) = lines_rx.recv_timeout(Duration::from_secs(10)) {
        printed.push(line.clone());
        if line.ends_with("sensors/temp: 21.5") {
            message_seen = true;
            break;
        }
    }
    assert!(message_seen, "{:#?}", printed);

    thread::sleep(Duration::from_millis(200));
    let status = Command::new("kill")
        .arg("-TERM")
        .arg(child.id().to_string())
        .status()
        .unwrap();
    assert!(status.success());

    let status = child.wait().unwrap();
    assert_eq!(status.code(), Some(0));

    let (seen, topic) = broker_thread.join().unwrap();
    assert_eq!(topic, "sensors/temp");
    assert_eq!(seen, vec![CONNECT, SUBSCRIBE, UNSUBSCRIBE, DISCONNECT]);
}
