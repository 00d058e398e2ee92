//! fake_robot - stand-in for the robot side of the control link.
//!
//! Connects to face_trackerd, then repeatedly sends `OK`, prints the command
//! it gets back and waits before asking again. Exits on any socket error or
//! when the server closes the link.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use face_tracker::control::MAX_ACK_BYTES;
use face_tracker::StopSignal;

#[derive(Parser, Debug)]
#[command(author, version, about = "Speak the robot side of the face tracker protocol")]
struct Args {
    /// face_trackerd control address.
    #[arg(long, env = "FAKE_ROBOT_ADDR", default_value = "127.0.0.1:3000")]
    addr: String,

    /// Pause between commands.
    #[arg(long, env = "FAKE_ROBOT_INTERVAL_MS", default_value = "200")]
    interval_ms: u64,

    /// Stop after this many commands (default: run until interrupted).
    #[arg(long)]
    count: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.stop()).expect("error setting Ctrl-C handler");

    let mut link = TcpStream::connect(&args.addr)
        .with_context(|| format!("connect to face tracker at {}", args.addr))?;
    link.set_nodelay(true).context("disable nagle")?;
    log::info!("connected to {}", args.addr);

    let interval = Duration::from_millis(args.interval_ms);
    let mut buf = [0u8; MAX_ACK_BYTES];
    let mut received = 0u64;
    while !stop.is_stopped() {
        if args.count.is_some_and(|count| received >= count) {
            break;
        }
        link.write_all(b"OK").context("send ack")?;
        let read = link.read(&mut buf).context("receive command")?;
        if read == 0 {
            return Err(anyhow!("face tracker closed the link"));
        }
        received += 1;
        let command = String::from_utf8_lossy(&buf[..read]);
        log::info!("command {}: {}", received, command.trim_end());
        std::thread::sleep(interval);
    }

    log::info!("received {} commands, disconnecting", received);
    Ok(())
}
