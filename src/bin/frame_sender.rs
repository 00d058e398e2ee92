//! frame_sender - feed JPEG files to the stream-chunk transport.
//!
//! Connects to the camera ingestion port and writes each file as one
//! length-prefixed frame, optionally looping, at a fixed frame rate.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{IsTerminal, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use face_tracker::ingest::encode_length_prefixed;
use face_tracker::{StopSignal, MAX_JPEG_BYTES};

#[derive(Parser, Debug)]
#[command(author, version, about = "Send JPEG files over the length-prefixed camera stream")]
struct Args {
    /// Stream ingestion address of face_trackerd.
    #[arg(long, env = "FRAME_SENDER_ADDR", default_value = "127.0.0.1:3001")]
    addr: String,

    /// Frames per second.
    #[arg(long, default_value = "10")]
    fps: u32,

    /// Send the file list this many times (0 = until interrupted).
    #[arg(long, default_value = "1")]
    loops: u32,

    /// JPEG files, sent in order.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("--fps must be greater than zero"));
    }

    let mut frames = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let bytes =
            std::fs::read(path).with_context(|| format!("read frame {}", path.display()))?;
        if bytes.len() > MAX_JPEG_BYTES {
            return Err(anyhow!(
                "{} is {} bytes; frames are limited to {}",
                path.display(),
                bytes.len(),
                MAX_JPEG_BYTES
            ));
        }
        frames.push(encode_length_prefixed(&bytes)?);
    }

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.stop()).expect("error setting Ctrl-C handler");

    let mut stream = TcpStream::connect(&args.addr)
        .with_context(|| format!("connect to camera stream at {}", args.addr))?;
    log::info!("sending {} frames to {}", frames.len(), args.addr);

    let total = u64::from(args.loops) * frames.len() as u64;
    let progress = if std::io::stderr().is_terminal() && total > 0 {
        let bar = ProgressBar::new(total);
        let style = ProgressStyle::with_template("{bar:40} {pos}/{len} frames {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar
    } else {
        ProgressBar::hidden()
    };

    let frame_interval = Duration::from_secs_f64(1.0 / f64::from(args.fps));
    let started = Instant::now();
    let mut sent = 0u64;
    let mut round = 0u32;
    'outer: while args.loops == 0 || round < args.loops {
        for frame in &frames {
            if stop.is_stopped() {
                break 'outer;
            }
            let due = started + frame_interval * u32::try_from(sent).unwrap_or(u32::MAX);
            if let Some(wait) = due.checked_duration_since(Instant::now()) {
                std::thread::sleep(wait);
            }
            stream.write_all(frame).context("send frame")?;
            sent += 1;
            progress.inc(1);
        }
        round += 1;
    }
    progress.finish_with_message("done");

    log::info!(
        "sent {} frames in {:.1}s",
        sent,
        started.elapsed().as_secs_f64()
    );
    Ok(())
}
