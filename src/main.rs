// src/main.rs
mod capture;
mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};

use capture::{
    align, pulse::epoch_secs_now, EnergyClassifier, InferenceGate, LinkSession, PulseReader,
    PulseStream, SampleWindow, SessionEvent, WindowExtractor,
};
use config::CaptureConfig;

fn main() -> Result<()> {
    env_logger::init();
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = CaptureConfig::load(config_path.as_deref())?;
    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: CaptureConfig) -> Result<()> {
    let window = Arc::new(
        SampleWindow::with_duration(config.sample_rate_hz, config.window_seconds)
            .context("building sample window")?,
    );

    // Anchor for snapshots taken before the first notification: fixed at
    // startup so pulse events arriving ahead of the BLE stream stay
    // visible instead of being trimmed by a moving "now".
    let capture_origin = epoch_secs_now();

    // Secondary stream is optional; the aligner treats "no pulse" and
    // "pulse configured but quiet" identically.
    let pulse = Arc::new(PulseStream::new(
        config
            .serial_pulse
            .as_ref()
            .map(|s| s.retention_seconds)
            .unwrap_or(30.0),
    ));
    let mut pulse_reader = match &config.serial_pulse {
        Some(serial_config) => Some(
            PulseReader::spawn(serial_config, Arc::clone(&pulse))
                .context("starting pulse reader")?,
        ),
        None => None,
    };

    let (mut session, mut events) = if config.simulate {
        LinkSession::open_simulated(&config, Arc::clone(&window))
    } else {
        LinkSession::open(&config, Arc::clone(&window))
            .await
            .context("opening BLE capture session")?
    };

    let extractor = WindowExtractor::new(Arc::clone(&window), config.infer_window_len);
    let classifier = EnergyClassifier::default();
    let mut gate = InferenceGate::new();

    let mut render_tick = tokio::time::interval(Duration::from_millis(config.render_period_ms));
    let mut infer_tick = tokio::time::interval(Duration::from_millis(config.infer_period_ms));
    let deadline = config
        .capture_seconds
        .map(|secs| tokio::time::Instant::now() + Duration::from_secs_f32(secs));

    info!("capture running; ctrl-c to stop");
    let mut link_lost: Option<String> = None;
    loop {
        let timeout = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = render_tick.tick() => {
                let session_start = session.session_start().unwrap_or(capture_origin);
                let snapshot = window.full_snapshot();
                let slice = pulse.slice_since(session_start);
                let aligned = align(&snapshot, &slice, session_start, config.sample_rate_hz);
                render_line(&aligned, gate.latest_label());
            }
            _ = infer_tick.tick(), if config.inference_enabled => {
                gate.maybe_infer(&extractor, &classifier);
            }
            event = events.recv() => {
                match event {
                    Some(SessionEvent::Streaming) => info!("streaming started"),
                    Some(SessionEvent::Stopped) | None => {
                        info!("session ended");
                        break;
                    }
                    Some(SessionEvent::LinkLost { reason }) => {
                        // Terminal for this session; captured data stays
                        // readable for the summary below.
                        warn!("link lost: {reason}");
                        link_lost = Some(reason);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; stopping capture");
                break;
            }
            _ = timeout => {
                info!("capture window elapsed");
                break;
            }
        }
    }

    session.stop().await;
    if let Some(reader) = pulse_reader.as_mut() {
        reader.stop();
    }

    info!("link: {}", session.stats().summary());
    if let Some(reader) = &pulse_reader {
        info!(
            "pulse: {} lines, {} skips",
            reader
                .stats()
                .lines
                .load(std::sync::atomic::Ordering::Relaxed),
            reader
                .stats()
                .skips
                .load(std::sync::atomic::Ordering::Relaxed),
        );
    }
    info!(
        "retained {} samples ({} total captured)",
        window.len(),
        window.total_appended()
    );
    if let Some(reason) = link_lost {
        return Err(capture::CaptureError::LinkLost { reason }.into());
    }
    Ok(())
}

/// One consumer-cadence status line. An attached plot frontend would pull
/// the same aligned snapshot; this binary just reports it.
fn render_line(aligned: &capture::AlignedSnapshot, label: Option<capture::MotionLabel>) {
    if aligned.samples.is_empty() {
        return;
    }
    let newest = aligned.samples[aligned.samples.len() - 1];
    let pulse = aligned
        .pulse
        .last()
        .map(|e| format!("{:.0}", e.value))
        .unwrap_or_else(|| "-".into());
    let label = label
        .map(|l| l.to_string())
        .unwrap_or_else(|| "N/A".into());
    info!(
        "t+{:6.2}s  x {:+.2}g  y {:+.2}g  z {:+.2}g  pulse {}  motion {}",
        aligned.span_seconds(),
        newest.x,
        newest.y,
        newest.z,
        pulse,
        label
    );
}
