//! Serial reader for the pulse sensor.
//!
//! The sensor prints one reading per line. Depending on firmware build
//! that is either a bare integer or a `a,b,signal` CSV triple with the
//! signal in the third field; both shapes are accepted. Lines are stamped
//! with the arrival wall-clock time, which is what the aligner works
//! with. Malformed lines and read timeouts are skipped and counted.

use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};

use crate::capture::pulse::{epoch_secs_now, PulseStream};
use crate::capture::CaptureError;
use crate::config::SerialPulseConfig;

#[derive(Default)]
pub struct SerialStats {
    pub lines: AtomicU64,
    pub skips: AtomicU64,
}

/// Parses one serial line into a pulse value, or `None` for anything
/// malformed.
pub fn parse_pulse_line(line: &str) -> Option<f32> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Ok(value) = line.parse::<u32>() {
        return Some(value as f32);
    }
    let mut fields = line.split(',');
    if let (Some(_), Some(_), Some(signal), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    {
        return signal.trim().parse::<u32>().ok().map(|v| v as f32);
    }
    None
}

/// Handle to the running reader thread.
pub struct PulseReader {
    stop: Arc<AtomicBool>,
    stats: Arc<SerialStats>,
    thread: Option<JoinHandle<()>>,
}

impl PulseReader {
    /// Opens the configured port and starts the reader thread, which
    /// pushes `(now, value)` events into `stream` until stopped.
    pub fn spawn(
        config: &SerialPulseConfig,
        stream: Arc<PulseStream>,
    ) -> Result<Self, CaptureError> {
        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(Duration::from_secs(1))
            .open()
            .map_err(|err| {
                CaptureError::InvalidConfig(format!(
                    "cannot open serial port {}: {err}",
                    config.port
                ))
            })?;
        info!("pulse serial open on {} @ {}", config.port, config.baud_rate);

        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(SerialStats::default());
        let thread = {
            let stop = Arc::clone(&stop);
            let stats = Arc::clone(&stats);
            std::thread::spawn(move || {
                let mut reader = BufReader::new(port);
                let mut line = String::new();
                while !stop.load(Ordering::SeqCst) {
                    line.clear();
                    match reader.read_line(&mut line) {
                        Ok(0) => {
                            warn!("pulse serial port closed");
                            break;
                        }
                        Ok(_) => match parse_pulse_line(&line) {
                            Some(value) => {
                                stats.lines.fetch_add(1, Ordering::Relaxed);
                                stream.push(epoch_secs_now(), value);
                            }
                            None => {
                                stats.skips.fetch_add(1, Ordering::Relaxed);
                            }
                        },
                        // Timeouts just mean the sensor is quiet; other
                        // read errors are skips, never session failures.
                        Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {}
                        Err(err) => {
                            debug!("pulse serial read error: {err}");
                            stats.skips.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        };

        Ok(Self {
            stop,
            stats,
            thread: Some(thread),
        })
    }

    pub fn stats(&self) -> &SerialStats {
        &self.stats
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PulseReader {
    fn drop(&mut self) {
        self.stop();
    }
}
