//! BLE link lifecycle: scan, connect, subscribe, stream, teardown.
//!
//! The session is the sole producer into the sample window. Its
//! notification task does bounded work only (decode, scale, append) and
//! reports lifecycle transitions over a status channel instead of
//! swallowing them at the callback site.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Manager, Peripheral};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

use crate::capture::frame::{decode_frames, trailing_len, ScaleConfig, FRAME_SIZE};
use crate::capture::pulse::epoch_secs_now;
use crate::capture::window::SampleWindow;
use crate::capture::CaptureError;
use crate::config::CaptureConfig;

/// Lifecycle of one capture session. `Disconnected` and `Failed` are
/// terminal; resuming capture means constructing a new session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Discovering,
    Connecting,
    Subscribed,
    Streaming,
    Disconnected,
    Failed,
}

/// Transitions reported to the session owner.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// First notification arrived; frames are flowing.
    Streaming,
    /// Session ended by request; buffers stay readable.
    Stopped,
    /// The transport dropped mid-stream.
    LinkLost { reason: String },
}

/// Best-effort capture counters, written from the notification path.
#[derive(Default)]
pub struct LinkStats {
    pub notifications: AtomicU64,
    pub frames: AtomicU64,
    pub decode_skips: AtomicU64,
}

impl LinkStats {
    pub fn summary(&self) -> String {
        format!(
            "{} notifications, {} frames, {} decode skips",
            self.notifications.load(Ordering::Relaxed),
            self.frames.load(Ordering::Relaxed),
            self.decode_skips.load(Ordering::Relaxed),
        )
    }
}

/// The producer path: one notification payload in, whole frames appended.
/// Never blocks beyond the window's append lock and never errors; a
/// trailing partial frame only bumps the skip counter.
pub fn ingest_notification(
    payload: &[u8],
    scale: &ScaleConfig,
    window: &SampleWindow,
    stats: &LinkStats,
) {
    let frames = decode_frames(payload);
    stats.notifications.fetch_add(1, Ordering::Relaxed);
    stats.frames.fetch_add(frames.len() as u64, Ordering::Relaxed);
    if trailing_len(payload) != 0 {
        stats.decode_skips.fetch_add(1, Ordering::Relaxed);
    }
    for frame in frames {
        window.append(frame.to_sample(scale));
    }
}

/// One active capture session against one physical device.
pub struct LinkSession {
    state: Arc<Mutex<LinkState>>,
    stats: Arc<LinkStats>,
    session_start: Arc<OnceLock<f64>>,
    stopping: Arc<AtomicBool>,
    transport: Option<BleTransport>,
    task: JoinHandle<()>,
}

struct BleTransport {
    peripheral: Peripheral,
    notify_char: Characteristic,
}

impl LinkSession {
    /// Discovers, connects and subscribes, then spawns the notification
    /// task. Fails with `DeviceNotFound` / `ConnectionError` /
    /// `CharacteristicNotFound`; there is no in-core retry.
    pub async fn open(
        config: &CaptureConfig,
        window: Arc<SampleWindow>,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), CaptureError> {
        let state = Arc::new(Mutex::new(LinkState::Discovering));
        let peripheral = discover(config).await?;

        set_state(&state, LinkState::Connecting);
        let name = peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .and_then(|p| p.local_name)
            .unwrap_or_else(|| "<unnamed>".into());
        info!("connecting to {} ({})", name, peripheral.address());
        let established = async {
            tokio::time::timeout(
                Duration::from_secs(config.connect_timeout_secs),
                peripheral.connect(),
            )
            .await
            .map_err(|_| CaptureError::ConnectionError {
                reason: format!("connect timed out after {} s", config.connect_timeout_secs),
            })?
            .map_err(CaptureError::connection)?;

            peripheral
                .discover_services()
                .await
                .map_err(CaptureError::connection)?;
            let notify_char = peripheral
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == config.notify_uuid)
                .ok_or(CaptureError::CharacteristicNotFound(config.notify_uuid))?;
            peripheral
                .subscribe(&notify_char)
                .await
                .map_err(CaptureError::connection)?;
            let stream = peripheral
                .notifications()
                .await
                .map_err(CaptureError::connection)?;
            Ok::<_, CaptureError>((notify_char, stream))
        };
        let (notify_char, stream) = match established.await {
            Ok(parts) => parts,
            Err(err) => {
                // Unrecoverable for this session instance. Release the
                // device so a rebuilt session can claim it.
                if let Err(err) = peripheral.disconnect().await {
                    debug!("disconnect after failed setup: {err}");
                }
                set_state(&state, LinkState::Failed);
                return Err(err);
            }
        };
        set_state(&state, LinkState::Subscribed);
        info!("subscribed to {}", notify_char.uuid);

        let stats = Arc::new(LinkStats::default());
        let session_start = Arc::new(OnceLock::new());
        let stopping = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = mpsc::channel(16);

        let task = {
            let state = Arc::clone(&state);
            let stats = Arc::clone(&stats);
            let session_start = Arc::clone(&session_start);
            let stopping = Arc::clone(&stopping);
            let scale = config.scale();
            let notify_uuid = config.notify_uuid;
            let mut stream = stream;
            tokio::spawn(async move {
                while let Some(notification) = stream.next().await {
                    if notification.uuid != notify_uuid {
                        continue;
                    }
                    if session_start.set(epoch_secs_now()).is_ok() {
                        set_state(&state, LinkState::Streaming);
                        let _ = event_tx.send(SessionEvent::Streaming).await;
                    }
                    debug!("notification: {} bytes", notification.value.len());
                    ingest_notification(&notification.value, &scale, &window, &stats);
                }
                // Stream end is either our own teardown or a dropped link.
                if stopping.load(Ordering::SeqCst) {
                    set_state(&state, LinkState::Disconnected);
                    let _ = event_tx.send(SessionEvent::Stopped).await;
                } else {
                    warn!("notification stream ended unexpectedly");
                    set_state(&state, LinkState::Disconnected);
                    let _ = event_tx
                        .send(SessionEvent::LinkLost {
                            reason: "notification stream ended".into(),
                        })
                        .await;
                }
            })
        };

        Ok((
            Self {
                state,
                stats,
                session_start,
                stopping,
                transport: Some(BleTransport {
                    peripheral,
                    notify_char,
                }),
                task,
            },
            event_rx,
        ))
    }

    /// Synthetic transport for running without hardware: a paced task
    /// pushes sine-plus-noise payloads through the same producer path.
    pub fn open_simulated(
        config: &CaptureConfig,
        window: Arc<SampleWindow>,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        use rand::{Rng, SeedableRng};

        let state = Arc::new(Mutex::new(LinkState::Subscribed));
        let stats = Arc::new(LinkStats::default());
        let session_start = Arc::new(OnceLock::new());
        let stopping = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = mpsc::channel(16);

        let task = {
            let state = Arc::clone(&state);
            let stats = Arc::clone(&stats);
            let session_start = Arc::clone(&session_start);
            let stopping = Arc::clone(&stopping);
            let scale = config.scale();
            let fs = config.sample_rate_hz;
            tokio::spawn(async move {
                let period = Duration::from_millis(100);
                let frames_per_tick = ((fs * period.as_secs_f32()).round() as usize).max(1);
                let full_scale = ((1i32 << (scale.resolution_bits - 1)) - 1) as f32;
                let mut ticker = tokio::time::interval(period);
                let mut phase = 0.0f32;
                let mut rng = rand::rngs::StdRng::from_entropy();
                loop {
                    ticker.tick().await;
                    if stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    if session_start.set(epoch_secs_now()).is_ok() {
                        set_state(&state, LinkState::Streaming);
                        let _ = event_tx.send(SessionEvent::Streaming).await;
                    }
                    let mut payload = Vec::with_capacity(frames_per_tick * FRAME_SIZE);
                    for _ in 0..frames_per_tick {
                        phase += 1.0 / fs;
                        let wobble = (phase * std::f32::consts::TAU).sin() * 0.05;
                        let mut jitter = || rng.gen_range(-0.01f32..0.01);
                        // Device at rest: gravity on z, a slight sway on x/y.
                        let raw = |g: f32| {
                            ((g / (2.0 * scale.gravity_ref)) * full_scale)
                                .clamp(-full_scale, full_scale) as i16
                        };
                        let (x, y, z) = (
                            raw(wobble + jitter()),
                            raw(-wobble + jitter()),
                            raw(scale.gravity_ref + jitter()),
                        );
                        payload.extend_from_slice(&x.to_le_bytes());
                        payload.extend_from_slice(&y.to_le_bytes());
                        payload.extend_from_slice(&z.to_le_bytes());
                    }
                    ingest_notification(&payload, &scale, &window, &stats);
                }
                set_state(&state, LinkState::Disconnected);
                let _ = event_tx.send(SessionEvent::Stopped).await;
            })
        };

        info!("simulated link active ({} Hz)", config.sample_rate_hz);
        (
            Self {
                state,
                stats,
                session_start,
                stopping,
                transport: None,
                task,
            },
            event_rx,
        )
    }

    pub fn state(&self) -> LinkState {
        *self.state.lock().expect("link state lock poisoned")
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Wall-clock time of the first streamed sample, once streaming.
    pub fn session_start(&self) -> Option<f64> {
        self.session_start.get().copied()
    }

    /// Unsubscribes and disconnects. Window contents are owned by the
    /// caller and stay readable; in-flight snapshot reads are unaffected.
    pub async fn stop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(transport) = self.transport.take() {
            if let Err(err) = transport.peripheral.unsubscribe(&transport.notify_char).await {
                debug!("unsubscribe during teardown: {err}");
            }
            if let Err(err) = transport.peripheral.disconnect().await {
                debug!("disconnect during teardown: {err}");
            }
        }
        set_state(&self.state, LinkState::Disconnected);
        self.task.abort();
    }
}

fn set_state(state: &Mutex<LinkState>, next: LinkState) {
    let mut state = state.lock().expect("link state lock poisoned");
    // Terminal states stay terminal.
    if !matches!(*state, LinkState::Disconnected | LinkState::Failed) {
        *state = next;
    }
}

/// Scans until the configured device shows up, by MAC address or
/// advertised name, or the scan timeout elapses.
async fn discover(config: &CaptureConfig) -> Result<Peripheral, CaptureError> {
    let manager = Manager::new().await.map_err(CaptureError::connection)?;
    let adapter = manager
        .adapters()
        .await
        .map_err(CaptureError::connection)?
        .into_iter()
        .next()
        .ok_or(CaptureError::NoAdapter)?;

    info!(
        "scanning for {} / \"{}\" (up to {} s)",
        config.device_address, config.device_name, config.scan_timeout_secs
    );
    adapter
        .start_scan(ScanFilter::default())
        .await
        .map_err(CaptureError::connection)?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(config.scan_timeout_secs);
    let wanted_address = config.device_address.to_ascii_uppercase();
    let found = 'scan: loop {
        for peripheral in adapter
            .peripherals()
            .await
            .map_err(CaptureError::connection)?
        {
            if peripheral.address().to_string().to_ascii_uppercase() == wanted_address {
                break 'scan Some(peripheral);
            }
            let name = peripheral
                .properties()
                .await
                .ok()
                .flatten()
                .and_then(|p| p.local_name);
            if name.as_deref() == Some(config.device_name.as_str()) {
                break 'scan Some(peripheral);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            break None;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    };

    let _ = adapter.stop_scan().await;
    found.ok_or(CaptureError::DeviceNotFound {
        timeout_secs: config.scan_timeout_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_window() -> Arc<SampleWindow> {
        Arc::new(SampleWindow::new(512).unwrap())
    }

    #[test]
    fn ingest_appends_whole_frames_and_counts_skips() {
        let window = test_window();
        let stats = LinkStats::default();
        let scale = ScaleConfig::default();

        // Two whole frames plus a 3-byte remainder.
        let mut payload = vec![0u8; 12];
        payload[0] = 0xFF;
        payload[1] = 0x1F; // x = 8191 in frame 0
        payload.extend_from_slice(&[1, 2, 3]);

        ingest_notification(&payload, &scale, &window, &stats);
        assert_eq!(window.len(), 2);
        assert_eq!(stats.frames.load(Ordering::Relaxed), 2);
        assert_eq!(stats.decode_skips.load(Ordering::Relaxed), 1);

        let snap = window.snapshot(2);
        // 0x1FFF = 8191 counts = full positive scale = 2 * gravity_ref.
        assert!((snap.samples[0].x - 19.6).abs() < 1e-3);
    }

    #[test]
    fn ingest_of_empty_payload_is_a_no_op_append() {
        let window = test_window();
        let stats = LinkStats::default();
        ingest_notification(&[], &ScaleConfig::default(), &window, &stats);
        assert!(window.is_empty());
        assert_eq!(stats.notifications.load(Ordering::Relaxed), 1);
        assert_eq!(stats.decode_skips.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn failed_setup_leaves_the_session_terminally_failed() {
        // Connect succeeded but a later setup step did not: the state
        // machine lands in Failed and no later transition revives it.
        let state = Mutex::new(LinkState::Connecting);
        set_state(&state, LinkState::Failed);
        assert_eq!(*state.lock().unwrap(), LinkState::Failed);
        set_state(&state, LinkState::Streaming);
        assert_eq!(*state.lock().unwrap(), LinkState::Failed);
    }

    #[tokio::test]
    async fn simulated_session_streams_and_stops_cleanly() {
        let config = CaptureConfig {
            simulate: true,
            ..Default::default()
        };
        let window = test_window();
        let (mut session, mut events) = LinkSession::open_simulated(&config, Arc::clone(&window));

        // First event must be the Streaming transition.
        match events.recv().await {
            Some(SessionEvent::Streaming) => {}
            other => panic!("expected Streaming, got {other:?}"),
        }
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(session.state(), LinkState::Streaming);
        assert!(window.total_appended() > 0);
        assert!(session.session_start().is_some());

        session.stop().await;
        assert_eq!(session.state(), LinkState::Disconnected);
        // Buffer contents survive teardown.
        assert!(window.len() > 0);
    }
}
