use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use uuid::Uuid;

use crate::capture::frame::ScaleConfig;

/// Everything the capture pipeline can be tuned with. Defaults match the
/// earworm firmware and the values the capture scripts were run with, so
/// an empty config file (or none at all) yields a working setup.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// BLE MAC address of the wearable.
    pub device_address: String,
    /// Advertised name, matched when the address does not (some adapters
    /// randomize addresses).
    pub device_name: String,
    /// Notify characteristic carrying accelerometer frames (Nordic UART TX).
    pub notify_uuid: Uuid,
    pub scan_timeout_secs: u64,
    pub connect_timeout_secs: u64,

    pub sample_rate_hz: f32,
    /// Trailing span kept for display, in seconds.
    pub window_seconds: f32,
    pub resolution_bits: u32,
    pub gravity_ref: f32,

    /// Samples per classifier window (must match the trained model).
    pub infer_window_len: usize,
    /// How often the inference gate is polled.
    pub infer_period_ms: u64,
    pub inference_enabled: bool,

    /// Consumer-side cadence for aligned snapshots.
    pub render_period_ms: u64,
    /// Stop after this many seconds; run until interrupted when unset.
    pub capture_seconds: Option<f32>,

    /// Feed synthetic frames instead of opening the BLE link.
    pub simulate: bool,

    /// Secondary pulse stream; absent means accelerometer only.
    pub serial_pulse: Option<SerialPulseConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialPulseConfig {
    pub port: String,
    pub baud_rate: u32,
    /// How much pulse history to retain, in seconds.
    pub retention_seconds: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_address: "EF:90:01:F7:43:EA".into(),
            device_name: "earworm_ble".into(),
            notify_uuid: Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e),
            scan_timeout_secs: 10,
            connect_timeout_secs: 10,
            sample_rate_hz: 50.0,
            window_seconds: 3.0,
            resolution_bits: 14,
            gravity_ref: 9.8,
            infer_window_len: 128,
            infer_period_ms: 500,
            inference_enabled: true,
            render_period_ms: 100,
            capture_seconds: None,
            simulate: false,
            serial_pulse: None,
        }
    }
}

impl Default for SerialPulseConfig {
    fn default() -> Self {
        Self {
            port: "COM3".into(),
            baud_rate: 9600,
            retention_seconds: 30.0,
        }
    }
}

impl CaptureConfig {
    /// Reads a JSON config file, or returns the defaults when no path is
    /// given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.sample_rate_hz > 0.0, "sample_rate_hz must be positive");
        anyhow::ensure!(self.window_seconds > 0.0, "window_seconds must be positive");
        anyhow::ensure!(
            ScaleConfig::RESOLUTION_RANGE.contains(&self.resolution_bits),
            "resolution_bits must be between {} and {}",
            ScaleConfig::RESOLUTION_RANGE.start(),
            ScaleConfig::RESOLUTION_RANGE.end()
        );
        anyhow::ensure!(self.infer_window_len > 0, "infer_window_len must be positive");
        if self.inference_enabled {
            anyhow::ensure!(
                self.infer_window_len <= self.window_capacity(),
                "infer_window_len ({}) cannot exceed the display window ({} samples)",
                self.infer_window_len,
                self.window_capacity()
            );
        }
        Ok(())
    }

    pub fn scale(&self) -> ScaleConfig {
        ScaleConfig {
            resolution_bits: self.resolution_bits,
            gravity_ref: self.gravity_ref,
        }
    }

    /// Display window capacity in samples.
    pub fn window_capacity(&self) -> usize {
        (self.sample_rate_hz * self.window_seconds).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_firmware_constants() {
        let config = CaptureConfig::default();
        assert_eq!(config.window_capacity(), 150);
        assert_eq!(config.resolution_bits, 14);
        assert!((config.scale().scale_factor() - 19.6 / 8191.0).abs() < 1e-9);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: CaptureConfig =
            serde_json::from_str(r#"{"sample_rate_hz": 100.0, "window_seconds": 2.0}"#).unwrap();
        assert_eq!(config.window_capacity(), 200);
        assert_eq!(config.device_name, "earworm_ble");
        assert!(config.serial_pulse.is_none());
    }

    #[test]
    fn serial_section_enables_the_pulse_stream() {
        let config: CaptureConfig = serde_json::from_str(
            r#"{"serial_pulse": {"port": "/dev/ttyUSB0", "baud_rate": 115200}}"#,
        )
        .unwrap();
        let pulse = config.serial_pulse.unwrap();
        assert_eq!(pulse.port, "/dev/ttyUSB0");
        assert_eq!(pulse.baud_rate, 115200);
        assert_eq!(pulse.retention_seconds, 30.0);
    }

    #[test]
    fn rejects_nonsense_rates() {
        let config = CaptureConfig {
            sample_rate_hz: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
