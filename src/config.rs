//! Session configuration - one parameterized description of the whole
//! chain, deserialized from the host page at startup.

use serde::{Deserialize, Serialize};

use crate::dsp::analyser::{FftSize, DEFAULT_SMOOTHING};
use crate::dsp::impulse::ImpulseParameters;

/// Declared range for a branch's wet gain. Values pushed outside the
/// range clamp to it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GainRange {
    pub min: f32,
    pub max: f32,
    pub initial: f32,
}

impl Default for GainRange {
    fn default() -> Self {
        GainRange {
            min: 0.0,
            max: 1.0,
            initial: 0.5,
        }
    }
}

/// Configuration for one convolver branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BranchConfig {
    pub label: String,
    pub impulse: ImpulseParameters,
    pub gain: GainRange,
    /// Whether the branch starts with its designated edge connected.
    pub power_on: bool,
    /// Whether synthesized and loaded kernels get RMS normalization.
    pub normalize: bool,
}

impl Default for BranchConfig {
    fn default() -> Self {
        BranchConfig {
            label: "reverb".to_string(),
            impulse: ImpulseParameters::default(),
            gain: GainRange::default(),
            power_on: true,
            normalize: true,
        }
    }
}

/// Spectrum poll cadences the host page offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum UpdateInterval {
    Ms50,
    Ms100,
    Ms200,
    Ms500,
    Ms1000,
}

impl UpdateInterval {
    pub fn millis(self) -> u64 {
        match self {
            UpdateInterval::Ms50 => 50,
            UpdateInterval::Ms100 => 100,
            UpdateInterval::Ms200 => 200,
            UpdateInterval::Ms500 => 500,
            UpdateInterval::Ms1000 => 1000,
        }
    }
}

impl Default for UpdateInterval {
    fn default() -> Self {
        UpdateInterval::Ms100
    }
}

impl TryFrom<u64> for UpdateInterval {
    type Error = String;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            50 => Ok(UpdateInterval::Ms50),
            100 => Ok(UpdateInterval::Ms100),
            200 => Ok(UpdateInterval::Ms200),
            500 => Ok(UpdateInterval::Ms500),
            1000 => Ok(UpdateInterval::Ms1000),
            other => Err(format!(
                "unsupported update interval: {other} ms (expected 50, 100, 200, 500, or 1000)"
            )),
        }
    }
}

impl From<UpdateInterval> for u64 {
    fn from(interval: UpdateInterval) -> u64 {
        interval.millis()
    }
}

/// Analyser tap settings. Changes during a session take effect at the
/// next scheduled poll.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalyserOptions {
    pub fft_size: FftSize,
    pub update_interval: UpdateInterval,
    pub smoothing: f32,
}

impl Default for AnalyserOptions {
    fn default() -> Self {
        AnalyserOptions {
            fft_size: FftSize::default(),
            update_interval: UpdateInterval::default(),
            smoothing: DEFAULT_SMOOTHING,
        }
    }
}

/// Top-level session configuration. An empty object is a valid config and
/// produces the stock demo: one convolver branch, an analyser tap, and the
/// dry input monitored at the mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChainConfig {
    pub branches: Vec<BranchConfig>,
    /// Analyser tap settings; `None` builds a session without one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyser: Option<AnalyserOptions>,
    /// Wire the dry input straight to the mix alongside the branches.
    pub monitor_input: bool,
    /// Quiet period before slider movements recompute a kernel. Zero
    /// applies every change inline.
    pub impulse_debounce_ms: u64,
    /// Graph sample rate override; `None` uses the context default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            branches: vec![BranchConfig::default()],
            analyser: Some(AnalyserOptions::default()),
            monitor_input: true,
            impulse_debounce_ms: 250,
            sample_rate: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_the_stock_demo() {
        let config: ChainConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ChainConfig::default());
        assert_eq!(config.branches.len(), 1);
        assert!(config.analyser.is_some());
        assert!(config.monitor_input);
        assert_eq!(config.impulse_debounce_ms, 250);
    }

    #[test]
    fn keys_are_camel_case() {
        let json = serde_json::to_string(&ChainConfig::default()).unwrap();
        assert!(json.contains("\"monitorInput\""));
        assert!(json.contains("\"impulseDebounceMs\""));
        assert!(json.contains("\"fftSize\""));
        assert!(json.contains("\"updateInterval\""));
        assert!(json.contains("\"powerOn\""));
    }

    #[test]
    fn config_round_trips() {
        let config = ChainConfig {
            branches: vec![
                BranchConfig {
                    label: "hall".to_string(),
                    impulse: ImpulseParameters {
                        duration: 1.5,
                        decay: 4.0,
                        reverse: true,
                    },
                    gain: GainRange {
                        min: 0.0,
                        max: 2.0,
                        initial: 1.0,
                    },
                    power_on: false,
                    normalize: false,
                },
                BranchConfig::default(),
            ],
            analyser: Some(AnalyserOptions {
                fft_size: FftSize::Size512,
                update_interval: UpdateInterval::Ms200,
                smoothing: 0.6,
            }),
            monitor_input: false,
            impulse_debounce_ms: 0,
            sample_rate: Some(48000),
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: ChainConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn partial_branch_fills_in_defaults() {
        let config: ChainConfig =
            serde_json::from_str(r#"{"branches": [{"label": "plate", "powerOn": false}]}"#)
                .unwrap();
        assert_eq!(config.branches.len(), 1);
        assert_eq!(config.branches[0].label, "plate");
        assert!(!config.branches[0].power_on);
        assert_eq!(config.branches[0].impulse, ImpulseParameters::default());
    }

    #[test]
    fn fft_size_outside_the_supported_set_is_rejected() {
        let result: Result<AnalyserOptions, _> = serde_json::from_str(r#"{"fftSize": 48}"#);
        assert!(result.is_err());
        let ok: AnalyserOptions = serde_json::from_str(r#"{"fftSize": 256}"#).unwrap();
        assert_eq!(ok.fft_size, FftSize::Size256);
    }

    #[test]
    fn update_interval_outside_the_supported_set_is_rejected() {
        let result: Result<AnalyserOptions, _> =
            serde_json::from_str(r#"{"updateInterval": 75}"#);
        assert!(result.is_err());
        let ok: AnalyserOptions = serde_json::from_str(r#"{"updateInterval": 500}"#).unwrap();
        assert_eq!(ok.update_interval, UpdateInterval::Ms500);
    }

    #[test]
    fn analyser_can_be_disabled_explicitly() {
        let config: ChainConfig = serde_json::from_str(r#"{"analyser": null}"#).unwrap();
        assert!(config.analyser.is_none());
    }
}
