pub mod chain;
pub mod config;
pub mod context;
#[cfg(feature = "decode")]
pub mod decode;
pub mod dsp;
pub mod error;
pub mod graph;
pub mod source;

use wasm_bindgen::prelude::*;

use crate::chain::{AudioChain, ControlEvent};
use crate::config::ChainConfig;
use crate::dsp::impulse::{ImpulseGenerator, ImpulseParameters};
use crate::error::SourceError;
use crate::graph::BranchId;
use crate::source::{DropItem, MediaStream};

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the audiochain-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// WASM-exposed: filter a drop event's item list down to the audio files
/// worth decoding.
#[wasm_bindgen]
pub fn filter_audio_items(items: JsValue) -> Result<JsValue, JsValue> {
    let items: Vec<DropItem> =
        serde_wasm_bindgen::from_value(items).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    let kept = source::audio_items(&items);
    serde_wasm_bindgen::to_value(&kept).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: synthesize one impulse response and return it as
/// interleaved stereo samples, for hosts that only want the kernel.
#[wasm_bindgen]
pub fn generate_impulse(params: JsValue, sample_rate: u32) -> Result<Vec<f32>, JsValue> {
    let params: ImpulseParameters = if params.is_null() || params.is_undefined() {
        ImpulseParameters::default()
    } else {
        serde_wasm_bindgen::from_value(params).map_err(|e| JsValue::from_str(&format!("{e}")))?
    };
    let mut generator = ImpulseGenerator::new();
    Ok(generator.generate(&params, sample_rate).interleaved())
}

/// WASM-exposed: a whole demo session. The host constructs it with a JSON
/// config (or nothing for the stock demo), forwards UI events and media
/// callbacks into it, ticks it from `performance.now()`, and pulls
/// rendered audio and spectrum frames back out.
#[wasm_bindgen]
pub struct WasmAudioChain {
    inner: AudioChain,
}

#[wasm_bindgen]
impl WasmAudioChain {
    /// Build a session from a config object. Null or undefined gets the
    /// stock demo config.
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<WasmAudioChain, JsValue> {
        let config: ChainConfig = if config.is_null() || config.is_undefined() {
            ChainConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config)
                .map_err(|e| JsValue::from_str(&format!("{e}")))?
        };
        Ok(WasmAudioChain {
            inner: AudioChain::new(config),
        })
    }

    /// Apply one UI event, passed as a `{type: ...}` tagged object.
    /// Structural errors (unknown branch, closed session) throw.
    pub fn dispatch(&mut self, event: JsValue) -> Result<(), JsValue> {
        let event: ControlEvent = serde_wasm_bindgen::from_value(event)
            .map_err(|e| JsValue::from_str(&format!("{e}")))?;
        self.inner
            .dispatch(event)
            .map_err(|e| JsValue::from_str(&format!("{e}")))
    }

    /// Advance session time in milliseconds and run whatever fell due.
    pub fn tick(&mut self, now_ms: f64) -> Result<(), JsValue> {
        self.inner
            .tick(now_ms.max(0.0) as u64)
            .map_err(|e| JsValue::from_str(&format!("{e}")))
    }

    /// Render interleaved stereo samples for AudioWorklet playback.
    pub fn render(&mut self, frames: usize) -> Result<Vec<f32>, JsValue> {
        self.inner
            .render(frames)
            .map_err(|e| JsValue::from_str(&format!("{e}")))
    }

    /// Decode chosen file bytes into the media element. Returns false and
    /// raises the decode alert when the data is not playable audio.
    #[cfg(feature = "decode")]
    pub fn choose_file(&mut self, name: &str, bytes: &[u8]) -> Result<bool, JsValue> {
        self.inner
            .choose_file(name, bytes)
            .map_err(|e| JsValue::from_str(&format!("{e}")))
    }

    /// Media element readiness callback. Returns whether this event was
    /// the one that wired the source in.
    pub fn media_can_play(&mut self) -> Result<bool, JsValue> {
        self.inner
            .media_can_play()
            .map_err(|e| JsValue::from_str(&format!("{e}")))
    }

    /// getUserMedia success callback.
    pub fn microphone_granted(&mut self, label: &str) -> Result<bool, JsValue> {
        self.inner
            .stream_granted(MediaStream::new(label))
            .map_err(|e| JsValue::from_str(&format!("{e}")))
    }

    /// getUserMedia failure callback. The session stays as it was.
    pub fn microphone_denied(&mut self, reason: &str) {
        self.inner.stream_denied(&SourceError::PermissionDenied {
            reason: reason.to_string(),
        });
    }

    /// Queue captured microphone samples for the next rendered blocks.
    pub fn push_stream_samples(&mut self, samples: &[f32]) {
        self.inner.push_stream_samples(samples);
    }

    /// Decode audio bytes and install them as a branch's impulse kernel.
    #[cfg(feature = "decode")]
    pub fn load_impulse_file(&mut self, branch: u32, bytes: &[u8]) -> Result<bool, JsValue> {
        self.inner
            .load_impulse_file(BranchId::from_raw(branch), bytes)
            .map_err(|e| JsValue::from_str(&format!("{e}")))
    }

    /// The most recent spectrum frame, empty before the first poll.
    pub fn analyser_frame(&self) -> Vec<u8> {
        self.inner.analyser_frame().to_vec()
    }

    /// Convolver branch handles in creation order, for wiring UI controls.
    pub fn branch_ids(&self) -> Vec<u32> {
        self.inner.branch_ids().iter().map(|b| b.raw()).collect()
    }

    pub fn source_alert(&self) -> Option<String> {
        self.inner.source_alert().map(str::to_string)
    }

    pub fn decode_alert(&self) -> Option<String> {
        self.inner.decode_alert().map(str::to_string)
    }

    /// Tear the session down. Idempotent.
    pub fn close(&mut self) {
        self.inner.close();
    }
}
