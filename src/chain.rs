//! The chain session - a configured graph plus the event handling that
//! drives it.
//!
//! Everything here is single threaded and event driven: the host calls in
//! with UI events, readiness callbacks, and a periodic `tick`, and the
//! session recomputes whatever the accumulated state says is due. The only
//! asynchronous operation is microphone acquisition, which resolves
//! exactly once into `stream_granted` or `stream_denied`.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::{AnalyserOptions, BranchConfig, ChainConfig, UpdateInterval};
use crate::context::AudioContext;
use crate::dsp::analyser::FftSize;
use crate::dsp::buffer::SampleBuffer;
use crate::dsp::impulse::{ImpulseGenerator, ImpulseParameters};
use crate::error::{GraphError, SourceError};
use crate::graph::{AudioGraph, BranchId, BranchKind, NodeId, PowerState};
use crate::source::{MediaDevices, MediaElement, MediaStream};

/// Session-side record of one convolver branch: the staged parameters the
/// sliders read, and the pending debounce deadline if any.
struct BranchState {
    id: BranchId,
    label: String,
    params: ImpulseParameters,
    deadline: Option<u64>,
}

/// The repeating spectrum poll. Replaced whole when the cadence changes.
struct PollTimer {
    interval: UpdateInterval,
    next_due: u64,
}

/// A full demo session over one audio graph.
pub struct AudioChain {
    config: ChainConfig,
    context: AudioContext,
    graph: AudioGraph,
    branches: Vec<BranchState>,
    element: MediaElement,
    element_node: NodeId,
    stream: Option<MediaStream>,
    stream_node: NodeId,
    analyser_branch: Option<BranchId>,
    poll: Option<PollTimer>,
    last_frame: Vec<u8>,
    poll_count: u64,
    source_alert: Option<String>,
    decode_alert: Option<String>,
    now_ms: u64,
}

impl AudioChain {
    pub fn new(config: ChainConfig) -> Self {
        Self::with_generator(config, ImpulseGenerator::new())
    }

    pub fn with_generator(config: ChainConfig, generator: ImpulseGenerator) -> Self {
        let context = match config.sample_rate {
            Some(rate) => AudioContext::new(rate),
            None => AudioContext::default(),
        };
        let mut graph = AudioGraph::with_generator(&context, generator);
        let element_node = graph.add_source();
        let stream_node = graph.add_source();

        let mut chain = AudioChain {
            config,
            context,
            graph,
            branches: Vec::new(),
            element: MediaElement::new(),
            element_node,
            stream: None,
            stream_node,
            analyser_branch: None,
            poll: None,
            last_frame: Vec::new(),
            poll_count: 0,
            source_alert: None,
            decode_alert: None,
            now_ms: 0,
        };
        chain.bootstrap();
        chain
    }

    fn bootstrap(&mut self) {
        for cfg in self.config.branches.clone() {
            match build_branch(&mut self.graph, &cfg) {
                Ok(id) => self.branches.push(BranchState {
                    id,
                    label: cfg.label,
                    params: cfg.impulse,
                    deadline: None,
                }),
                Err(e) => warn!("failed to build branch {:?}: {e}", cfg.label),
            }
        }
        if let Some(options) = self.config.analyser {
            match build_analyser(&mut self.graph, &options) {
                Ok(id) => {
                    self.analyser_branch = Some(id);
                    self.poll = Some(PollTimer {
                        interval: options.update_interval,
                        next_due: options.update_interval.millis(),
                    });
                }
                Err(e) => warn!("failed to build analyser tap: {e}"),
            }
        }
        debug!(
            "chain ready: {} branch(es), analyser {}, {} Hz",
            self.branches.len(),
            if self.analyser_branch.is_some() { "on" } else { "off" },
            self.context.sample_rate()
        );
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn context(&self) -> &AudioContext {
        &self.context
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    pub fn branch_ids(&self) -> Vec<BranchId> {
        self.branches.iter().map(|b| b.id).collect()
    }

    pub fn find_branch(&self, label: &str) -> Option<BranchId> {
        self.branches.iter().find(|b| b.label == label).map(|b| b.id)
    }

    pub fn analyser_branch_id(&self) -> Option<BranchId> {
        self.analyser_branch
    }

    /// The parameters the sliders currently read, including staged changes
    /// that have not recomputed yet.
    pub fn branch_params(&self, branch: BranchId) -> Result<ImpulseParameters, GraphError> {
        self.branches
            .iter()
            .find(|b| b.id == branch)
            .map(|b| b.params)
            .ok_or(GraphError::UnknownBranch { branch })
    }

    pub fn recompute_count(&self, branch: BranchId) -> Result<u64, GraphError> {
        self.graph.recompute_count(branch)
    }

    pub fn power_state(&self, branch: BranchId) -> Result<PowerState, GraphError> {
        self.graph.power_state(branch)
    }

    pub fn element(&self) -> &MediaElement {
        &self.element
    }

    pub fn element_mut(&mut self) -> &mut MediaElement {
        &mut self.element
    }

    pub fn source_alert(&self) -> Option<&str> {
        self.source_alert.as_deref()
    }

    pub fn decode_alert(&self) -> Option<&str> {
        self.decode_alert.as_deref()
    }

    /// The most recent spectrum frame, empty before the first poll.
    pub fn analyser_frame(&self) -> &[u8] {
        &self.last_frame
    }

    pub fn poll_count(&self) -> u64 {
        self.poll_count
    }

    // ── File source ──────────────────────────────────────────────────────

    /// Decode chosen file bytes and load them into the media element. A
    /// decode failure raises the decode alert and leaves the element
    /// untouched; the previous file keeps playing.
    #[cfg(feature = "decode")]
    pub fn choose_file(&mut self, name: &str, bytes: &[u8]) -> Result<bool, GraphError> {
        self.context.ensure_running("choose file")?;
        match crate::decode::decode_audio_data(bytes) {
            Ok(buffer) => {
                self.choose_decoded(name, buffer)?;
                Ok(true)
            }
            Err(e) => {
                warn!("decode failed for {name:?}: {e}");
                self.decode_alert = Some(e.to_string());
                Ok(false)
            }
        }
    }

    /// Load already-decoded audio into the media element, resampled to the
    /// graph rate.
    pub fn choose_decoded(&mut self, name: &str, buffer: SampleBuffer) -> Result<(), GraphError> {
        self.context.ensure_running("choose file")?;
        let resampled = buffer.resampled_to(self.context.sample_rate());
        self.element.set_file(name, resampled);
        self.decode_alert = None;
        Ok(())
    }

    /// Handle the element's readiness event. Readiness fires repeatedly;
    /// only the first event per loaded file wires the source in. Returns
    /// whether wiring happened.
    pub fn media_can_play(&mut self) -> Result<bool, GraphError> {
        self.context.ensure_running("bind file source")?;
        if !self.element.bind_once() {
            return Ok(false);
        }
        debug!("binding file source into the graph");
        self.fan_out(self.element_node)?;
        Ok(true)
    }

    // ── Stream source ────────────────────────────────────────────────────

    /// Ask the device layer for a microphone stream and bind the outcome.
    /// Returns whether a new stream got wired in.
    pub fn request_microphone(
        &mut self,
        devices: &mut dyn MediaDevices,
    ) -> Result<bool, GraphError> {
        self.context.ensure_running("request microphone")?;
        match devices.request_audio_stream() {
            Ok(stream) => self.stream_granted(stream),
            Err(e) => {
                self.stream_denied(&e);
                Ok(false)
            }
        }
    }

    /// Adopt a granted stream. The first grant wires the stream source
    /// into the graph; later grants replace the sample feed and leave the
    /// wiring alone.
    pub fn stream_granted(&mut self, mut stream: MediaStream) -> Result<bool, GraphError> {
        self.context.ensure_running("bind stream source")?;
        self.source_alert = None;
        if self.stream.as_ref().is_some_and(|s| s.is_bound()) {
            stream.bind_once();
            self.stream = Some(stream);
            debug!("replacement stream granted; wiring unchanged");
            return Ok(false);
        }
        let first = stream.bind_once();
        self.stream = Some(stream);
        if first {
            debug!("binding stream source into the graph");
            self.fan_out(self.stream_node)?;
        }
        Ok(first)
    }

    /// Record a denied or failed acquisition. The graph stays exactly as
    /// it was; the user sees a source-unavailable alert.
    pub fn stream_denied(&mut self, error: &SourceError) {
        warn!("microphone unavailable: {error}");
        self.source_alert = Some(format!("Source unavailable: {error}"));
    }

    /// Queue captured samples onto the live stream, if one was granted.
    pub fn push_stream_samples(&mut self, samples: &[f32]) {
        if let Some(stream) = &mut self.stream {
            stream.push_samples(samples);
        }
    }

    /// Enable or disable the live stream's tracks. Muting the microphone
    /// this way never touches graph wiring.
    pub fn set_stream_enabled(&mut self, enabled: bool) {
        if let Some(stream) = &mut self.stream {
            stream.set_enabled(enabled);
        }
    }

    /// Wire a source to every branch input, plus the mix when input
    /// monitoring is on. The graph drops duplicate edges, so fanning out
    /// twice never doubles a signal path.
    fn fan_out(&mut self, source: NodeId) -> Result<(), GraphError> {
        let ids: Vec<BranchId> = self.branches.iter().map(|b| b.id).collect();
        for id in ids {
            if let Some(input) = self.graph.branch_input(id)? {
                self.graph.connect(source, input)?;
            }
        }
        if self.config.monitor_input {
            self.graph.connect(source, self.graph.mix_node())?;
        }
        Ok(())
    }

    // ── Impulse and gain controls ────────────────────────────────────────

    pub fn set_duration(&mut self, branch: BranchId, duration: f64) -> Result<(), GraphError> {
        self.context.ensure_running("set impulse duration")?;
        self.stage_impulse(branch, |p| p.duration = duration)
    }

    pub fn set_decay(&mut self, branch: BranchId, decay: f64) -> Result<(), GraphError> {
        self.context.ensure_running("set impulse decay")?;
        self.stage_impulse(branch, |p| p.decay = decay)
    }

    pub fn set_reverse(&mut self, branch: BranchId, reverse: bool) -> Result<(), GraphError> {
        self.context.ensure_running("set impulse reverse")?;
        self.stage_impulse(branch, |p| p.reverse = reverse)
    }

    /// Stage a parameter change. With a debounce window the recompute is
    /// deferred, and every further change pushes the deadline out; with no
    /// window it applies inline.
    fn stage_impulse(
        &mut self,
        branch: BranchId,
        apply: impl FnOnce(&mut ImpulseParameters),
    ) -> Result<(), GraphError> {
        let debounce = self.config.impulse_debounce_ms;
        let now = self.now_ms;
        let params = {
            let state = self
                .branches
                .iter_mut()
                .find(|b| b.id == branch)
                .ok_or(GraphError::UnknownBranch { branch })?;
            apply(&mut state.params);
            if debounce > 0 {
                state.deadline = Some(now + debounce);
                debug!("impulse change staged for branch {branch:?}, due at {}ms", now + debounce);
                return Ok(());
            }
            state.deadline = None;
            state.params
        };
        self.graph.update_impulse(branch, &params)?;
        Ok(())
    }

    /// Set a branch's wet gain immediately. Returns the effective value
    /// after range clamping.
    pub fn set_gain(&mut self, branch: BranchId, value: f32) -> Result<f32, GraphError> {
        self.context.ensure_running("set gain")?;
        self.graph.set_gain(branch, value)
    }

    pub fn set_power(&mut self, branch: BranchId, on: bool) -> Result<PowerState, GraphError> {
        self.context.ensure_running("set power")?;
        self.graph.set_power(branch, on)
    }

    pub fn toggle_power(&mut self, branch: BranchId) -> Result<PowerState, GraphError> {
        self.context.ensure_running("toggle power")?;
        let current = self.graph.power_state(branch)?;
        self.graph.set_power(branch, current == PowerState::Disconnected)
    }

    /// Decode file bytes and install them as the branch's kernel. A decode
    /// failure raises the decode alert and leaves the kernel untouched.
    #[cfg(feature = "decode")]
    pub fn load_impulse_file(
        &mut self,
        branch: BranchId,
        bytes: &[u8],
    ) -> Result<bool, GraphError> {
        self.context.ensure_running("load impulse file")?;
        match crate::decode::decode_audio_data(bytes) {
            Ok(buffer) => {
                self.graph.load_impulse(branch, &buffer)?;
                self.decode_alert = None;
                Ok(true)
            }
            Err(e) => {
                warn!("impulse decode failed: {e}");
                self.decode_alert = Some(e.to_string());
                Ok(false)
            }
        }
    }

    pub fn load_impulse_decoded(
        &mut self,
        branch: BranchId,
        buffer: &SampleBuffer,
    ) -> Result<(), GraphError> {
        self.context.ensure_running("load impulse")?;
        self.graph.load_impulse(branch, buffer)
    }

    // ── Analyser controls ────────────────────────────────────────────────

    fn require_analyser(&self) -> Result<BranchId, GraphError> {
        self.analyser_branch.ok_or(GraphError::AnalyserDisabled)
    }

    /// Resize the analyser window. Effective at the next poll.
    pub fn set_fft_size(&mut self, fft_size: FftSize) -> Result<(), GraphError> {
        self.context.ensure_running("set fft size")?;
        let branch = self.require_analyser()?;
        self.graph.analyser_mut(branch)?.set_fft_size(fft_size);
        Ok(())
    }

    /// Set the smoothing time constant, clamped to [0, 1]. Effective at
    /// the next poll.
    pub fn set_smoothing(&mut self, smoothing: f32) -> Result<f32, GraphError> {
        self.context.ensure_running("set smoothing")?;
        let branch = self.require_analyser()?;
        Ok(self.graph.analyser_mut(branch)?.set_smoothing(smoothing))
    }

    /// Change the poll cadence. The running timer is replaced outright,
    /// never stacked, and the new interval counts from now.
    pub fn set_update_interval(&mut self, interval: UpdateInterval) -> Result<(), GraphError> {
        self.context.ensure_running("set update interval")?;
        self.require_analyser()?;
        self.poll = Some(PollTimer {
            interval,
            next_due: self.now_ms + interval.millis(),
        });
        debug!("spectrum poll interval -> {}ms", interval.millis());
        Ok(())
    }

    // ── Time ─────────────────────────────────────────────────────────────

    /// Advance session time and run whatever fell due: debounced kernel
    /// recomputes first, then the spectrum poll. A poll against a powered
    /// off tap is skipped but keeps its schedule.
    pub fn tick(&mut self, now_ms: u64) -> Result<(), GraphError> {
        self.context.ensure_running("tick")?;
        self.now_ms = self.now_ms.max(now_ms);
        let now = self.now_ms;

        let due: Vec<(BranchId, ImpulseParameters)> = self
            .branches
            .iter_mut()
            .filter(|b| b.deadline.is_some_and(|d| d <= now))
            .map(|b| {
                b.deadline = None;
                (b.id, b.params)
            })
            .collect();
        for (id, params) in due {
            self.graph.update_impulse(id, &params)?;
        }

        if let (Some(branch), Some(poll)) = (self.analyser_branch, &mut self.poll) {
            if now >= poll.next_due {
                poll.next_due = now + poll.interval.millis();
                if self.graph.power_state(branch)? == PowerState::Connected {
                    self.last_frame = self.graph.analyser_mut(branch)?.byte_frequency_data();
                    self.poll_count += 1;
                }
            }
        }
        Ok(())
    }

    /// Render `frames` frames of output as interleaved stereo. Sources are
    /// pulled a quantum at a time and fed through the graph.
    pub fn render(&mut self, frames: usize) -> Result<Vec<f32>, GraphError> {
        self.context.ensure_running("render")?;
        let block = self.graph.block_size();
        let mut left = vec![0.0f32; block];
        let mut right = vec![0.0f32; block];
        let mut out = Vec::with_capacity(frames.div_ceil(block) * block * 2);
        for _ in 0..frames.div_ceil(block) {
            self.graph.begin_block();
            self.element.next_block(&mut left, &mut right);
            self.graph.feed_source(self.element_node, &left, &right)?;
            if let Some(stream) = &mut self.stream {
                stream.next_block(&mut left, &mut right);
                self.graph.feed_source(self.stream_node, &left, &right)?;
            }
            self.graph.process_block();
            let (l, r) = self.graph.destination_block();
            for i in 0..block {
                out.push(l[i]);
                out.push(r[i]);
            }
        }
        out.truncate(frames * 2);
        Ok(out)
    }

    /// Tear the session down. Idempotent; every later operation fails with
    /// a closed-context error.
    pub fn close(&mut self) {
        self.poll = None;
        self.context.close();
    }

    /// Apply one host event.
    pub fn dispatch(&mut self, event: ControlEvent) -> Result<(), GraphError> {
        match event {
            ControlEvent::DurationChanged { branch, value } => self.set_duration(branch, value),
            ControlEvent::DecayChanged { branch, value } => self.set_decay(branch, value),
            ControlEvent::ReverseChanged { branch, value } => self.set_reverse(branch, value),
            ControlEvent::GainChanged { branch, value } => {
                self.set_gain(branch, value).map(|_| ())
            }
            ControlEvent::PowerToggled { branch } => self.toggle_power(branch).map(|_| ()),
            ControlEvent::FftSizeChanged { value } => self.set_fft_size(value),
            ControlEvent::UpdateIntervalChanged { value } => self.set_update_interval(value),
            ControlEvent::SmoothingChanged { value } => self.set_smoothing(value).map(|_| ()),
            ControlEvent::MediaCanPlay => self.media_can_play().map(|_| ()),
            ControlEvent::PlaybackToggled => {
                self.element.toggle_play();
                Ok(())
            }
            ControlEvent::LoopChanged { value } => {
                self.element.set_loop(value);
                Ok(())
            }
            ControlEvent::MutedChanged { value } => {
                self.element.set_muted(value);
                Ok(())
            }
            ControlEvent::StreamEnabledChanged { value } => {
                self.set_stream_enabled(value);
                Ok(())
            }
            ControlEvent::SeekTo { seconds } => {
                self.element.seek(seconds);
                Ok(())
            }
            ControlEvent::StreamDenied { reason } => {
                self.stream_denied(&SourceError::PermissionDenied { reason });
                Ok(())
            }
        }
    }
}

fn build_branch(graph: &mut AudioGraph, cfg: &BranchConfig) -> Result<BranchId, GraphError> {
    let id = graph.create_branch(BranchKind::Convolver, graph.mix_node())?;
    graph.set_normalize(id, cfg.normalize)?;
    graph.set_gain_range(id, cfg.gain.min, cfg.gain.max)?;
    graph.set_gain(id, cfg.gain.initial)?;
    graph.update_impulse(id, &cfg.impulse)?;
    graph.set_power(id, cfg.power_on)?;
    Ok(id)
}

fn build_analyser(graph: &mut AudioGraph, options: &AnalyserOptions) -> Result<BranchId, GraphError> {
    let id = graph.create_branch(BranchKind::AnalyserTap, graph.mix_node())?;
    {
        let analyser = graph.analyser_mut(id)?;
        analyser.set_fft_size(options.fft_size);
        analyser.set_smoothing(options.smoothing);
    }
    graph.set_power(id, true)?;
    Ok(id)
}

/// One UI event from the host page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlEvent {
    DurationChanged { branch: BranchId, value: f64 },
    DecayChanged { branch: BranchId, value: f64 },
    ReverseChanged { branch: BranchId, value: bool },
    GainChanged { branch: BranchId, value: f32 },
    PowerToggled { branch: BranchId },
    FftSizeChanged { value: FftSize },
    UpdateIntervalChanged { value: UpdateInterval },
    SmoothingChanged { value: f32 },
    MediaCanPlay,
    PlaybackToggled,
    LoopChanged { value: bool },
    MutedChanged { value: bool },
    StreamEnabledChanged { value: bool },
    SeekTo { seconds: f64 },
    StreamDenied { reason: String },
}
