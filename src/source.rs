//! Input sources - decoded file playback, live stream input, and the
//! one-shot binding latch that keeps either from wiring into the graph
//! more than once.

use std::collections::VecDeque;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::dsp::buffer::SampleBuffer;
use crate::error::SourceError;

/// One-shot latch guarding source-to-graph wiring. Media readiness events
/// fire repeatedly; the latch makes sure only the first one binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindState {
    #[default]
    Unbound,
    Bound,
}

impl BindState {
    /// Transition to `Bound`. True only on the first call since the last
    /// reset.
    pub fn try_bind(&mut self) -> bool {
        match self {
            BindState::Unbound => {
                *self = BindState::Bound;
                true
            }
            BindState::Bound => false,
        }
    }

    pub fn reset(&mut self) {
        *self = BindState::Unbound;
    }

    pub fn is_bound(self) -> bool {
        matches!(self, BindState::Bound)
    }
}

/// Decoded-file playback state, standing in for the page's media element.
/// Holds the decoded samples and a play cursor; the graph pulls blocks
/// from it each quantum.
#[derive(Debug, Default)]
pub struct MediaElement {
    file_name: Option<String>,
    buffer: Option<SampleBuffer>,
    position: usize,
    playing: bool,
    loop_enabled: bool,
    muted: bool,
    bind: BindState,
}

impl MediaElement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a decoded file. Choosing a different file resets the bind
    /// latch so the new source wires up once; re-choosing the current file
    /// keeps the latch bound. Playback restarts paused from the top.
    pub fn set_file(&mut self, name: &str, buffer: SampleBuffer) {
        if self.file_name.as_deref() != Some(name) {
            self.bind.reset();
        }
        debug!("media element loaded {name:?}, {} frames", buffer.len());
        self.file_name = Some(name.to_string());
        self.buffer = Some(buffer);
        self.position = 0;
        self.playing = false;
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Whether the element has decoded audio ready, the precondition the
    /// readiness event reports.
    pub fn can_play(&self) -> bool {
        self.buffer.is_some()
    }

    /// Claim the bind latch. True exactly once per loaded file, however
    /// many times readiness fires.
    pub fn bind_once(&mut self) -> bool {
        self.can_play() && self.bind.try_bind()
    }

    pub fn is_bound(&self) -> bool {
        self.bind.is_bound()
    }

    pub fn play(&mut self) {
        if self.buffer.is_some() {
            self.playing = true;
        }
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    /// Flip play/pause; returns whether the element is now playing.
    pub fn toggle_play(&mut self) -> bool {
        if self.playing {
            self.pause();
        } else {
            self.play();
        }
        self.playing
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn set_loop(&mut self, loop_enabled: bool) {
        self.loop_enabled = loop_enabled;
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn duration(&self) -> f64 {
        self.buffer.as_ref().map_or(0.0, |b| b.duration())
    }

    pub fn position_seconds(&self) -> f64 {
        match &self.buffer {
            Some(b) => self.position as f64 / b.sample_rate() as f64,
            None => 0.0,
        }
    }

    pub fn seek(&mut self, seconds: f64) {
        if let Some(b) = &self.buffer {
            let frame = (seconds.max(0.0) * b.sample_rate() as f64).round() as usize;
            self.position = frame.min(b.len());
        }
    }

    /// Pull the next block of playback. While paused the block is silent
    /// and the cursor holds; while muted the cursor advances silently, the
    /// way a muted element keeps playing.
    pub fn next_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        left.fill(0.0);
        right.fill(0.0);
        let Some(buffer) = &self.buffer else {
            return;
        };
        if !self.playing || buffer.is_empty() {
            return;
        }
        for i in 0..left.len().min(right.len()) {
            if self.position >= buffer.len() {
                if self.loop_enabled {
                    self.position = 0;
                } else {
                    self.playing = false;
                    break;
                }
            }
            let (l, r) = buffer.frame(self.position);
            if !self.muted {
                left[i] = l;
                right[i] = r;
            }
            self.position += 1;
        }
    }
}

/// One audio track inside a captured stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub id: String,
    pub label: String,
    pub enabled: bool,
}

/// A granted live input stream. Samples arrive mono from the capture side
/// and fan out to both channels when pulled.
#[derive(Debug, Default)]
pub struct MediaStream {
    tracks: Vec<AudioTrack>,
    queue: VecDeque<f32>,
    bind: BindState,
}

impl MediaStream {
    pub fn new(label: &str) -> Self {
        MediaStream {
            tracks: vec![AudioTrack {
                id: "audio-0".to_string(),
                label: label.to_string(),
                enabled: true,
            }],
            queue: VecDeque::new(),
            bind: BindState::default(),
        }
    }

    pub fn tracks(&self) -> &[AudioTrack] {
        &self.tracks
    }

    /// Enable or disable every audio track.
    pub fn set_enabled(&mut self, enabled: bool) {
        for track in &mut self.tracks {
            track.enabled = enabled;
        }
    }

    /// Queue captured samples for the next blocks.
    pub fn push_samples(&mut self, samples: &[f32]) {
        self.queue.extend(samples.iter().copied());
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Claim the bind latch. True exactly once per granted stream.
    pub fn bind_once(&mut self) -> bool {
        self.bind.try_bind()
    }

    pub fn is_bound(&self) -> bool {
        self.bind.is_bound()
    }

    /// Pull the next block. Underruns pad with silence; a disabled stream
    /// keeps draining its queue silently so re-enabling resumes live.
    pub fn next_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        let enabled = self.tracks.iter().any(|t| t.enabled);
        for i in 0..left.len().min(right.len()) {
            let sample = self.queue.pop_front().unwrap_or(0.0);
            let sample = if enabled { sample } else { 0.0 };
            left[i] = sample;
            right[i] = sample;
        }
    }
}

/// Microphone acquisition seam. The browser's prompt resolves exactly once
/// per request; implementations mirror that by answering with a stream or
/// a denial.
pub trait MediaDevices {
    fn request_audio_stream(&mut self) -> Result<MediaStream, SourceError>;
}

/// What kind of payload a drag-and-drop item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DropItemKind {
    File,
    Text,
}

/// One item out of a drop event's transfer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropItem {
    pub kind: DropItemKind,
    pub mime: String,
    pub name: String,
}

/// Filter a drop list down to the audio files worth decoding: file items
/// whose MIME type is under `audio/`.
pub fn audio_items(items: &[DropItem]) -> Vec<&DropItem> {
    items
        .iter()
        .filter(|item| item.kind == DropItemKind::File && item.mime.starts_with("audio/"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(n: usize) -> SampleBuffer {
        SampleBuffer::mono((0..n).map(|i| (i % 10) as f32 / 10.0).collect(), 1000)
    }

    #[test]
    fn latch_binds_exactly_once() {
        let mut element = MediaElement::new();
        element.set_file("clip.mp3", tone(100));
        assert!(element.bind_once());
        assert!(!element.bind_once(), "second readiness must not rebind");
        assert!(!element.bind_once());
        assert!(element.is_bound());
    }

    #[test]
    fn unloaded_element_never_binds() {
        let mut element = MediaElement::new();
        assert!(!element.can_play());
        assert!(!element.bind_once());
    }

    #[test]
    fn new_file_resets_the_latch() {
        let mut element = MediaElement::new();
        element.set_file("first.mp3", tone(100));
        assert!(element.bind_once());
        element.set_file("second.mp3", tone(50));
        assert!(element.bind_once(), "a distinct file binds again");
    }

    #[test]
    fn same_file_keeps_the_latch() {
        let mut element = MediaElement::new();
        element.set_file("clip.mp3", tone(100));
        assert!(element.bind_once());
        element.set_file("clip.mp3", tone(100));
        assert!(!element.bind_once(), "re-choosing the same file must not rebind");
    }

    #[test]
    fn playback_advances_and_stops_at_the_end() {
        let mut element = MediaElement::new();
        element.set_file("clip.mp3", tone(96));
        element.play();
        let mut l = [0.0f32; 64];
        let mut r = [0.0f32; 64];
        element.next_block(&mut l, &mut r);
        assert!(element.is_playing());
        assert!((element.position_seconds() - 0.064).abs() < 1e-9);

        element.next_block(&mut l, &mut r);
        assert!(!element.is_playing(), "cursor past the end stops playback");
        assert_eq!(l[40], 0.0, "past-end samples are silent");
    }

    #[test]
    fn looping_wraps_the_cursor() {
        let mut element = MediaElement::new();
        element.set_file("clip.mp3", tone(40));
        element.set_loop(true);
        element.play();
        let mut l = [0.0f32; 64];
        let mut r = [0.0f32; 64];
        element.next_block(&mut l, &mut r);
        assert!(element.is_playing());
        assert_eq!(l[40], l[0], "loop restarts from the first frame");
        assert_eq!(l[41], l[1]);
        assert!(l[41] != 0.0);
    }

    #[test]
    fn pause_freezes_the_cursor() {
        let mut element = MediaElement::new();
        element.set_file("clip.mp3", tone(100));
        element.play();
        let mut l = [0.0f32; 32];
        let mut r = [0.0f32; 32];
        element.next_block(&mut l, &mut r);
        let at = element.position_seconds();
        element.pause();
        element.next_block(&mut l, &mut r);
        assert_eq!(element.position_seconds(), at);
        assert!(l.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn mute_silences_but_keeps_playing() {
        let mut element = MediaElement::new();
        element.set_file("clip.mp3", tone(100));
        element.play();
        element.set_muted(true);
        let mut l = [9.0f32; 32];
        let mut r = [9.0f32; 32];
        element.next_block(&mut l, &mut r);
        assert!(l.iter().all(|&s| s == 0.0));
        assert!(element.position_seconds() > 0.0, "muted playback still advances");
    }

    #[test]
    fn seek_clamps_into_the_clip() {
        let mut element = MediaElement::new();
        element.set_file("clip.mp3", tone(1000));
        element.seek(0.5);
        assert!((element.position_seconds() - 0.5).abs() < 1e-9);
        element.seek(99.0);
        assert!((element.position_seconds() - 1.0).abs() < 1e-9);
        element.seek(-3.0);
        assert_eq!(element.position_seconds(), 0.0);
    }

    #[test]
    fn stream_is_fifo_and_pads_underruns() {
        let mut stream = MediaStream::new("mic");
        stream.push_samples(&[0.1, 0.2, 0.3]);
        let mut l = [9.0f32; 5];
        let mut r = [9.0f32; 5];
        stream.next_block(&mut l, &mut r);
        assert_eq!(l, [0.1, 0.2, 0.3, 0.0, 0.0]);
        assert_eq!(r, [0.1, 0.2, 0.3, 0.0, 0.0]);
    }

    #[test]
    fn disabled_stream_drains_silently() {
        let mut stream = MediaStream::new("mic");
        stream.push_samples(&[0.5; 8]);
        stream.set_enabled(false);
        let mut l = [0.0f32; 4];
        let mut r = [0.0f32; 4];
        stream.next_block(&mut l, &mut r);
        assert!(l.iter().all(|&s| s == 0.0));
        assert_eq!(stream.queued(), 4, "disabled pull still consumes the queue");
    }

    #[test]
    fn stream_latch_binds_once() {
        let mut stream = MediaStream::new("mic");
        assert!(stream.bind_once());
        assert!(!stream.bind_once());
    }

    #[test]
    fn drop_filter_keeps_only_audio_files() {
        let items = vec![
            DropItem {
                kind: DropItemKind::File,
                mime: "audio/mpeg".to_string(),
                name: "song.mp3".to_string(),
            },
            DropItem {
                kind: DropItemKind::File,
                mime: "image/png".to_string(),
                name: "cover.png".to_string(),
            },
            DropItem {
                kind: DropItemKind::Text,
                mime: "audio/wav".to_string(),
                name: "paste".to_string(),
            },
            DropItem {
                kind: DropItemKind::File,
                mime: "audio/wav".to_string(),
                name: "take.wav".to_string(),
            },
        ];
        let kept = audio_items(&items);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].name, "song.mp3");
        assert_eq!(kept[1].name, "take.wav");
    }
}
