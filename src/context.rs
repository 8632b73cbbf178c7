//! Audio context lifecycle - one instance per session, passed explicitly.
//!
//! The context carries the sample rate every component derives its buffer
//! sizes from, plus a running/closed flag so a torn-down session rejects
//! further mutations instead of silently operating on a dead graph.

use crate::error::GraphError;
use log::debug;

/// Default sample rate when the configuration does not supply one.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Frames per processing block. The graph is always evaluated in whole
/// quanta of this size.
pub const RENDER_QUANTUM: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    Closed,
}

/// Process-wide audio state with an explicit lifecycle: created at session
/// start, closed when the session ends. Constructible without any live
/// rendering backend.
#[derive(Debug)]
pub struct AudioContext {
    sample_rate: u32,
    state: ContextState,
}

impl AudioContext {
    pub fn new(sample_rate: u32) -> Self {
        AudioContext {
            sample_rate: sample_rate.max(1),
            state: ContextState::Running,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ContextState::Running
    }

    /// Tear the context down. Idempotent; every subsequent mutation guarded
    /// by [`ensure_running`](Self::ensure_running) fails with `ContextClosed`.
    pub fn close(&mut self) {
        if self.state == ContextState::Running {
            debug!("audio context closed");
            self.state = ContextState::Closed;
        }
    }

    /// Guard for operations that require a live context.
    pub fn ensure_running(&self, op: &'static str) -> Result<(), GraphError> {
        match self.state {
            ContextState::Running => Ok(()),
            ContextState::Closed => Err(GraphError::ContextClosed { op }),
        }
    }
}

impl Default for AudioContext {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}
