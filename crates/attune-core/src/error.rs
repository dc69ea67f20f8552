//! Error types for the attune core.
//!
//! Real-time paths (frame callback, audio render) never propagate these upward; they log and
//! skip. Errors surface only from explicit setup calls such as starting a warmup ramp or
//! building a breathing spec.

use thiserror::Error;

use crate::dispatcher::Channel;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttuneError {
    #[error("warmup ramp needs at least one round")]
    InvalidWarmupRounds,
    #[error("invalid breathing cycle: {0}")]
    InvalidBreathingSpec(String),
}

/// Failure reported by a haptic, audio or visual output backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OutputError {
    #[error("{0:?} channel is not ready")]
    NotReady(Channel),
    #[error("{0:?} engine stopped by the system")]
    Stopped(Channel),
}

impl OutputError {
    pub fn channel(&self) -> Channel {
        match self {
            OutputError::NotReady(c) | OutputError::Stopped(c) => *c,
        }
    }
}
