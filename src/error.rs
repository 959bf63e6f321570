//! Error types for the composition and scheduling core
//!
//! Pipeline stages do not propagate these upward; they log and fall back as
//! described on each stage. The types exist so the external boundaries
//! (device, render engine, refresh-rate table) can report what went wrong.

use crate::hwc::DisplayId;
use thiserror::Error;

/// Failure reported by the hardware composer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HwcError {
    #[error("display {0} is not connected")]
    NotConnected(DisplayId),

    #[error("hardware composer call `{call}` failed on display {display}: status {status}")]
    CallFailed {
        call: &'static str,
        display: DisplayId,
        status: i32,
    },

    #[error("display {display} has no layer {layer}")]
    BadLayer { display: DisplayId, layer: u64 },
}

/// Failure reported by the render engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("draw submission failed: {0}")]
    DrawFailed(String),

    #[error("target buffer {0} is not usable by the render engine")]
    BadBuffer(u64),
}

/// Invalid refresh-rate table input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigsError {
    #[error("no display configs were provided")]
    NoConfigs,

    #[error("config id {id} is out of range (have {count} configs)")]
    InvalidConfigId { id: usize, count: usize },
}
