//! Status snapshot emitted after every content switch.

use serde::Serialize;

/// What one output is currently showing. The runtime persists these so
/// `wallflow status` can answer without talking to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRecord {
    pub output: String,
    pub path: String,
    pub kind: ContentKind,
    pub position: usize,
    pub rotation_len: usize,
    pub paused: bool,
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Image,
    Shader,
    Fallback,
}
