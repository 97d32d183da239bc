//! Track results reported back to callers of `track`

use serde::Serialize;
use std::fmt;

use crate::Dispatch;

/// Outcome of admitting a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    /// Accepted for processing (queued or handed to consent)
    Accepted,
    /// Dropped before queueing
    Dropped,
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackStatus::Accepted => f.write_str("accepted"),
            TrackStatus::Dropped => f.write_str("dropped"),
        }
    }
}

/// Result of a `track` call
#[derive(Debug, Clone, PartialEq)]
pub struct TrackResult {
    pub dispatch: Dispatch,
    pub status: TrackStatus,
    /// Human readable reason
    pub info: String,
}

impl TrackResult {
    pub fn accepted(dispatch: Dispatch, info: impl Into<String>) -> Self {
        Self {
            dispatch,
            status: TrackStatus::Accepted,
            info: info.into(),
        }
    }

    pub fn dropped(dispatch: Dispatch, info: impl Into<String>) -> Self {
        Self {
            dispatch,
            status: TrackStatus::Dropped,
            info: info.into(),
        }
    }
}

/// Completion callback for `track`
pub type TrackResultListener = Box<dyn FnOnce(TrackResult) + Send>;
