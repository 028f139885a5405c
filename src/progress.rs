//! Coarse progress reporting for the long running stages.
//!
//! Progress is purely informational. Nothing in the pipeline depends on a sink being
//! called, how often it is called, or in which order events arrive when the `rayon`
//! feature spreads work over several threads.

use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stage {
    /// One step per scale.
    Sampling,
    /// One step per grid point.
    Encoding,
    /// One step per source row.
    Matching,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Sampling => "sampling",
            Stage::Encoding => "encoding",
            Stage::Matching => "matching",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub done: usize,
    pub total: usize,
}

pub trait ProgressSink: Sync {
    fn report(&self, event: ProgressEvent);
}

/// Drops every event.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Forwards events to `log::debug!`.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, ProgressEvent { stage, done, total }: ProgressEvent) {
        log::debug!("{stage}: {done} / {total}");
    }
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Sync,
{
    fn report(&self, event: ProgressEvent) {
        self(event)
    }
}
