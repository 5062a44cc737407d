//! Progress reporting for long-running stages.
//!
//! The stager and model builder report through an injected [`ProgressObserver`]; how progress is
//! displayed is up to the implementor.
use chrono::NaiveDateTime;
use log::info;

/// Receives progress messages during a run
pub trait ProgressObserver {
    /// Called with the stage name, a message and optionally the wall-clock time of the event
    fn on_progress(&mut self, stage: &str, message: &str, timestamp: Option<NaiveDateTime>);
}

/// Writes progress messages to the program log
#[derive(Clone, Copy, Debug, Default)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_progress(&mut self, stage: &str, message: &str, timestamp: Option<NaiveDateTime>) {
        match timestamp {
            Some(timestamp) => info!("[{stage}] {message} ({})", timestamp.format("%H:%M:%S")),
            None => info!("[{stage}] {message}"),
        }
    }
}

/// Discards progress messages
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&mut self, _stage: &str, _message: &str, _timestamp: Option<NaiveDateTime>) {}
}

/// A progress message as recorded by [`RecordingProgress`]
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressRecord {
    /// The stage name
    pub stage: String,
    /// The message
    pub message: String,
}

/// Keeps every progress message, e.g. for display once a run is over
#[derive(Clone, Debug, Default)]
pub struct RecordingProgress {
    /// Messages in the order received
    pub records: Vec<ProgressRecord>,
}

impl ProgressObserver for RecordingProgress {
    fn on_progress(&mut self, stage: &str, message: &str, _timestamp: Option<NaiveDateTime>) {
        self.records.push(ProgressRecord {
            stage: stage.to_string(),
            message: message.to_string(),
        });
    }
}

/// The current local time, for timestamping progress messages
pub fn now() -> Option<NaiveDateTime> {
    Some(chrono::Local::now().naive_local())
}
