// Job observers - Callback adapters for the job surface

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::model::JobReport;
use crate::error::CompressError;
use crate::ports::JobObserver;

/// One callback, as a value
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress(u8),
    Succeeded(JobReport),
    Failed(String),
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobEvent::Progress(_))
    }
}

/// Forwards callbacks into an unbounded channel
pub struct ChannelObserver {
    events: mpsc::UnboundedSender<JobEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (Self { events }, receiver)
    }

    fn send(&self, event: JobEvent) {
        // A closed receiver only means nobody is listening any more
        let _ = self.events.send(event);
    }
}

impl JobObserver for ChannelObserver {
    fn on_progress(&self, percent: u8) {
        self.send(JobEvent::Progress(percent));
    }

    fn on_success(&self, report: &JobReport) {
        self.send(JobEvent::Succeeded(report.clone()));
    }

    fn on_error(&self, error: &CompressError) {
        self.send(JobEvent::Failed(error.to_string()));
    }
}

/// Writes callbacks to the log
pub struct LogObserver;

impl JobObserver for LogObserver {
    fn on_progress(&self, percent: u8) {
        info!(percent, "progress");
    }

    fn on_success(&self, report: &JobReport) {
        info!(source = %report.source.display(), compressed_size = report.compressed_size, "compressed");
    }

    fn on_error(&self, error: &CompressError) {
        warn!(error = %error, "compression failed");
    }
}
