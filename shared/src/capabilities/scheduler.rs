use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Periodic background work owned by the shell: WorkManager unique periodic
/// work on Android, the WidgetKit timeline reload policy on iOS. Exact
/// timing is up to the OS.
pub struct Scheduler<Ev> {
    context: CapabilityContext<SchedulerOperation, Ev>,
}

impl<Ev> Capability<Ev> for Scheduler<Ev> {
    type Operation = SchedulerOperation;
    type MappedSelf<MappedEv> = Scheduler<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Scheduler::new(self.context.map_event(f))
    }
}

impl<Ev> Scheduler<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<SchedulerOperation, Ev>) -> Self {
        Self { context }
    }

    /// Registers `job` to run every `interval_minutes`, replacing any
    /// existing registration under the same name.
    pub fn schedule_periodic<F>(&self, job: impl Into<String>, interval_minutes: u32, make_event: F)
    where
        F: FnOnce(SchedulerResult) -> Ev + Send + 'static,
    {
        let operation = SchedulerOperation::SchedulePeriodic {
            job: job.into(),
            interval_minutes,
        };
        self.request(operation, make_event);
    }

    pub fn cancel<F>(&self, job: impl Into<String>, make_event: F)
    where
        F: FnOnce(SchedulerResult) -> Ev + Send + 'static,
    {
        self.request(SchedulerOperation::Cancel { job: job.into() }, make_event);
    }

    fn request<F>(&self, operation: SchedulerOperation, make_event: F)
    where
        F: FnOnce(SchedulerResult) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context.request_from_shell(operation).await;
            context.update_app(make_event(result));
        });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SchedulerOperation {
    SchedulePeriodic { job: String, interval_minutes: u32 },
    Cancel { job: String },
}

impl Operation for SchedulerOperation {
    type Output = SchedulerResult;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SchedulerOutput {
    Scheduled { job: String, interval_minutes: u32 },
    Cancelled { job: String, existed: bool },
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("background scheduling unavailable on this platform")]
    Unavailable,

    #[error("schedule rejected: {reason}")]
    Rejected { reason: String },
}

pub type SchedulerResult = Result<SchedulerOutput, SchedulerError>;
