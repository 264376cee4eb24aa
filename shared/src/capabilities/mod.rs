mod kv;
mod scheduler;

pub use self::kv::{
    KeyNamespace, KvError, KvKey, KvReadResult, KvWriteResult, StorageErrorCode, TypedKvStore,
};
pub use self::scheduler::{
    Scheduler, SchedulerError, SchedulerOperation, SchedulerOutput, SchedulerResult,
};

// Crux's built-in Render capability covers view updates as is.
pub use crux_core::render::Render;
pub use crux_kv::KeyValue;

// The Effect derive refers to the app type as `App`.
#[allow(unused_imports)]
use crate::app::App;
use crate::event::Event;

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("Storage error: {0}")]
    Kv(#[from] KvError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub kv: KeyValue<Event>,
    pub scheduler: Scheduler<Event>,
    pub render: Render<Event>,
}
