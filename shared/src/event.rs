use serde::{Deserialize, Serialize};

use crate::capabilities::{KvReadResult, KvWriteResult, SchedulerResult};
use crate::model::TripPush;
use crate::{UnixTimeMs, WidgetConfig};

/// Everything the shells can tell the core, plus capability replies.
///
/// The first group mirrors the `com.gonow.widget` method channel
/// (`updateWidget`, `clearWidget`, `forceRefresh`) and the periodic worker.
/// Clock readings always come from the shell so `update` stays deterministic.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Event {
    UpdateWidget {
        push: Box<TripPush>,
        now: UnixTimeMs,
    },
    ClearWidget,
    ForceRefresh {
        now: UnixTimeMs,
    },
    RefreshTick {
        now: UnixTimeMs,
    },
    ConfigChanged(Box<WidgetConfig>),

    // Capability responses (boxed to keep the enum small)
    SnapshotLoaded(Box<SnapshotRead>),
    SnapshotStored(Box<KvWriteResult>),
    SnapshotDeleted(Box<KvWriteResult>),
    RefreshScheduled(Box<SchedulerResult>),
    RefreshCancelled(Box<SchedulerResult>),
}

/// What a snapshot read was issued for.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadPurpose {
    /// Periodic job: count down, write back, reschedule.
    Refresh,
    /// Cold-start redraw: count down and render, nothing else.
    Display,
}

/// Reply to a snapshot read, tagged with the request it answers.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SnapshotRead {
    pub now: UnixTimeMs,
    /// `Model::generation` when the read was issued. Replies from an older
    /// generation are discarded.
    pub generation: u64,
    pub purpose: ReadPurpose,
    pub result: KvReadResult,
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::UpdateWidget { .. } => "update_widget",
            Self::ClearWidget => "clear_widget",
            Self::ForceRefresh { .. } => "force_refresh",
            Self::RefreshTick { .. } => "refresh_tick",
            Self::ConfigChanged(_) => "config_changed",
            Self::SnapshotLoaded(_) => "snapshot_loaded",
            Self::SnapshotStored(_) => "snapshot_stored",
            Self::SnapshotDeleted(_) => "snapshot_deleted",
            Self::RefreshScheduled(_) => "refresh_scheduled",
            Self::RefreshCancelled(_) => "refresh_cancelled",
        }
    }

    /// Events that originate from the host app or the OS rather than from a
    /// capability reply.
    #[must_use]
    pub const fn is_shell_request(&self) -> bool {
        matches!(
            self,
            Self::UpdateWidget { .. }
                | Self::ClearWidget
                | Self::ForceRefresh { .. }
                | Self::RefreshTick { .. }
                | Self::ConfigChanged(_)
        )
    }
}
