// lib.rs - shared core for the GoNow trip countdown widgets

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod capabilities;
pub mod event;
pub mod model;
pub mod presenter;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::capabilities::{CapabilityError, KeyNamespace, KvError, KvKey, SchedulerError};
use crate::model::TripSnapshot;
use crate::presenter::{ColorPhase, PresentationResult};

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use crux_core::App as CruxApp;
pub use event::Event;
pub use model::{Model, TripId, TripPush};
pub use presenter::WidgetPresentation;

pub const SNAPSHOT_KEY: &str = "trip_snapshot";
pub const REFRESH_JOB_NAME: &str = "gonow_widget_update";
pub const MAX_REFRESH_JOB_NAME_LENGTH: usize = 128;
pub const GREEN_ABOVE_MINUTES: i64 = 30;
pub const ORANGE_ABOVE_MINUTES: i64 = 15;
pub const RELAXED_REFRESH_MINUTES: u32 = 15;
pub const STEADY_REFRESH_MINUTES: u32 = 5;
pub const URGENT_REFRESH_MINUTES: u32 = 3;
pub const DEFAULT_SCHEDULE_MINUTES: i64 = 30;
pub const MS_PER_MINUTE: u64 = 60_000;
pub const LATE_TEXT: &str = "지각!";
pub const EMPTY_HEADLINE: &str = "일정이 없습니다";
pub const EMPTY_HINT: &str = "새 일정을 추가하세요";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Storage,
    Serialization,
    Validation,
    Scheduling,
    FeatureUnavailable,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Storage => "STORAGE_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::Scheduling => "SCHEDULING_ERROR",
            Self::FeatureUnavailable => "FEATURE_UNAVAILABLE",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Storage | Self::Scheduling => ErrorSeverity::Transient,
            Self::Validation | Self::FeatureUnavailable => ErrorSeverity::Permanent,
            Self::Serialization | Self::Internal => ErrorSeverity::Fatal,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Storage | Self::Scheduling)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && matches!(self.severity, ErrorSeverity::Transient)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Storage => "위젯 데이터를 읽거나 저장하지 못했습니다.".into(),
            ErrorKind::Serialization => "저장된 위젯 데이터가 손상되었습니다.".into(),
            ErrorKind::Validation => "위젯 설정이 올바르지 않습니다.".into(),
            ErrorKind::Scheduling => "위젯 자동 갱신을 예약하지 못했습니다.".into(),
            ErrorKind::FeatureUnavailable => {
                "이 기기에서는 위젯 자동 갱신을 사용할 수 없습니다.".into()
            }
            ErrorKind::Internal => "알 수 없는 오류가 발생했습니다.".into(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)
    }
}

impl std::error::Error for AppError {}

impl From<CapabilityError> for AppError {
    fn from(e: CapabilityError) -> Self {
        let message = e.to_string();
        match e {
            CapabilityError::Kv(kv) => match kv {
                KvError::InvalidKey { key, .. } => {
                    Self::new(ErrorKind::Validation, message).with_context("key", key)
                }
                KvError::ValueTooLarge { .. } => Self::new(ErrorKind::Validation, message),
                KvError::Storage { retryable, .. } => {
                    let error = Self::new(ErrorKind::Storage, message);
                    if retryable {
                        error
                    } else {
                        error.with_severity(ErrorSeverity::Permanent)
                    }
                }
                KvError::Serialization { .. } => Self::new(ErrorKind::Serialization, message),
            },
            CapabilityError::Scheduler(SchedulerError::Unavailable) => {
                Self::new(ErrorKind::FeatureUnavailable, message)
            }
            CapabilityError::Scheduler(SchedulerError::Rejected { .. }) => {
                Self::new(ErrorKind::Scheduling, message)
            }
        }
    }
}

impl From<KvError> for AppError {
    fn from(e: KvError) -> Self {
        CapabilityError::from(e).into()
    }
}

impl From<SchedulerError> for AppError {
    fn from(e: SchedulerError) -> Self {
        CapabilityError::from(e).into()
    }
}

/// Explicit timestamp unit. Always supplied by the shell.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn elapsed_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    #[must_use]
    pub fn add_millis(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }

    #[must_use]
    pub fn is_before(self, other: Self) -> bool {
        self.0 < other.0
    }
}

/// Where the snapshot lives and what the refresh job is called.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct WidgetConfig {
    pub namespace: KeyNamespace,
    pub snapshot_key: String,
    pub refresh_job: String,
    /// Derive remaining minutes from `departure_at` when the snapshot has one.
    pub prefer_absolute_departure: bool,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            namespace: KeyNamespace::Widget,
            snapshot_key: SNAPSHOT_KEY.to_string(),
            refresh_job: REFRESH_JOB_NAME.to_string(),
            prefer_absolute_departure: true,
        }
    }
}

impl WidgetConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        self.snapshot_kv_key()
            .map_err(|e| AppError::from(e).with_context("field", "snapshot_key"))?;

        let job = self.refresh_job.as_str();
        if job.is_empty() || job.len() > MAX_REFRESH_JOB_NAME_LENGTH {
            return Err(AppError::new(
                ErrorKind::Validation,
                format!("refresh_job must be 1..={MAX_REFRESH_JOB_NAME_LENGTH} bytes"),
            )
            .with_context("field", "refresh_job"));
        }
        if !job
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(AppError::new(
                ErrorKind::Validation,
                "refresh_job contains invalid characters",
            )
            .with_context("field", "refresh_job"));
        }

        Ok(())
    }

    pub fn snapshot_kv_key(&self) -> Result<KvKey, KvError> {
        KvKey::new(self.namespace.clone(), self.snapshot_key.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WidgetView {
    Empty {
        headline: String,
        hint: String,
    },
    Trip {
        trip_id: String,
        title: String,
        time_remaining_text: String,
        color_phase: ColorPhase,
        color_hex: String,
        status_message: String,
        departure_time: String,
        arrival_caption: Option<String>,
        progress: f64,
        next_refresh_minutes: u32,
    },
}

impl WidgetView {
    #[must_use]
    pub fn empty() -> Self {
        Self::Empty {
            headline: WidgetPresentation::empty_headline().to_string(),
            hint: WidgetPresentation::empty_hint().to_string(),
        }
    }

    #[must_use]
    pub fn trip(snapshot: &TripSnapshot, result: PresentationResult) -> Self {
        Self::Trip {
            trip_id: snapshot
                .trip_id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            title: snapshot.title.clone(),
            time_remaining_text: result.time_remaining_text,
            color_phase: result.color_phase,
            color_hex: result.color_phase.hex().to_string(),
            status_message: result.color_phase.status_message().to_string(),
            departure_time: snapshot.departure_time_formatted.clone(),
            arrival_caption: snapshot.arrival_caption(),
            progress: result.progress_fraction,
            next_refresh_minutes: result.next_refresh_interval_minutes,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserFacingError {
    pub message: String,
    pub is_retryable: bool,
    pub error_code: String,
}

impl From<&AppError> for UserFacingError {
    fn from(e: &AppError) -> Self {
        Self {
            message: e.user_facing_message(),
            is_retryable: e.is_retryable(),
            error_code: e.code().to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WidgetViewModel {
    pub widget: WidgetView,
    pub error: Option<UserFacingError>,
}

pub mod app {
    use super::*;
    use crate::capabilities::{Capabilities, SchedulerOutput, TypedKvStore};
    use crate::event::{ReadPurpose, SnapshotRead};
    use crate::presenter;
    use tracing::{debug, error, info, instrument, warn};

    #[derive(Default)]
    pub struct App;

    impl App {
        fn snapshot_store(config: &WidgetConfig) -> TypedKvStore<TripSnapshot> {
            TypedKvStore::new(config.namespace.clone())
        }

        fn snapshot_key(config: &WidgetConfig) -> Result<String, KvError> {
            Ok(Self::snapshot_store(config)
                .key(config.snapshot_key.as_str())?
                .raw())
        }

        fn persist_snapshot(model: &mut Model, caps: &Capabilities) {
            let store = Self::snapshot_store(&model.config);
            let write = Self::snapshot_key(&model.config)
                .and_then(|key| Ok((key, store.encode(&model.snapshot)?)));
            match write {
                Ok((key, value)) => caps.kv.set(key, value, |result| {
                    Event::SnapshotStored(Box::new(result.map(|_| ()).map_err(KvError::from)))
                }),
                Err(e) => {
                    error!(error = %e, "failed to encode trip snapshot");
                    model.set_error(e.into());
                }
            }
        }

        fn load_snapshot(
            model: &mut Model,
            now: UnixTimeMs,
            purpose: ReadPurpose,
            caps: &Capabilities,
        ) {
            match Self::snapshot_key(&model.config) {
                Ok(key) => {
                    let generation = model.next_generation();
                    model.pending_read_since = Some(now);
                    caps.kv.get(key, move |result| {
                        Event::SnapshotLoaded(Box::new(SnapshotRead {
                            now,
                            generation,
                            purpose,
                            result: result.map_err(KvError::from),
                        }))
                    });
                }
                Err(e) => {
                    warn!(error = %e, "cannot build snapshot read");
                    model.set_error(e.into());
                    caps.render.render();
                }
            }
        }

        fn schedule_refresh(model: &mut Model, interval_minutes: u32, caps: &Capabilities) {
            info!(
                job = %model.config.refresh_job,
                interval_minutes,
                "scheduling widget refresh"
            );
            model.scheduled_interval_minutes = Some(interval_minutes);
            caps.scheduler.schedule_periodic(
                model.config.refresh_job.clone(),
                interval_minutes,
                |result| Event::RefreshScheduled(Box::new(result)),
            );
        }

        fn clear_widget(model: &mut Model, caps: &Capabilities) {
            info!(trip_id = ?model.active_trip_id(), "clearing widget trip");
            model.clear_trip();
            model.clear_error();
            model.next_generation();

            match Self::snapshot_key(&model.config) {
                Ok(key) => caps.kv.delete(key, |result| {
                    Event::SnapshotDeleted(Box::new(result.map(|_| ()).map_err(KvError::from)))
                }),
                Err(e) => {
                    warn!(error = %e, "cannot build snapshot delete");
                    model.set_error(e.into());
                }
            }

            caps.scheduler
                .cancel(model.config.refresh_job.clone(), |result| {
                    Event::RefreshCancelled(Box::new(result))
                });
            caps.render.render();
        }

        #[instrument(skip_all, fields(trip_id = %stored.trip_id.as_ref().map(TripId::as_str).unwrap_or_default()))]
        fn refresh_stored(
            model: &mut Model,
            stored: &TripSnapshot,
            now: UnixTimeMs,
            caps: &Capabilities,
        ) {
            let prefer_absolute = model.config.prefer_absolute_departure;
            let (snapshot, presentation) = presenter::refresh_snapshot(stored, now, prefer_absolute);

            info!(
                counted_down = stored.minutes_remaining.saturating_sub(snapshot.minutes_remaining),
                absolute = prefer_absolute && stored.departure_at.is_some(),
                minutes_remaining = snapshot.minutes_remaining,
                "widget countdown refreshed"
            );

            model.snapshot = snapshot;
            model.clear_error();
            Self::persist_snapshot(model, caps);

            if let WidgetPresentation::Trip(result) = presentation {
                let interval = result.next_refresh_interval_minutes;
                if model.scheduled_interval_minutes != Some(interval) {
                    Self::schedule_refresh(model, interval, caps);
                }
            }

            caps.render.render();
        }

        fn display_stored(
            model: &mut Model,
            stored: &TripSnapshot,
            now: UnixTimeMs,
            caps: &Capabilities,
        ) {
            let (snapshot, _) =
                presenter::refresh_snapshot(stored, now, model.config.prefer_absolute_departure);
            info!(
                minutes_remaining = snapshot.minutes_remaining,
                "widget redrawn from store"
            );
            model.snapshot = snapshot;
            caps.render.render();
        }
    }

    impl crux_core::App for App {
        type Event = Event;
        type Model = Model;
        type ViewModel = WidgetViewModel;
        type Capabilities = Capabilities;

        fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
            debug!(event = event.name(), "widget event");

            match event {
                Event::UpdateWidget { push, now } => {
                    model.now = now;
                    let mut schedule_basis = push.schedule_basis_minutes();
                    let snapshot = push.into_snapshot(now);

                    if !snapshot.has_trip() {
                        info!("update without trip id, clearing widget");
                        Self::clear_widget(model, caps);
                        return;
                    }

                    let prefer_absolute = model.config.prefer_absolute_departure;
                    let (snapshot, _) = presenter::refresh_snapshot(&snapshot, now, prefer_absolute);
                    if prefer_absolute && snapshot.departure_at.is_some() {
                        schedule_basis = snapshot.minutes_remaining;
                    }

                    info!(
                        trip_id = %snapshot.trip_id.as_ref().map(TripId::as_str).unwrap_or_default(),
                        minutes_remaining = snapshot.minutes_remaining,
                        "widget trip updated"
                    );

                    model.next_generation();
                    model.snapshot = snapshot;
                    model.clear_error();
                    Self::persist_snapshot(model, caps);
                    Self::schedule_refresh(
                        model,
                        presenter::next_refresh_interval(schedule_basis),
                        caps,
                    );
                    caps.render.render();
                }

                Event::ClearWidget => Self::clear_widget(model, caps),

                Event::ForceRefresh { now } => {
                    model.now = now;
                    if !model.snapshot.has_trip() {
                        if model.read_in_flight(now) {
                            debug!("snapshot read in flight, skipping redraw");
                            return;
                        }
                        Self::load_snapshot(model, now, ReadPurpose::Display, caps);
                        return;
                    }

                    let (snapshot, _) = presenter::refresh_snapshot(
                        &model.snapshot,
                        now,
                        model.config.prefer_absolute_departure,
                    );
                    model.snapshot = snapshot;
                    caps.render.render();
                }

                Event::RefreshTick { now } => {
                    model.now = now;
                    if model.read_in_flight(now) {
                        debug!("refresh already in flight, skipping tick");
                        return;
                    }
                    Self::load_snapshot(model, now, ReadPurpose::Refresh, caps);
                }

                Event::ConfigChanged(config) => {
                    match config.validate() {
                        Ok(()) => {
                            info!(
                                namespace = config.namespace.prefix(),
                                job = %config.refresh_job,
                                "widget config changed"
                            );
                            model.next_generation();
                            model.config = *config;
                        }
                        Err(e) => {
                            warn!(error = %e, "rejected widget config");
                            model.set_error(e);
                        }
                    }
                    caps.render.render();
                }

                Event::SnapshotLoaded(read) => {
                    let SnapshotRead {
                        now,
                        generation,
                        purpose,
                        result,
                    } = *read;

                    if generation != model.generation {
                        debug!(
                            generation,
                            current = model.generation,
                            "discarding stale snapshot read"
                        );
                        return;
                    }
                    model.pending_read_since = None;
                    model.now = now;

                    let store = Self::snapshot_store(&model.config);
                    match store.decode(result) {
                        Ok(Some(stored)) if stored.has_trip() => match purpose {
                            ReadPurpose::Refresh => Self::refresh_stored(model, &stored, now, caps),
                            ReadPurpose::Display => Self::display_stored(model, &stored, now, caps),
                        },
                        Ok(_) => {
                            debug!("no trip data, skipping update");
                            model.snapshot = TripSnapshot::default();
                            caps.render.render();
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to load trip snapshot");
                            model.set_error(e.into());
                            caps.render.render();
                        }
                    }
                }

                Event::SnapshotStored(result) => match *result {
                    Ok(()) => debug!("trip snapshot stored"),
                    Err(e) => {
                        warn!(error = %e, "failed to store trip snapshot");
                        model.set_error(e.into());
                        caps.render.render();
                    }
                },

                Event::SnapshotDeleted(result) => match *result {
                    Ok(()) => debug!("trip snapshot deleted"),
                    Err(e) => {
                        warn!(error = %e, "failed to delete trip snapshot");
                        model.set_error(e.into());
                        caps.render.render();
                    }
                },

                Event::RefreshScheduled(result) => match *result {
                    Ok(SchedulerOutput::Scheduled {
                        job,
                        interval_minutes,
                    }) => debug!(%job, interval_minutes, "refresh job scheduled"),
                    Ok(other) => debug!(?other, "unexpected scheduler reply"),
                    Err(e) => {
                        warn!(error = %e, "failed to schedule widget refresh");
                        model.scheduled_interval_minutes = None;
                        model.set_error(e.into());
                        caps.render.render();
                    }
                },

                Event::RefreshCancelled(result) => match *result {
                    Ok(_) => debug!("refresh job cancelled"),
                    Err(e) => warn!(error = %e, "failed to cancel widget refresh"),
                },
            }
        }

        fn view(&self, model: &Model) -> WidgetViewModel {
            let widget = match presenter::presentation_for(&model.snapshot) {
                WidgetPresentation::Empty => WidgetView::empty(),
                WidgetPresentation::Trip(result) => WidgetView::trip(&model.snapshot, result),
            };

            WidgetViewModel {
                widget,
                error: model.last_error.as_ref().map(UserFacingError::from),
            }
        }
    }
}
