use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::presenter::ColorPhase;
use crate::{
    AppError, UnixTimeMs, WidgetConfig, DEFAULT_SCHEDULE_MINUTES, MS_PER_MINUTE,
    URGENT_REFRESH_MINUTES,
};

/// Opaque trip identifier pushed by the host app.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TripId(String);

impl TripId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Blank identifiers mean "no active trip".
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last known countdown state, as persisted in the host key-value store.
///
/// Every field tolerates absent or `null` values on read: missing integers
/// load as `0`, missing text as `""`, unknown phases as `None`. Field names
/// match the preference keys the widget shells already use.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TripSnapshot {
    #[serde(deserialize_with = "lenient_trip_id")]
    pub trip_id: Option<TripId>,
    #[serde(deserialize_with = "lenient_text")]
    pub title: String,
    #[serde(deserialize_with = "lenient_minutes")]
    pub minutes_remaining: i64,
    #[serde(deserialize_with = "lenient_duration")]
    pub travel_duration_minutes: u32,
    #[serde(deserialize_with = "lenient_text")]
    pub departure_time_formatted: String,
    #[serde(deserialize_with = "lenient_text")]
    pub arrival_time_formatted: String,
    /// Cached output of the previous computation. Advisory only.
    #[serde(deserialize_with = "lenient_text")]
    pub time_remaining_text: String,
    #[serde(deserialize_with = "lenient_phase")]
    pub color_phase: Option<ColorPhase>,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub last_updated: UnixTimeMs,
    pub departure_at: Option<UnixTimeMs>,
}

impl TripSnapshot {
    pub fn has_trip(&self) -> bool {
        self.trip_id.is_some()
    }

    /// "{arrival} 도착", or nothing when the arrival time is unknown.
    pub fn arrival_caption(&self) -> Option<String> {
        let arrival = self.arrival_time_formatted.trim();
        if arrival.is_empty() {
            None
        } else {
            Some(format!("{arrival} 도착"))
        }
    }
}

fn lenient_trip_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<TripId>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.as_deref().and_then(TripId::parse))
}

fn lenient_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

fn lenient_minutes<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    Ok(Option::<i64>::deserialize(d)?.unwrap_or(0))
}

fn lenient_duration<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    Ok(clamp_duration(Option::<i64>::deserialize(d)?.unwrap_or(0)))
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<UnixTimeMs, D::Error> {
    Ok(Option::<UnixTimeMs>::deserialize(d)?.unwrap_or_default())
}

fn lenient_phase<'de, D: Deserializer<'de>>(d: D) -> Result<Option<ColorPhase>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.as_deref().and_then(ColorPhase::parse))
}

fn clamp_duration(minutes: i64) -> u32 {
    u32::try_from(minutes.max(0)).unwrap_or(u32::MAX)
}

/// Payload of the host app's `updateWidget` bridge call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TripPush {
    pub trip_id: Option<String>,
    pub title: Option<String>,
    pub minutes_remaining: Option<i64>,
    pub color_phase: Option<String>,
    pub departure_time_formatted: Option<String>,
    pub arrival_time_formatted: Option<String>,
    pub time_remaining_text: Option<String>,
    pub travel_duration_minutes: Option<i64>,
    pub departure_at: Option<UnixTimeMs>,
}

impl TripPush {
    /// Minutes the refresh cadence is chosen from. A push without a count
    /// schedules as if half an hour remained.
    pub fn schedule_basis_minutes(&self) -> i64 {
        self.minutes_remaining.unwrap_or(DEFAULT_SCHEDULE_MINUTES)
    }

    pub fn into_snapshot(self, now: UnixTimeMs) -> TripSnapshot {
        TripSnapshot {
            trip_id: self.trip_id.as_deref().and_then(TripId::parse),
            title: self.title.unwrap_or_default(),
            minutes_remaining: self.minutes_remaining.unwrap_or(0),
            travel_duration_minutes: clamp_duration(self.travel_duration_minutes.unwrap_or(0)),
            departure_time_formatted: self.departure_time_formatted.unwrap_or_default(),
            arrival_time_formatted: self.arrival_time_formatted.unwrap_or_default(),
            time_remaining_text: self.time_remaining_text.unwrap_or_default(),
            color_phase: self.color_phase.as_deref().and_then(ColorPhase::parse),
            last_updated: now,
            departure_at: self.departure_at,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Model {
    pub config: WidgetConfig,
    pub snapshot: TripSnapshot,
    /// Most recent clock reading handed in by the shell.
    pub now: UnixTimeMs,
    /// Cadence the shell last confirmed (or was asked) to run the refresh job at.
    pub scheduled_interval_minutes: Option<u32>,
    /// Bumped whenever the trip is replaced, cleared, or re-read, so a
    /// late store reply cannot overwrite newer state.
    pub generation: u64,
    /// When the outstanding snapshot read was issued.
    pub pending_read_since: Option<UnixTimeMs>,
    pub last_error: Option<AppError>,
}

impl Model {
    pub fn set_error(&mut self, error: AppError) {
        self.last_error = Some(error);
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn clear_trip(&mut self) {
        self.snapshot = TripSnapshot::default();
        self.scheduled_interval_minutes = None;
    }

    pub fn active_trip_id(&self) -> Option<&TripId> {
        self.snapshot.trip_id.as_ref()
    }

    /// Starts a new generation and abandons any outstanding read.
    pub fn next_generation(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.pending_read_since = None;
        self.generation
    }

    /// Whether a snapshot read is still awaited at `now`. A read older than
    /// one refresh interval is considered lost.
    pub fn read_in_flight(&self, now: UnixTimeMs) -> bool {
        let interval = self
            .scheduled_interval_minutes
            .unwrap_or(URGENT_REFRESH_MINUTES);
        let window = u64::from(interval).saturating_mul(MS_PER_MINUTE);
        self.pending_read_since
            .is_some_and(|since| now.elapsed_since(since) < window)
    }
}
