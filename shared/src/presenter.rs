//! Trip countdown presentation.
//!
//! Every derived value a widget shows (colour phase, countdown text, progress
//! ring, next refresh cadence) is a pure function of the remaining minutes,
//! plus the planned travel duration for the progress ring. The Android and iOS
//! widget shells and the periodic refresh job all go through this module, so
//! the phase boundaries cannot drift apart per platform.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::TripSnapshot;
use crate::{
    UnixTimeMs, EMPTY_HEADLINE, EMPTY_HINT, GREEN_ABOVE_MINUTES, LATE_TEXT, MS_PER_MINUTE,
    ORANGE_ABOVE_MINUTES, RELAXED_REFRESH_MINUTES, STEADY_REFRESH_MINUTES,
    URGENT_REFRESH_MINUTES,
};

#[allow(clippy::cast_possible_wrap)]
const SIGNED_MS_PER_MINUTE: i64 = MS_PER_MINUTE as i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorPhase {
    Green,
    Orange,
    Red,
    DarkRed,
}

impl ColorPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Orange => "orange",
            Self::Red => "red",
            Self::DarkRed => "dark_red",
        }
    }

    /// Parses the stored spelling. Unknown values yield `None` so callers can
    /// fall back to recomputing the phase.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "green" => Some(Self::Green),
            "orange" => Some(Self::Orange),
            "red" => Some(Self::Red),
            "dark_red" => Some(Self::DarkRed),
            _ => None,
        }
    }

    #[must_use]
    pub const fn hex(self) -> &'static str {
        match self {
            Self::Green => "#4CAF50",
            Self::Orange => "#FF9800",
            Self::Red => "#F44336",
            Self::DarkRed => "#B71C1C",
        }
    }

    #[must_use]
    pub const fn status_message(self) -> &'static str {
        match self {
            Self::Green => "✅ 여유있어요",
            Self::Orange => "⚠️ 준비하세요",
            Self::Red => "🚨 지금 출발!",
            Self::DarkRed => "❌ 지각 위험!",
        }
    }

    /// 0 for the calmest phase, 3 for the most urgent.
    #[must_use]
    pub const fn urgency(self) -> u8 {
        match self {
            Self::Green => 0,
            Self::Orange => 1,
            Self::Red => 2,
            Self::DarkRed => 3,
        }
    }
}

impl fmt::Display for ColorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentationResult {
    pub color_phase: ColorPhase,
    pub time_remaining_text: String,
    pub progress_fraction: f64,
    pub next_refresh_interval_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WidgetPresentation {
    /// No active trip. Nothing was computed.
    Empty,
    Trip(PresentationResult),
}

impl WidgetPresentation {
    #[must_use]
    pub const fn empty_headline() -> &'static str {
        EMPTY_HEADLINE
    }

    #[must_use]
    pub const fn empty_hint() -> &'static str {
        EMPTY_HINT
    }

    #[must_use]
    pub fn as_trip(&self) -> Option<&PresentationResult> {
        match self {
            Self::Trip(result) => Some(result),
            Self::Empty => None,
        }
    }
}

#[must_use]
pub fn classify_phase(minutes_remaining: i64) -> ColorPhase {
    match minutes_remaining {
        m if m > GREEN_ABOVE_MINUTES => ColorPhase::Green,
        m if m > ORANGE_ABOVE_MINUTES => ColorPhase::Orange,
        m if m > 0 => ColorPhase::Red,
        _ => ColorPhase::DarkRed,
    }
}

#[must_use]
pub fn format_remaining(minutes_remaining: i64) -> String {
    if minutes_remaining <= 0 {
        return LATE_TEXT.to_string();
    }
    if minutes_remaining < 60 {
        return format!("{minutes_remaining}분");
    }

    let hours = minutes_remaining / 60;
    let minutes = minutes_remaining % 60;
    if minutes == 0 {
        format!("{hours}시간")
    } else {
        format!("{hours}시간 {minutes}분")
    }
}

/// Share of the wait-plus-travel window already behind us, in `[0.0, 1.0]`.
#[must_use]
pub fn progress_fraction(minutes_remaining: i64, travel_duration_minutes: u32) -> f64 {
    let total = minutes_remaining.saturating_add(i64::from(travel_duration_minutes));
    if total <= 0 {
        return 1.0;
    }

    #[allow(clippy::cast_precision_loss)]
    let fraction = 1.0 - (minutes_remaining as f64 / total as f64);
    fraction.clamp(0.0, 1.0)
}

#[must_use]
pub fn next_refresh_interval(minutes_remaining: i64) -> u32 {
    match minutes_remaining {
        m if m > GREEN_ABOVE_MINUTES => RELAXED_REFRESH_MINUTES,
        m if m > ORANGE_ABOVE_MINUTES => STEADY_REFRESH_MINUTES,
        _ => URGENT_REFRESH_MINUTES,
    }
}

#[must_use]
pub fn present(minutes_remaining: i64, travel_duration_minutes: u32) -> PresentationResult {
    PresentationResult {
        color_phase: classify_phase(minutes_remaining),
        time_remaining_text: format_remaining(minutes_remaining),
        progress_fraction: progress_fraction(minutes_remaining, travel_duration_minutes),
        next_refresh_interval_minutes: next_refresh_interval(minutes_remaining),
    }
}

/// Presentation of a snapshot as stored, without moving the clock.
#[must_use]
pub fn presentation_for(snapshot: &TripSnapshot) -> WidgetPresentation {
    if snapshot.has_trip() {
        WidgetPresentation::Trip(present(
            snapshot.minutes_remaining,
            snapshot.travel_duration_minutes,
        ))
    } else {
        WidgetPresentation::Empty
    }
}

/// Counts the snapshot down by `elapsed_minutes` and rewrites its derived
/// fields. The remaining minutes have no floor; a late trip keeps going
/// negative. Snapshots without a trip are returned unchanged.
#[must_use]
pub fn advance_snapshot(
    snapshot: &TripSnapshot,
    elapsed_minutes: u64,
) -> (TripSnapshot, WidgetPresentation) {
    if !snapshot.has_trip() {
        return (snapshot.clone(), WidgetPresentation::Empty);
    }

    let elapsed = i64::try_from(elapsed_minutes).unwrap_or(i64::MAX);
    let minutes_remaining = snapshot.minutes_remaining.saturating_sub(elapsed);
    let result = present(minutes_remaining, snapshot.travel_duration_minutes);

    let mut next = snapshot.clone();
    next.minutes_remaining = minutes_remaining;
    next.color_phase = Some(result.color_phase);
    next.time_remaining_text.clone_from(&result.time_remaining_text);

    (next, WidgetPresentation::Trip(result))
}

/// Whole minutes between two instants, floored. A clock that moved backwards
/// counts as no time elapsed.
#[must_use]
pub fn elapsed_minutes(last_updated: UnixTimeMs, now: UnixTimeMs) -> u64 {
    now.elapsed_since(last_updated) / MS_PER_MINUTE
}

/// Whole minutes until `departure_at`, rounded up: thirty seconds before
/// departure still reads as one minute, thirty seconds after reads as late.
#[must_use]
pub fn minutes_until(departure_at: UnixTimeMs, now: UnixTimeMs) -> i64 {
    let departure = i64::try_from(departure_at.as_millis()).unwrap_or(i64::MAX);
    let now = i64::try_from(now.as_millis()).unwrap_or(i64::MAX);
    let diff = departure.saturating_sub(now);

    diff.div_euclid(SIGNED_MS_PER_MINUTE) + i64::from(diff.rem_euclid(SIGNED_MS_PER_MINUTE) != 0)
}

/// One refresh-job step: bring `snapshot` forward to `now`.
///
/// With `prefer_absolute` set and a stored `departure_at`, the remaining
/// minutes are derived afresh from the departure instant and no error can
/// accumulate. Otherwise the stored count is reduced by the whole minutes
/// elapsed since `last_updated`, and `last_updated` moves forward by exactly
/// those minutes so the sub-minute remainder carries into the next refresh.
#[must_use]
pub fn refresh_snapshot(
    snapshot: &TripSnapshot,
    now: UnixTimeMs,
    prefer_absolute: bool,
) -> (TripSnapshot, WidgetPresentation) {
    if !snapshot.has_trip() {
        return (snapshot.clone(), WidgetPresentation::Empty);
    }

    if let Some(departure_at) = snapshot.departure_at.filter(|_| prefer_absolute) {
        let mut rebased = snapshot.clone();
        rebased.minutes_remaining = minutes_until(departure_at, now);
        rebased.last_updated = now;
        return advance_snapshot(&rebased, 0);
    }

    if now.is_before(snapshot.last_updated) {
        let mut rebased = snapshot.clone();
        rebased.last_updated = now;
        return advance_snapshot(&rebased, 0);
    }

    let elapsed = elapsed_minutes(snapshot.last_updated, now);
    let (mut next, presentation) = advance_snapshot(snapshot, elapsed);
    next.last_updated = snapshot
        .last_updated
        .add_millis(elapsed.saturating_mul(MS_PER_MINUTE));

    (next, presentation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TripId;
    use proptest::prelude::*;

    fn trip(minutes_remaining: i64, travel_duration_minutes: u32) -> TripSnapshot {
        TripSnapshot {
            trip_id: Some(TripId::new("trip-1")),
            title: "회의".into(),
            minutes_remaining,
            travel_duration_minutes,
            departure_time_formatted: "14:30".into(),
            arrival_time_formatted: "15:10".into(),
            last_updated: UnixTimeMs(1_000_000),
            ..TripSnapshot::default()
        }
    }

    mod phase_tests {
        use super::*;

        #[test]
        fn test_phase_boundaries() {
            assert_eq!(classify_phase(31), ColorPhase::Green);
            assert_eq!(classify_phase(30), ColorPhase::Orange);
            assert_eq!(classify_phase(16), ColorPhase::Orange);
            assert_eq!(classify_phase(15), ColorPhase::Red);
            assert_eq!(classify_phase(1), ColorPhase::Red);
            assert_eq!(classify_phase(0), ColorPhase::DarkRed);
            assert_eq!(classify_phase(-5), ColorPhase::DarkRed);
        }

        #[test]
        fn test_phase_extremes() {
            assert_eq!(classify_phase(i64::MAX), ColorPhase::Green);
            assert_eq!(classify_phase(i64::MIN), ColorPhase::DarkRed);
        }

        #[test]
        fn test_phase_parse_roundtrips_storage_spelling() {
            for phase in [
                ColorPhase::Green,
                ColorPhase::Orange,
                ColorPhase::Red,
                ColorPhase::DarkRed,
            ] {
                assert_eq!(ColorPhase::parse(phase.as_str()), Some(phase));
            }
            assert_eq!(ColorPhase::parse("blue"), None);
            assert_eq!(ColorPhase::parse(""), None);
        }

        #[test]
        fn test_phase_serde_spelling() {
            let json = serde_json::to_string(&ColorPhase::DarkRed).unwrap();
            assert_eq!(json, "\"dark_red\"");
        }

        #[test]
        fn test_phase_colors() {
            assert_eq!(ColorPhase::Green.hex(), "#4CAF50");
            assert_eq!(ColorPhase::Orange.hex(), "#FF9800");
            assert_eq!(ColorPhase::Red.hex(), "#F44336");
            assert_eq!(ColorPhase::DarkRed.hex(), "#B71C1C");
        }

        #[test]
        fn test_status_messages() {
            assert_eq!(ColorPhase::Red.status_message(), "🚨 지금 출발!");
            assert_eq!(ColorPhase::DarkRed.status_message(), "❌ 지각 위험!");
        }
    }

    mod format_tests {
        use super::*;

        #[test]
        fn test_format_late() {
            assert_eq!(format_remaining(0), LATE_TEXT);
            assert_eq!(format_remaining(-10), LATE_TEXT);
            assert_eq!(format_remaining(0), format_remaining(-10));
        }

        #[test]
        fn test_format_minutes_only() {
            assert_eq!(format_remaining(1), "1분");
            assert_eq!(format_remaining(45), "45분");
            assert_eq!(format_remaining(59), "59분");
        }

        #[test]
        fn test_format_hours() {
            assert_eq!(format_remaining(60), "1시간");
            assert_eq!(format_remaining(90), "1시간 30분");
            assert_eq!(format_remaining(121), "2시간 1분");
            assert_eq!(format_remaining(1440), "24시간");
        }
    }

    mod progress_tests {
        use super::*;

        #[test]
        fn test_progress_exact_values() {
            assert_eq!(progress_fraction(0, 30), 1.0);
            assert_eq!(progress_fraction(30, 30), 0.5);
            assert_eq!(progress_fraction(30, 0), 0.0);
            assert_eq!(progress_fraction(10, 30), 0.75);
        }

        #[test]
        fn test_progress_degenerate_total() {
            assert_eq!(progress_fraction(0, 0), 1.0);
            assert_eq!(progress_fraction(-5, 0), 1.0);
            assert_eq!(progress_fraction(-30, 30), 1.0);
        }

        #[test]
        fn test_progress_late_is_clamped() {
            assert_eq!(progress_fraction(-5, 30), 1.0);
        }

        #[test]
        fn test_progress_huge_values_stay_finite() {
            let p = progress_fraction(i64::MAX, u32::MAX);
            assert!(p.is_finite());
            assert!((0.0..=1.0).contains(&p));
        }
    }

    mod interval_tests {
        use super::*;

        #[test]
        fn test_interval_boundaries() {
            assert_eq!(next_refresh_interval(31), 15);
            assert_eq!(next_refresh_interval(30), 5);
            assert_eq!(next_refresh_interval(16), 5);
            assert_eq!(next_refresh_interval(15), 3);
            assert_eq!(next_refresh_interval(0), 3);
            assert_eq!(next_refresh_interval(-100), 3);
        }
    }

    mod snapshot_tests {
        use super::*;

        #[test]
        fn test_advance_counts_down() {
            let (next, presentation) = advance_snapshot(&trip(40, 20), 12);
            assert_eq!(next.minutes_remaining, 28);
            assert_eq!(next.color_phase, Some(ColorPhase::Orange));
            assert_eq!(next.time_remaining_text, "28분");

            let result = presentation.as_trip().unwrap();
            assert_eq!(result.color_phase, ColorPhase::Orange);
            assert_eq!(result.next_refresh_interval_minutes, 5);
        }

        #[test]
        fn test_advance_goes_negative() {
            let (next, presentation) = advance_snapshot(&trip(5, 20), 12);
            assert_eq!(next.minutes_remaining, -7);
            assert_eq!(next.time_remaining_text, LATE_TEXT);
            assert_eq!(
                presentation.as_trip().map(|r| r.color_phase),
                Some(ColorPhase::DarkRed)
            );
        }

        #[test]
        fn test_advance_without_trip_is_empty() {
            let mut empty = trip(40, 20);
            empty.trip_id = None;
            empty.time_remaining_text = "stale".into();

            let (next, presentation) = advance_snapshot(&empty, 10);
            assert_eq!(presentation, WidgetPresentation::Empty);
            assert_eq!(next, empty);
            assert_eq!(next.minutes_remaining, 40);
        }

        #[test]
        fn test_advance_is_idempotent_at_zero_elapsed() {
            let snapshot = trip(25, 10);
            let first = advance_snapshot(&snapshot, 0);
            let second = advance_snapshot(&snapshot, 0);
            assert_eq!(first, second);

            let again = advance_snapshot(&first.0, 0);
            assert_eq!(again, first);
        }

        #[test]
        fn test_elapsed_minutes_floors() {
            assert_eq!(elapsed_minutes(UnixTimeMs(0), UnixTimeMs(59_999)), 0);
            assert_eq!(elapsed_minutes(UnixTimeMs(0), UnixTimeMs(60_000)), 1);
            assert_eq!(elapsed_minutes(UnixTimeMs(0), UnixTimeMs(150_000)), 2);
        }

        #[test]
        fn test_elapsed_minutes_backwards_clock() {
            assert_eq!(elapsed_minutes(UnixTimeMs(120_000), UnixTimeMs(0)), 0);
        }

        #[test]
        fn test_minutes_until_rounds_up() {
            let departure = UnixTimeMs(10 * 60_000);
            assert_eq!(minutes_until(departure, UnixTimeMs(0)), 10);
            assert_eq!(minutes_until(departure, UnixTimeMs(9 * 60_000 + 30_000)), 1);
            assert_eq!(minutes_until(departure, UnixTimeMs(10 * 60_000)), 0);
            assert_eq!(minutes_until(departure, UnixTimeMs(10 * 60_000 + 30_000)), 0);
            assert_eq!(minutes_until(departure, UnixTimeMs(12 * 60_000)), -2);
        }

        #[test]
        fn test_refresh_keeps_sub_minute_remainder() {
            let snapshot = trip(40, 0);
            let start = snapshot.last_updated;

            let (first, _) = refresh_snapshot(&snapshot, start.add_millis(90_000), false);
            assert_eq!(first.minutes_remaining, 39);
            assert_eq!(first.last_updated, start.add_millis(60_000));

            let (second, _) = refresh_snapshot(&first, start.add_millis(120_000), false);
            assert_eq!(second.minutes_remaining, 38);
            assert_eq!(second.last_updated, start.add_millis(120_000));
        }

        #[test]
        fn test_refresh_rebases_backwards_clock() {
            let snapshot = trip(40, 0);
            let earlier = UnixTimeMs(snapshot.last_updated.as_millis() - 300_000);

            let (next, _) = refresh_snapshot(&snapshot, earlier, false);
            assert_eq!(next.minutes_remaining, 40);
            assert_eq!(next.last_updated, earlier);
        }

        #[test]
        fn test_refresh_prefers_absolute_departure() {
            let mut snapshot = trip(40, 0);
            // Stored count has drifted; the departure instant is authoritative.
            snapshot.departure_at = Some(snapshot.last_updated.add_millis(20 * 60_000));
            let now = snapshot.last_updated.add_millis(5 * 60_000);

            let (absolute, _) = refresh_snapshot(&snapshot, now, true);
            assert_eq!(absolute.minutes_remaining, 15);
            assert_eq!(absolute.last_updated, now);
            assert_eq!(absolute.color_phase, Some(ColorPhase::Red));

            let (relative, _) = refresh_snapshot(&snapshot, now, false);
            assert_eq!(relative.minutes_remaining, 35);
        }

        #[test]
        fn test_refresh_without_trip_is_untouched() {
            let snapshot = TripSnapshot::default();
            let (next, presentation) = refresh_snapshot(&snapshot, UnixTimeMs(10_000_000), true);
            assert_eq!(next, snapshot);
            assert_eq!(presentation, WidgetPresentation::Empty);
        }
    }

    proptest! {
        #[test]
        fn phase_never_calms_down_as_time_runs_out(m in any::<i64>(), step in 0i64..10_000) {
            let later = m.saturating_sub(step);
            prop_assert!(classify_phase(later).urgency() >= classify_phase(m).urgency());
        }

        #[test]
        fn progress_always_in_unit_interval(m in any::<i64>(), d in any::<u32>()) {
            let p = progress_fraction(m, d);
            prop_assert!((0.0..=1.0).contains(&p));
        }

        #[test]
        fn interval_tightens_with_urgency(m in -10_000i64..10_000) {
            let interval = next_refresh_interval(m);
            match classify_phase(m) {
                ColorPhase::Green => prop_assert_eq!(interval, 15),
                ColorPhase::Orange => prop_assert_eq!(interval, 5),
                ColorPhase::Red | ColorPhase::DarkRed => prop_assert_eq!(interval, 3),
            }
        }

        #[test]
        fn refresh_matches_advance_by_elapsed(m in -1_000i64..1_000, offset_ms in 0u64..10_000_000) {
            let snapshot = trip(m, 30);
            let now = snapshot.last_updated.add_millis(offset_ms);
            let (refreshed, _) = refresh_snapshot(&snapshot, now, false);
            let (advanced, _) = advance_snapshot(&snapshot, offset_ms / 60_000);
            prop_assert_eq!(refreshed.minutes_remaining, advanced.minutes_remaining);
            prop_assert!(refreshed.last_updated <= now);
        }
    }
}
