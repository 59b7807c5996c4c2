//! Accounting-week arithmetic and the two caps' reset instants.
//!
//! Week boundaries are a pure function of a fixed anchor date: every window
//! starts at `anchor + 7k` days. Moving the upstream reset day is a matter of
//! changing the anchor; stored history needs no migration.

use crate::models::CapKind;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WeekWindow {
    pub start: NaiveDate,
}

impl WeekWindow {
    /// The window `[start, start + 7)` holding `date`. Dates before the
    /// anchor floor towards earlier windows.
    pub fn containing(anchor: NaiveDate, date: NaiveDate) -> Self {
        let elapsed = (date - anchor).num_days();
        let weeks = elapsed.div_euclid(7);
        Self {
            start: anchor + Duration::days(weeks * 7),
        }
    }

    /// First day after the window; the reset instants hang off its midnight.
    pub fn end(&self) -> NaiveDate {
        self.start + Duration::days(7)
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let start = self.start;
        (0..7).map(move |i| start + Duration::days(i))
    }

    /// Days elapsed including `today`, in `1..=7`.
    pub fn days_elapsed(&self, today: NaiveDate) -> i64 {
        ((today - self.start).num_days() + 1).clamp(1, 7)
    }

    pub fn days_remaining(&self, today: NaiveDate) -> i64 {
        7 - self.days_elapsed(today)
    }
}

/// Hours after a week boundary's midnight at which each cap resets upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetSchedule {
    pub all_models_offset_hours: i64,
    pub primary_offset_hours: i64,
}

impl ResetSchedule {
    pub fn offset_hours(&self, cap: CapKind) -> i64 {
        match cap {
            CapKind::AllModels => self.all_models_offset_hours,
            CapKind::Primary => self.primary_offset_hours,
        }
    }

    /// Cap that resets first. Equal offsets count ALL-MODELS as first.
    pub fn first_cap(&self) -> CapKind {
        if self.primary_offset_hours < self.all_models_offset_hours {
            CapKind::Primary
        } else {
            CapKind::AllModels
        }
    }

    /// Zero when both caps share an instant.
    pub fn dead_zone_hours(&self) -> i64 {
        (self.primary_offset_hours - self.all_models_offset_hours).abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetInstants {
    pub first_cap: CapKind,
    pub first: NaiveDateTime,
    pub second: NaiveDateTime,
}

impl ResetInstants {
    pub fn at(boundary: NaiveDate, schedule: &ResetSchedule) -> Self {
        let midnight = boundary.and_time(NaiveTime::MIN);
        let first_cap = schedule.first_cap();
        Self {
            first_cap,
            first: midnight + Duration::hours(schedule.offset_hours(first_cap)),
            second: midnight + Duration::hours(schedule.offset_hours(first_cap.other())),
        }
    }

    pub fn dead_zone_active(&self, now: NaiveDateTime) -> bool {
        self.first <= now && now < self.second
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResetStatus {
    /// One cap has reset, the other is still counting.
    DeadZone {
        reset_cap: CapKind,
        live_cap: CapKind,
        hours_remaining: f64,
    },
    BothReset,
    /// First reset is less than a day away.
    Imminent {
        first_cap: CapKind,
        hours_to_first: f64,
        hours_to_second: f64,
    },
    Scheduled {
        first_cap: CapKind,
        first_at: NaiveDateTime,
        second_at: NaiveDateTime,
        dead_zone_hours: i64,
    },
}

fn hours_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_seconds() as f64 / 3600.0
}

/// Status of the resets hanging off `boundary` (a window's end date) as seen at `now`.
pub fn reset_status(
    boundary: NaiveDate,
    schedule: &ResetSchedule,
    now: NaiveDateTime,
) -> ResetStatus {
    let instants = ResetInstants::at(boundary, schedule);

    if instants.dead_zone_active(now) {
        return ResetStatus::DeadZone {
            reset_cap: instants.first_cap,
            live_cap: instants.first_cap.other(),
            hours_remaining: hours_between(now, instants.second),
        };
    }
    if now >= instants.second {
        return ResetStatus::BothReset;
    }

    let hours_to_first = hours_between(now, instants.first);
    if hours_to_first < 24.0 {
        ResetStatus::Imminent {
            first_cap: instants.first_cap,
            hours_to_first,
            hours_to_second: hours_between(now, instants.second),
        }
    } else {
        ResetStatus::Scheduled {
            first_cap: instants.first_cap,
            first_at: instants.first,
            second_at: instants.second,
            dead_zone_hours: schedule.dead_zone_hours(),
        }
    }
}

/// Live status for the window holding `now`. Right after a rollover the
/// previous boundary's later reset may still be pending, so that boundary is
/// reported until it has fully passed.
pub fn current_reset_status(
    window: &WeekWindow,
    schedule: &ResetSchedule,
    now: NaiveDateTime,
) -> ResetStatus {
    let previous = ResetInstants::at(window.start, schedule);
    if now < previous.second {
        reset_status(window.start, schedule, now)
    } else {
        reset_status(window.end(), schedule, now)
    }
}

impl ResetStatus {
    pub fn dead_zone_active(&self) -> bool {
        matches!(self, ResetStatus::DeadZone { .. })
    }

    pub fn is_imminent(&self) -> bool {
        matches!(self, ResetStatus::Imminent { .. })
    }

    pub fn describe(&self, primary_label: &str) -> String {
        let name = |cap: CapKind| cap.display_name(primary_label);
        match self {
            ResetStatus::DeadZone {
                reset_cap,
                live_cap,
                hours_remaining,
            } => format!(
                "in dead zone: {} reset, {} still live ({hours_remaining:.1}h remaining)",
                name(*reset_cap),
                name(*live_cap),
            ),
            ResetStatus::BothReset => "both caps reset".into(),
            ResetStatus::Imminent {
                first_cap,
                hours_to_first,
                hours_to_second,
            } => {
                if (hours_to_second - hours_to_first).abs() < f64::EPSILON {
                    format!("both caps reset in {hours_to_first:.1}h")
                } else {
                    format!(
                        "{} resets in {hours_to_first:.1}h | {} in {hours_to_second:.1}h",
                        name(*first_cap),
                        name(first_cap.other()),
                    )
                }
            }
            ResetStatus::Scheduled {
                first_cap,
                first_at,
                second_at,
                dead_zone_hours,
            } => {
                let stamp =
                    |at: &NaiveDateTime| at.format("%b %d %I%p").to_string().to_lowercase();
                if *dead_zone_hours == 0 {
                    format!("both caps {}", stamp(first_at))
                } else {
                    format!(
                        "{} {} | {} {} | {dead_zone_hours}h dead zone",
                        name(*first_cap),
                        stamp(first_at),
                        name(first_cap.other()),
                        stamp(second_at),
                    )
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn at(day: NaiveDate, hours: i64) -> NaiveDateTime {
        day.and_time(NaiveTime::MIN) + Duration::hours(hours)
    }

    fn schedule() -> ResetSchedule {
        ResetSchedule {
            all_models_offset_hours: 12,
            primary_offset_hours: 26,
        }
    }

    #[test]
    fn window_always_contains_query_date() {
        let anchors = [date(2026, 2, 7), date(2024, 1, 1), date(2030, 12, 31)];
        for anchor in anchors {
            for offset in -400..400 {
                let day = anchor + Duration::days(offset);
                let window = WeekWindow::containing(anchor, day);
                assert!(window.start <= day, "{anchor} {day}");
                assert!(window.start + Duration::days(7) > day, "{anchor} {day}");
                assert_eq!((window.start - anchor).num_days().rem_euclid(7), 0);
            }
        }
    }

    #[test]
    fn anchor_day_starts_a_window() {
        let anchor = date(2026, 2, 7);
        assert_eq!(WeekWindow::containing(anchor, anchor).start, anchor);
        assert_eq!(
            WeekWindow::containing(anchor, date(2026, 2, 13)).start,
            anchor
        );
        assert_eq!(
            WeekWindow::containing(anchor, date(2026, 2, 14)).start,
            date(2026, 2, 14)
        );
    }

    #[test]
    fn days_elapsed_counts_today_and_stays_in_range() {
        let window = WeekWindow {
            start: date(2026, 2, 7),
        };
        assert_eq!(window.days_elapsed(date(2026, 2, 7)), 1);
        assert_eq!(window.days_remaining(date(2026, 2, 7)), 6);
        assert_eq!(window.days_elapsed(date(2026, 2, 13)), 7);
        assert_eq!(window.days_remaining(date(2026, 2, 13)), 0);
        assert_eq!(window.days_elapsed(date(2026, 2, 1)), 1);
        assert_eq!(window.days().count(), 7);
        assert_eq!(window.end(), date(2026, 2, 14));
    }

    #[test]
    fn dead_zone_between_the_two_resets() {
        let end = date(2026, 2, 14);
        let status = reset_status(end, &schedule(), at(end, 14));
        assert!(status.dead_zone_active());
        match status {
            ResetStatus::DeadZone {
                reset_cap,
                live_cap,
                hours_remaining,
            } => {
                assert_eq!(reset_cap, CapKind::AllModels);
                assert_eq!(live_cap, CapKind::Primary);
                assert!((hours_remaining - 12.0).abs() < 1e-9);
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn past_later_reset_reports_both_reset() {
        let end = date(2026, 2, 14);
        let status = reset_status(end, &schedule(), at(end, 30));
        assert_eq!(status, ResetStatus::BothReset);
        assert_eq!(status.describe("sonnet"), "both caps reset");
    }

    #[test]
    fn before_first_reset_counts_down() {
        let end = date(2026, 2, 14);
        let status = reset_status(end, &schedule(), at(end, 2));
        assert!(!status.dead_zone_active());
        assert_eq!(
            status,
            ResetStatus::Imminent {
                first_cap: CapKind::AllModels,
                hours_to_first: 10.0,
                hours_to_second: 24.0,
            }
        );
        assert_eq!(
            status.describe("sonnet"),
            "all-models resets in 10.0h | sonnet in 24.0h"
        );
    }

    #[test]
    fn far_resets_use_calendar_labels() {
        let end = date(2026, 2, 14);
        let status = reset_status(end, &schedule(), at(end, -72));
        assert_eq!(
            status.describe("sonnet"),
            "all-models feb 14 12pm | sonnet feb 15 02am | 14h dead zone"
        );
    }

    #[test]
    fn shared_reset_instant_has_no_dead_zone() {
        let shared = ResetSchedule {
            all_models_offset_hours: 12,
            primary_offset_hours: 12,
        };
        let end = date(2026, 2, 14);
        assert_eq!(shared.dead_zone_hours(), 0);
        assert_eq!(reset_status(end, &shared, at(end, 12)), ResetStatus::BothReset);
        assert_eq!(
            reset_status(end, &shared, at(end, 6)).describe("sonnet"),
            "both caps reset in 6.0h"
        );
    }

    #[test]
    fn primary_may_reset_first() {
        let flipped = ResetSchedule {
            all_models_offset_hours: 20,
            primary_offset_hours: 4,
        };
        let instants = ResetInstants::at(date(2026, 2, 14), &flipped);
        assert_eq!(instants.first_cap, CapKind::Primary);
        assert_eq!(instants.second, at(date(2026, 2, 14), 20));
        assert!(instants.dead_zone_active(at(date(2026, 2, 14), 5)));
    }

    #[test]
    fn live_status_looks_back_across_rollover() {
        let anchor = date(2026, 2, 7);
        let window = WeekWindow::containing(anchor, date(2026, 2, 14));
        assert_eq!(window.start, date(2026, 2, 14));

        let during = current_reset_status(&window, &schedule(), at(date(2026, 2, 14), 14));
        assert!(during.dead_zone_active());

        let later = current_reset_status(&window, &schedule(), at(date(2026, 2, 16), 0));
        assert!(matches!(later, ResetStatus::Scheduled { .. }));
    }
}
