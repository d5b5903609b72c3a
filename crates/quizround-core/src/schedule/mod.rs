//! Slot calculator: maps the current instant to round-opening decisions.
//!
//! Slots are local times of day in a fixed UTC offset. A slot is *due*
//! while `slot <= now < slot + activation_window`. Whether a due slot still
//! needs a round is answered by looking for any existing round whose
//! `started_at` falls inside the slot's coverage window
//! `[slot - tolerance, slot + round_duration + tolerance]`, never by a
//! one-shot flag, so a restarted driver cannot open a slot twice.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::config::{ConfigError, ScheduleConfig};
use crate::model::RoundId;

/// Outcome of asking whether a round should open at `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDecision {
    /// A slot is due and no round covers it yet.
    Open {
        /// The slot instant the new round belongs to.
        slot_at: DateTime<Utc>,
    },
    /// A slot is due but a round already covers it.
    AlreadyOpened {
        /// The due slot.
        slot_at: DateTime<Utc>,
        /// The round covering it.
        round_id: RoundId,
    },
    /// No slot is due.
    Idle {
        /// The next slot strictly after `now`.
        next_slot_at: DateTime<Utc>,
    },
}

/// Timing of a round opened for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTiming {
    /// The configured slot instant.
    pub slot_at: DateTime<Utc>,
    /// Submissions open.
    pub started_at: DateTime<Utc>,
    /// Prize eligibility ends.
    pub prize_window_ends_at: DateTime<Utc>,
    /// Submissions close.
    pub ends_at: DateTime<Utc>,
}

/// Validated daily schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    slots: Vec<NaiveTime>,
    offset: FixedOffset,
    round_duration: Duration,
    prize_window: Duration,
    activation_window: Duration,
    tolerance: Duration,
}

impl Schedule {
    /// Build a schedule from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the configuration is invalid.
    pub fn from_config(config: &ScheduleConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let slots = config.parsed_slots()?;
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).ok_or_else(|| {
            ConfigError::Validation(format!(
                "invalid utc offset: {} minutes",
                config.utc_offset_minutes
            ))
        })?;

        Ok(Self {
            slots,
            offset,
            round_duration: secs(config.round_duration_secs)?,
            prize_window: secs(config.prize_window_secs)?,
            activation_window: secs(config.activation_window_secs)?,
            tolerance: secs(config.slot_tolerance_secs)?,
        })
    }

    /// Length of a round.
    #[must_use]
    pub const fn round_duration(&self) -> Duration {
        self.round_duration
    }

    /// The due slot at `now`, if any.
    ///
    /// When activation windows of two slots overlap the most recent slot
    /// wins.
    #[must_use]
    pub fn due_slot(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.with_timezone(&self.offset).date_naive();
        let dates = [today.pred_opt(), Some(today)];
        dates
            .into_iter()
            .flatten()
            .flat_map(|date| self.slots_on(date))
            .filter(|slot| *slot <= now && now < *slot + self.activation_window)
            .max()
    }

    /// The first slot strictly after `now`.
    ///
    /// Rolls over to the first slot of the next local day once today's
    /// slots are exhausted.
    #[must_use]
    pub fn next_slot_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.with_timezone(&self.offset).date_naive();
        [Some(today), today.succ_opt()]
            .into_iter()
            .flatten()
            .flat_map(|date| self.slots_on(date))
            .find(|slot| *slot > now)
            .unwrap_or_else(|| now + Duration::days(1))
    }

    /// The interval in which an existing round's `started_at` means the slot
    /// is already covered.
    #[must_use]
    pub fn coverage_window(&self, slot_at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            slot_at - self.tolerance,
            slot_at + self.round_duration + self.tolerance,
        )
    }

    /// Timing for a round opened at `slot_at`.
    ///
    /// Rounds are anchored to the slot, not to the tick that opened them, so
    /// a late tick does not shift the prize window.
    #[must_use]
    pub fn round_timing(&self, slot_at: DateTime<Utc>) -> RoundTiming {
        RoundTiming {
            slot_at,
            started_at: slot_at,
            prize_window_ends_at: slot_at + self.prize_window,
            ends_at: slot_at + self.round_duration,
        }
    }

    /// Decide whether a round should open at `now`.
    ///
    /// `existing` is called with the coverage window of the due slot and
    /// returns the id of any round whose `started_at` lies inside it.
    ///
    /// # Errors
    ///
    /// Propagates errors from `existing`.
    pub fn should_open_round<F, E>(
        &self,
        now: DateTime<Utc>,
        existing: F,
    ) -> Result<SlotDecision, E>
    where
        F: FnOnce(DateTime<Utc>, DateTime<Utc>) -> Result<Option<RoundId>, E>,
    {
        let Some(slot_at) = self.due_slot(now) else {
            return Ok(SlotDecision::Idle {
                next_slot_at: self.next_slot_after(now),
            });
        };

        let (from, to) = self.coverage_window(slot_at);
        Ok(match existing(from, to)? {
            Some(round_id) => SlotDecision::AlreadyOpened { slot_at, round_id },
            None => SlotDecision::Open { slot_at },
        })
    }

    fn slots_on(&self, date: NaiveDate) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.slots.iter().filter_map(move |slot| {
            self.offset
                .from_local_datetime(&date.and_time(*slot))
                .single()
                .map(|dt| dt.with_timezone(&Utc))
        })
    }
}

fn secs(value: u64) -> Result<Duration, ConfigError> {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| ConfigError::Validation(format!("duration out of range: {value}s")))
}

#[cfg(test)]
mod tests {
    use chrono::Timelike;

    use super::*;

    fn schedule(slots: &[&str], offset_minutes: i32) -> Schedule {
        Schedule::from_config(&ScheduleConfig {
            slots: slots.iter().map(ToString::to_string).collect(),
            utc_offset_minutes: offset_minutes,
            ..ScheduleConfig::default()
        })
        .unwrap()
    }

    fn utc(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, h, m, s).unwrap()
    }

    #[test]
    fn test_due_slot_inside_activation_window() {
        let s = schedule(&["09:00", "19:00"], 0);
        assert_eq!(s.due_slot(utc(19, 0, 0)), Some(utc(19, 0, 0)));
        assert_eq!(s.due_slot(utc(19, 1, 59)), Some(utc(19, 0, 0)));
        assert_eq!(s.due_slot(utc(19, 2, 0)), None);
        assert_eq!(s.due_slot(utc(18, 59, 59)), None);
    }

    #[test]
    fn test_local_offset_shifts_slots() {
        // 19:00 at UTC+05:30 is 13:30 UTC.
        let s = schedule(&["19:00"], 330);
        assert_eq!(s.due_slot(utc(13, 30, 5)), Some(utc(13, 30, 0)));
        assert_eq!(s.due_slot(utc(19, 0, 5)), None);
    }

    #[test]
    fn test_slot_near_midnight_uses_previous_local_day() {
        let s = schedule(&["23:59"], 0);
        let after_midnight = Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 30).unwrap();
        assert_eq!(s.due_slot(after_midnight), Some(utc(23, 59, 0)));
    }

    #[test]
    fn test_next_slot_rolls_over_to_next_day() {
        let s = schedule(&["09:00", "19:00"], 0);
        assert_eq!(s.next_slot_after(utc(8, 0, 0)), utc(9, 0, 0));
        assert_eq!(s.next_slot_after(utc(9, 0, 0)), utc(19, 0, 0));
        let tomorrow = s.next_slot_after(utc(20, 0, 0));
        assert_eq!(tomorrow, Utc.with_ymd_and_hms(2026, 3, 15, 9, 0, 0).unwrap());
        assert_eq!(tomorrow.hour(), 9);
    }

    #[test]
    fn test_round_timing_is_anchored_to_slot() {
        let s = schedule(&["19:00"], 0);
        let timing = s.round_timing(utc(19, 0, 0));
        assert_eq!(timing.started_at, utc(19, 0, 0));
        assert_eq!(timing.prize_window_ends_at, utc(19, 2, 0));
        assert_eq!(timing.ends_at, utc(19, 25, 0));
        assert_eq!(timing.ends_at - timing.started_at, s.round_duration());
    }

    #[test]
    fn test_should_open_round_consults_existing_rounds() {
        let s = schedule(&["19:00"], 0);

        let decision = s
            .should_open_round(utc(19, 0, 5), |from, to| {
                assert_eq!(from, utc(18, 59, 0));
                assert_eq!(to, utc(19, 26, 0));
                Ok::<_, ()>(None)
            })
            .unwrap();
        assert_eq!(decision, SlotDecision::Open { slot_at: utc(19, 0, 0) });

        let decision = s
            .should_open_round(utc(19, 0, 5), |_, _| Ok::<_, ()>(Some(7)))
            .unwrap();
        assert_eq!(
            decision,
            SlotDecision::AlreadyOpened {
                slot_at: utc(19, 0, 0),
                round_id: 7
            }
        );

        let decision = s
            .should_open_round(utc(19, 5, 0), |_, _| -> Result<Option<RoundId>, ()> {
                panic!("no slot is due, existing rounds must not be queried")
            })
            .unwrap();
        assert!(matches!(decision, SlotDecision::Idle { .. }));
    }

    #[test]
    fn test_polling_every_100ms_opens_slot_once() {
        let s = schedule(&["19:00"], 0);
        let mut started: Vec<DateTime<Utc>> = Vec::new();
        let mut now = utc(18, 59, 0);
        let end = utc(19, 3, 0);

        while now < end {
            let decision = s
                .should_open_round(now, |from, to| {
                    Ok::<_, ()>(
                        started
                            .iter()
                            .position(|t| from <= *t && *t <= to)
                            .map(|i| i as RoundId + 1),
                    )
                })
                .unwrap();
            if let SlotDecision::Open { slot_at } = decision {
                started.push(s.round_timing(slot_at).started_at);
            }
            now += Duration::milliseconds(100);
        }

        assert_eq!(started, vec![utc(19, 0, 0)]);
    }
}
