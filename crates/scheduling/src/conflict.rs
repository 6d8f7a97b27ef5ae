//! Scheduling conflict detection.
//!
//! Appointments occupy half-open minute intervals `[start, end)` on a calendar
//! date. Two intervals overlap iff `a.start < b.end && a.end > b.start`, so
//! back-to-back bookings (09:00-09:30 then 09:30-10:00) do not conflict.

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use torque_core::{DomainError, DomainResult, MechanicId, SiteId};

use crate::appointment::{Appointment, AppointmentId};

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Half-open interval of minutes since midnight.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    start: u32,
    end: u32,
}

impl TimeInterval {
    pub fn new(start: u32, end: u32) -> DomainResult<Self> {
        if start >= end {
            return Err(DomainError::validation("interval end must be after its start"));
        }
        if end > MINUTES_PER_DAY {
            return Err(DomainError::validation("interval must end by midnight"));
        }
        Ok(Self { start, end })
    }

    /// Interval starting at `time` and lasting `duration_minutes`.
    pub fn starting_at(time: NaiveTime, duration_minutes: u32) -> DomainResult<Self> {
        let start = minute_of_day(time);
        let end = start
            .checked_add(duration_minutes)
            .ok_or_else(|| DomainError::validation("duration too large"))?;
        Self::new(start, end)
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && self.end > other.start
    }
}

pub fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// True if `candidate` intersects any of `existing`.
pub fn has_conflict<'a, I>(candidate: &TimeInterval, existing: I) -> bool
where
    I: IntoIterator<Item = &'a TimeInterval>,
{
    existing.into_iter().any(|other| candidate.overlaps(other))
}

/// A candidate booking to check against the appointments already on the books.
///
/// Scope: an existing appointment competes with the candidate when they share
/// the site or share the assigned mechanic. A candidate with neither a site
/// nor a mechanic competes with every appointment on that date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictQuery {
    pub date: NaiveDate,
    pub interval: TimeInterval,
    pub mechanic_id: Option<MechanicId>,
    pub site_id: Option<SiteId>,
    /// Record being updated; never conflicts with itself.
    pub exclude: Option<AppointmentId>,
}

impl ConflictQuery {
    pub fn new(
        date: NaiveDate,
        time: NaiveTime,
        duration_minutes: u32,
        mechanic_id: Option<MechanicId>,
        site_id: Option<SiteId>,
    ) -> DomainResult<Self> {
        Ok(Self {
            date,
            interval: TimeInterval::starting_at(time, duration_minutes)?,
            mechanic_id,
            site_id,
            exclude: None,
        })
    }

    pub fn excluding(mut self, id: AppointmentId) -> Self {
        self.exclude = Some(id);
        self
    }

    /// Whether `appointment` is one the candidate has to be checked against.
    pub fn competes_with(&self, appointment: &Appointment) -> bool {
        if Some(appointment.id_typed()) == self.exclude {
            return false;
        }
        if !appointment.status().is_active() {
            return false;
        }
        if appointment.schedule().date != self.date {
            return false;
        }
        match (self.site_id, self.mechanic_id) {
            (None, None) => true,
            (site, mechanic) => {
                let same_site = site.is_some() && appointment.site_id() == site;
                let same_mechanic = mechanic.is_some() && appointment.mechanic_id() == mechanic;
                same_site || same_mechanic
            }
        }
    }

    /// First competing appointment whose interval overlaps the candidate.
    pub fn first_conflict<'a, I>(&self, appointments: I) -> Option<&'a Appointment>
    where
        I: IntoIterator<Item = &'a Appointment>,
    {
        appointments.into_iter().find(|a| {
            self.competes_with(a)
                && a.schedule()
                    .interval()
                    .is_ok_and(|existing| self.interval.overlaps(&existing))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn adjacent_intervals_do_not_overlap() {
        let booked = TimeInterval::starting_at(at(9, 0), 30).unwrap();
        let overlapping = TimeInterval::starting_at(at(9, 15), 30).unwrap();
        let adjacent = TimeInterval::starting_at(at(9, 30), 30).unwrap();

        assert!(booked.overlaps(&overlapping));
        assert!(overlapping.overlaps(&booked));
        assert!(!booked.overlaps(&adjacent));
        assert!(!adjacent.overlaps(&booked));
    }

    #[test]
    fn containment_is_an_overlap() {
        let outer = TimeInterval::new(600, 720).unwrap();
        let inner = TimeInterval::new(630, 640).unwrap();
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn empty_or_overnight_intervals_are_rejected() {
        assert!(TimeInterval::new(600, 600).is_err());
        assert!(TimeInterval::starting_at(at(23, 30), 60).is_err());
        assert!(TimeInterval::starting_at(at(23, 30), 30).is_ok());
    }

    fn covers(interval: &TimeInterval, minute: u32) -> bool {
        interval.start <= minute && minute < interval.end
    }

    fn interval_strategy() -> impl Strategy<Value = TimeInterval> {
        (0u32..MINUTES_PER_DAY - 1)
            .prop_flat_map(|start| (Just(start), (start + 1)..=MINUTES_PER_DAY))
            .prop_map(|(start, end)| TimeInterval::new(start, end).unwrap())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the overlap test agrees with minute-by-minute occupancy.
        #[test]
        fn has_conflict_matches_brute_force(
            candidate in interval_strategy(),
            existing in prop::collection::vec(interval_strategy(), 0..12)
        ) {
            let brute = existing.iter().any(|other| {
                (candidate.start..candidate.end).any(|m| covers(other, m))
            });
            prop_assert_eq!(has_conflict(&candidate, &existing), brute);
        }

        /// Property: accepting only conflict-free candidates keeps the book
        /// pairwise disjoint.
        #[test]
        fn accepted_bookings_never_overlap(
            requests in prop::collection::vec(interval_strategy(), 0..40)
        ) {
            let mut booked: Vec<TimeInterval> = Vec::new();
            for req in requests {
                if !has_conflict(&req, &booked) {
                    booked.push(req);
                }
            }

            let mut occupancy = vec![0u8; MINUTES_PER_DAY as usize];
            for b in &booked {
                for m in b.start..b.end {
                    occupancy[m as usize] += 1;
                }
            }
            prop_assert!(occupancy.iter().all(|&n| n <= 1));
        }
    }
}
