//! Day availability grid: a read-only projection of the appointments on a date.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use torque_core::{DomainError, DomainResult, SiteId};

use crate::conflict::{TimeInterval, minute_of_day};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Opening hours and slot granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub slot_minutes: u32,
}

impl BusinessHours {
    pub fn new(open: NaiveTime, close: NaiveTime, slot_minutes: u32) -> DomainResult<Self> {
        if slot_minutes == 0 || slot_minutes > MINUTES_PER_DAY {
            return Err(DomainError::validation("slot size must be between 1 and 1440 minutes"));
        }
        if open >= close {
            return Err(DomainError::validation("opening time must precede closing time"));
        }
        Ok(Self {
            open,
            close,
            slot_minutes,
        })
    }

    /// Whole slots between opening and closing time. A trailing remainder
    /// shorter than one slot is not offered.
    pub fn slots(&self) -> Vec<TimeInterval> {
        let close = minute_of_day(self.close);
        let mut out = Vec::new();
        let mut start = minute_of_day(self.open);
        if self.slot_minutes == 0 {
            return out;
        }
        while let Some(end) = start.checked_add(self.slot_minutes).filter(|end| *end <= close) {
            if let Ok(slot) = TimeInterval::new(start, end) {
                out.push(slot);
            }
            start = end;
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub occupied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub site_id: Option<SiteId>,
    pub slots: Vec<Slot>,
}

impl DayAvailability {
    pub fn free_slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| !s.occupied)
    }
}

fn time_of(minute: u32) -> NaiveTime {
    NaiveTime::from_num_seconds_from_midnight_opt(minute * 60, 0).unwrap_or(NaiveTime::MIN)
}

/// Mark each slot of the day occupied if any booked interval overlaps it.
pub fn availability<'a, I>(
    date: NaiveDate,
    site_id: Option<SiteId>,
    hours: &BusinessHours,
    booked: I,
) -> DayAvailability
where
    I: IntoIterator<Item = &'a TimeInterval>,
{
    let booked: Vec<&TimeInterval> = booked.into_iter().collect();
    let slots = hours
        .slots()
        .into_iter()
        .map(|slot| Slot {
            start: time_of(slot.start()),
            end: time_of(slot.end()),
            occupied: booked.iter().any(|b| b.overlaps(&slot)),
        })
        .collect();

    DayAvailability {
        date,
        site_id,
        slots,
    }
}
