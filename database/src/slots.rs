//! Appointment slot state machine.
//!
//! Transitions are pure functions on [`Appointment`] so the lifecycle
//! invariants can be tested without a running store; the controllers
//! persist the results as sequential single-document writes.

use chrono::{DateTime, Duration, Utc};
use mongodb::bson::oid::ObjectId;
use thiserror::Error;

use crate::entities::{Appointment, HospitalSnapshot};

/// Fixed slot width used when bulk-creating open appointments.
pub const SLOT_INTERVAL_MINUTES: i64 = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("appointment is already booked")]
    AlreadyBooked,
    #[error("appointment is not booked")]
    NotBooked,
    #[error("appointment is already cancelled")]
    AlreadyCancelled,
}

impl Appointment {
    /// A fresh open slot owned by `created_by`.
    pub fn open_slot(created_by: ObjectId, time_slot: DateTime<Utc>) -> Self {
        Appointment {
            id: None,
            time_slot,
            created_by,
            profile: None,
            hospital: None,
            cancelled: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.profile.is_none() && !self.cancelled
    }

    pub fn is_booked(&self) -> bool {
        self.profile.is_some() && !self.cancelled
    }

    /// Open -> Booked. The hospital snapshot is captured here and never
    /// synced with the live document afterwards.
    pub fn book(&mut self, profile: ObjectId, hospital: HospitalSnapshot) -> Result<(), SlotError> {
        if self.cancelled {
            return Err(SlotError::AlreadyCancelled);
        }
        if self.profile.is_some() {
            return Err(SlotError::AlreadyBooked);
        }
        self.profile = Some(profile);
        self.hospital = Some(hospital);
        Ok(())
    }

    /// Booked -> Open; used for the source slot of a reschedule. The slot
    /// becomes available for a new booking rather than being deleted.
    pub fn release(&mut self) {
        self.profile = None;
        self.hospital = None;
    }

    /// Booked -> Cancelled. Profile and hospital snapshot stay on the
    /// record for history; the returned replacement slot restores the
    /// freed capacity with the same owner and time slot.
    pub fn cancel(&mut self) -> Result<Appointment, SlotError> {
        if self.cancelled {
            return Err(SlotError::AlreadyCancelled);
        }
        if self.profile.is_none() {
            return Err(SlotError::NotBooked);
        }
        self.cancelled = true;
        Ok(Appointment::open_slot(self.created_by, self.time_slot))
    }
}

/// One open slot every [`SLOT_INTERVAL_MINUTES`] from `start` (inclusive)
/// to `end` (exclusive).
pub fn generate_slots(
    created_by: ObjectId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<Appointment> {
    let step = Duration::minutes(SLOT_INTERVAL_MINUTES);
    let mut slots = Vec::new();
    let mut at = start;
    while at < end {
        slots.push(Appointment::open_slot(created_by, at));
        at += step;
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, 8, 0, 0).unwrap()
    }

    fn snapshot() -> HospitalSnapshot {
        HospitalSnapshot {
            id: ObjectId::new(),
            name: "General Hospital".to_string(),
        }
    }

    #[test]
    fn forty_minute_window_yields_two_slots() {
        let owner = ObjectId::new();
        let slots = generate_slots(owner, t0(), t0() + Duration::minutes(40));
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].time_slot, t0());
        assert_eq!(slots[1].time_slot, t0() + Duration::minutes(20));
        assert!(slots.iter().all(|s| s.is_open() && s.created_by == owner));
    }

    #[test]
    fn end_is_exclusive() {
        let slots = generate_slots(ObjectId::new(), t0(), t0() + Duration::minutes(20));
        assert_eq!(slots.len(), 1);
        assert!(generate_slots(ObjectId::new(), t0(), t0()).is_empty());
    }

    #[test]
    fn book_succeeds_exactly_once() {
        let mut slot = Appointment::open_slot(ObjectId::new(), t0());
        let profile = ObjectId::new();
        assert_eq!(slot.book(profile, snapshot()), Ok(()));
        assert!(slot.is_booked());
        assert_eq!(slot.profile, Some(profile));
        assert_eq!(
            slot.book(ObjectId::new(), snapshot()),
            Err(SlotError::AlreadyBooked)
        );
    }

    #[test]
    fn release_reopens_the_slot() {
        let mut slot = Appointment::open_slot(ObjectId::new(), t0());
        slot.book(ObjectId::new(), snapshot()).unwrap();
        slot.release();
        assert!(slot.is_open());
        assert_eq!(slot.profile, None);
        assert_eq!(slot.hospital, None);
        // reopened capacity is bookable again
        assert_eq!(slot.book(ObjectId::new(), snapshot()), Ok(()));
    }

    #[test]
    fn cancel_keeps_history_and_replaces_capacity() {
        let owner = ObjectId::new();
        let profile = ObjectId::new();
        let mut slot = Appointment::open_slot(owner, t0());
        slot.book(profile, snapshot()).unwrap();

        let replacement = slot.cancel().unwrap();
        assert!(slot.cancelled);
        assert_eq!(slot.profile, Some(profile));
        assert!(slot.hospital.is_some());
        assert!(replacement.is_open());
        assert_eq!(replacement.created_by, owner);
        assert_eq!(replacement.time_slot, t0());
    }

    #[test]
    fn cancel_rejects_unbooked_and_double_cancel() {
        let mut open = Appointment::open_slot(ObjectId::new(), t0());
        assert_eq!(open.cancel().unwrap_err(), SlotError::NotBooked);

        let mut booked = Appointment::open_slot(ObjectId::new(), t0());
        booked.book(ObjectId::new(), snapshot()).unwrap();
        booked.cancel().unwrap();
        assert_eq!(booked.cancel().unwrap_err(), SlotError::AlreadyCancelled);
    }

    #[test]
    fn booking_a_cancelled_slot_is_rejected() {
        let mut slot = Appointment::open_slot(ObjectId::new(), t0());
        slot.book(ObjectId::new(), snapshot()).unwrap();
        slot.cancel().unwrap();
        assert_eq!(
            slot.book(ObjectId::new(), snapshot()),
            Err(SlotError::AlreadyCancelled)
        );
    }
}
