//! Per-session phase-expiry timers.
//!
//! At most one timer of each kind is live at a time; arming a slot aborts
//! whatever was there. Expiry callbacks re-enter the serialized session
//! methods, which re-validate phase and round, so a stale timer firing is a
//! harmless no-op.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tokio::task::JoinHandle;

use super::SessionHandle;

#[derive(Debug, Clone, Copy)]
pub enum TimerSlot {
    Submission = 0,
    Voting = 1,
    Results = 2,
}

#[derive(Default)]
pub struct TimerSet {
    slots: Mutex<[Option<JoinHandle<()>>; 3]>,
}

impl TimerSet {
    pub fn arm(&self, slot: TimerSlot, handle: JoinHandle<()>) {
        let old = self.slots.lock().unwrap()[slot as usize].replace(handle);
        if let Some(old) = old {
            old.abort();
        }
    }

    /// Abort a slot. Safe to call from within the slot's own task as long as
    /// no await follows in that task.
    pub fn cancel(&self, slot: TimerSlot) {
        if let Some(old) = self.slots.lock().unwrap()[slot as usize].take() {
            old.abort();
        }
    }

    pub fn cancel_all(&self) {
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.iter_mut() {
            if let Some(old) = slot.take() {
                old.abort();
            }
        }
    }
}

pub(crate) fn until(deadline: DateTime<Utc>) -> std::time::Duration {
    (deadline - Utc::now()).to_std().unwrap_or_default()
}

impl SessionHandle {
    pub(crate) fn arm_submission_timer(&self, round_number: u32, deadline: DateTime<Utc>) {
        let this = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(until(deadline)).await;
            this.on_submission_timeout(round_number).await;
        });
        self.timers.arm(TimerSlot::Submission, task);
    }

    pub(crate) fn arm_voting_timer(&self, round_number: u32, deadline: DateTime<Utc>) {
        let this = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(until(deadline)).await;
            this.on_voting_timeout(round_number).await;
        });
        self.timers.arm(TimerSlot::Voting, task);
    }

    pub(crate) fn arm_results_timer(&self, delay_seconds: u32) {
        let this = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(delay_seconds as u64)).await;
            this.on_results_timeout().await;
        });
        self.timers.arm(TimerSlot::Results, task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_arming_replaces_previous_timer() {
        let set = TimerSet::default();
        let first = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(600)).await;
        });
        set.arm(TimerSlot::Submission, first);

        let second = tokio::spawn(async {});
        set.arm(TimerSlot::Submission, second);

        // The first task must have been aborted
        let slots = set.slots.lock().unwrap();
        assert!(slots[TimerSlot::Submission as usize].is_some());
        drop(slots);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    #[test]
    fn test_until_clamps_past_deadlines_to_zero() {
        let past = Utc::now() - chrono::Duration::seconds(5);
        assert_eq!(until(past), std::time::Duration::ZERO);
    }
}
