//! # Session Timers
//!
//! Purpose: The session's timer service. Each timer is a deadline slot owned
//! by the session; the session task sleeps until the earliest deadline and
//! asks which timers fired. Cancelling is clearing the slot, so nothing
//! scheduled can outlive the session that owns it.

use std::time::{Duration, Instant};

/// The timers a session can arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKind {
    /// Fires when a connection attempt has not become established in time.
    ConnectTimeout,
    /// Delayed retry after a connection closed shortly after opening.
    ReconnectDelay,
    /// Recurring wait-timeout sweep over the command queue.
    WaitSweep,
}

impl TimerKind {
    const ALL: [TimerKind; 3] = [
        TimerKind::ConnectTimeout,
        TimerKind::ReconnectDelay,
        TimerKind::WaitSweep,
    ];

    fn slot(self) -> usize {
        match self {
            TimerKind::ConnectTimeout => 0,
            TimerKind::ReconnectDelay => 1,
            TimerKind::WaitSweep => 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    due: Instant,
    period: Option<Duration>,
}

/// Deadline table for one session.
#[derive(Debug, Default)]
pub(crate) struct Timers {
    slots: [Option<Deadline>; 3],
}

impl Timers {
    pub fn new() -> Self {
        Timers::default()
    }

    /// Arms a one-shot timer, replacing any pending deadline of that kind.
    pub fn schedule(&mut self, kind: TimerKind, now: Instant, after: Duration) {
        self.slots[kind.slot()] = Some(Deadline {
            due: now + after,
            period: None,
        });
    }

    /// Arms a recurring timer with the given period.
    pub fn schedule_every(&mut self, kind: TimerKind, now: Instant, period: Duration) {
        self.slots[kind.slot()] = Some(Deadline {
            due: now + period,
            period: Some(period),
        });
    }

    /// Disarms a timer. Returns true if it was armed.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        self.slots[kind.slot()].take().is_some()
    }

    pub fn cancel_all(&mut self) {
        self.slots = [None; 3];
    }

    #[cfg(test)]
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots[kind.slot()].is_some()
    }

    /// Earliest pending deadline, if any timer is armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.iter().flatten().map(|deadline| deadline.due).min()
    }

    /// Returns the timers due at `now`, earliest first.
    ///
    /// One-shot timers are disarmed; recurring timers are re-armed one
    /// period after `now`.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut due: Vec<(Instant, TimerKind)> = Vec::new();
        for kind in TimerKind::ALL {
            let slot = &mut self.slots[kind.slot()];
            if let Some(deadline) = *slot {
                if deadline.due <= now {
                    due.push((deadline.due, kind));
                    *slot = deadline.period.map(|period| Deadline {
                        due: now + period,
                        period: Some(period),
                    });
                }
            }
        }
        due.sort_by_key(|(at, _)| *at);
        due.into_iter().map(|(_, kind)| kind).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_fires_once() {
        let start = Instant::now();
        let mut timers = Timers::new();
        timers.schedule(TimerKind::ConnectTimeout, start, Duration::from_secs(5));
        assert_eq!(timers.next_deadline(), Some(start + Duration::from_secs(5)));

        assert!(timers.take_due(start + Duration::from_secs(4)).is_empty());
        assert_eq!(
            timers.take_due(start + Duration::from_secs(5)),
            vec![TimerKind::ConnectTimeout]
        );
        assert!(!timers.is_armed(TimerKind::ConnectTimeout));
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn recurring_rearms_and_cancel_stops_it() {
        let start = Instant::now();
        let mut timers = Timers::new();
        timers.schedule_every(TimerKind::WaitSweep, start, Duration::from_secs(1));

        let tick = start + Duration::from_secs(1);
        assert_eq!(timers.take_due(tick), vec![TimerKind::WaitSweep]);
        assert_eq!(timers.next_deadline(), Some(tick + Duration::from_secs(1)));

        assert!(timers.cancel(TimerKind::WaitSweep));
        assert!(!timers.cancel(TimerKind::WaitSweep));
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn due_timers_come_back_in_deadline_order() {
        let start = Instant::now();
        let mut timers = Timers::new();
        timers.schedule(TimerKind::ReconnectDelay, start, Duration::from_secs(3));
        timers.schedule(TimerKind::ConnectTimeout, start, Duration::from_secs(1));
        assert_eq!(
            timers.take_due(start + Duration::from_secs(3)),
            vec![TimerKind::ConnectTimeout, TimerKind::ReconnectDelay]
        );
    }
}
