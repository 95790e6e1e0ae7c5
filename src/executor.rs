//! Cooperative scheduling of polling tasks.
//!
//! A task implements [`Executor`]: every call to [`Executor::do_execute`] performs one
//! unit of work and returns how long the task wants to sleep before the next one. A
//! [`Schedule`] remembers when the task becomes eligible again. Several tasks can
//! share a thread by calling [`Executor::execute_at`] in turn, or each task can be
//! given a thread of its own with [`run`].

use core::time::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::trace;

/// Longest delay a task can request. Also bounds how far in the future a stored
/// deadline is trusted when the clock misbehaves.
pub const DEFAULT_HORIZON: Duration = Duration::from_secs(60);

/// Upper bound for a single sleep in [`run`], so a stop request is noticed quickly.
const MAX_SLEEP: Duration = Duration::from_millis(100);

/// Next-eligible time of a single task.
#[derive(Debug, Clone)]
pub struct Schedule {
    next_eligible: Option<Instant>,
    horizon: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new()
    }
}

impl Schedule {
    /// A schedule that is eligible immediately.
    pub fn new() -> Self {
        Self::with_horizon(DEFAULT_HORIZON)
    }

    pub fn with_horizon(horizon: Duration) -> Self {
        Self {
            next_eligible: None,
            horizon,
        }
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    /// Returns true if the task may run at `now`.
    ///
    /// A deadline further away than the horizon can only come from the clock going
    /// backwards, in which case the task is eligible right away.
    pub fn tick(&self, now: Instant) -> bool {
        match self.next_eligible {
            None => true,
            Some(deadline) => match deadline.checked_duration_since(now) {
                None => true,
                Some(wait) if wait.is_zero() => true,
                Some(wait) => {
                    if wait > self.horizon {
                        trace!("Deadline {:?} beyond horizon, running now", wait);
                        true
                    } else {
                        false
                    }
                }
            },
        }
    }

    /// Record that the task ran now and wants to wait `delay` before running again.
    pub fn commit(&mut self, delay: Duration) {
        self.commit_at(Instant::now(), delay)
    }

    /// Like [`commit`](Self::commit) with an explicit current time.
    /// The delay is clamped to the horizon.
    pub fn commit_at(&mut self, now: Instant, delay: Duration) {
        let delay = delay.min(self.horizon);
        self.next_eligible = now.checked_add(delay);
    }

    /// Time left until the task is eligible, zero if it is eligible at `now`.
    pub fn time_until_eligible(&self, now: Instant) -> Duration {
        if self.tick(now) {
            return Duration::ZERO;
        }
        self.next_eligible
            .and_then(|deadline| deadline.checked_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }
}

/// A unit of cooperative work.
pub trait Executor {
    /// Do one unit of work and return the delay before the next call.
    fn do_execute(&mut self) -> Duration;

    /// Run the task if `schedule` says it is eligible at `now`.
    /// Returns true if the task ran.
    fn execute_at(&mut self, schedule: &mut Schedule, now: Instant) -> bool {
        if !schedule.tick(now) {
            return false;
        }
        let delay = self.do_execute();
        schedule.commit_at(Instant::now(), delay);
        true
    }
}

impl<E: Executor + ?Sized> Executor for &mut E {
    fn do_execute(&mut self) -> Duration {
        (**self).do_execute()
    }
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn do_execute(&mut self) -> Duration {
        (**self).do_execute()
    }
}

/// Run `task` on the current thread until `stop` is set.
pub fn run<E: Executor + ?Sized>(task: &mut E, stop: &AtomicBool) {
    let mut schedule = Schedule::new();
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if !task.execute_at(&mut schedule, now) {
            let wait = schedule.time_until_eligible(now).min(MAX_SLEEP);
            std::thread::sleep(wait);
        }
    }
}

/// Run several tasks round-robin on the current thread until `stop` is set.
pub fn run_all(tasks: &mut [&mut dyn Executor], stop: &AtomicBool) {
    let mut schedules = vec![Schedule::new(); tasks.len()];
    while !stop.load(Ordering::Relaxed) {
        let mut ran = false;
        for (task, schedule) in tasks.iter_mut().zip(schedules.iter_mut()) {
            ran |= task.execute_at(schedule, Instant::now());
        }
        if !ran {
            let now = Instant::now();
            let wait = schedules
                .iter()
                .map(|s| s.time_until_eligible(now))
                .min()
                .unwrap_or(MAX_SLEEP)
                .min(MAX_SLEEP);
            std::thread::sleep(wait);
        }
    }
}
