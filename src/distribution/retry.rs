//! Bounded, cancellable retry on a fixed interval.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    pub attempts: u32,
    pub interval: Duration,
}

#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Succeeded { value: T, attempt: u32 },
    /// Every attempt failed; carries the last error, if any attempt ran.
    Exhausted(Option<E>),
    Cancelled,
}

impl RetrySchedule {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Longest a single attempt may run; an attempt never outlives the gap
    /// before the next one.
    pub fn attempt_timeout(&self) -> Duration {
        self.interval
    }

    /// Runs `attempt` up to `attempts` times, waiting `interval` before each.
    ///
    /// Stops early when `cancel` flips to true or its sender is dropped, both
    /// while waiting and while an attempt is running.
    pub async fn run<T, E, F, Fut>(&self, cancel: &mut watch::Receiver<bool>, mut attempt: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if *cancel.borrow() {
            return RetryOutcome::Cancelled;
        }
        let mut ticks = time::interval_at(Instant::now() + self.interval, self.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_error = None;

        for n in 1..=self.attempts {
            tokio::select! {
                _ = ticks.tick() => {}
                _ = cancel.wait_for(|stop| *stop) => {
                    debug!("Retry cancelled before attempt {}", n);
                    return RetryOutcome::Cancelled;
                }
            }
            let result = tokio::select! {
                result = attempt(n) => result,
                _ = cancel.wait_for(|stop| *stop) => {
                    debug!("Retry cancelled during attempt {}", n);
                    return RetryOutcome::Cancelled;
                }
            };
            match result {
                Ok(value) => return RetryOutcome::Succeeded { value, attempt: n },
                Err(err) => last_error = Some(err),
            }
        }
        RetryOutcome::Exhausted(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_n_attempts_spaced_by_interval() {
        let schedule = RetrySchedule::new(5, Duration::from_millis(200));
        let (_tx, mut rx) = watch::channel(false);
        let mut calls = Vec::new();
        let start = Instant::now();

        let outcome: RetryOutcome<(), &str> = schedule
            .run(&mut rx, |n| {
                calls.push((n, start.elapsed()));
                async { Err("down") }
            })
            .await;

        assert!(matches!(outcome, RetryOutcome::Exhausted(Some("down"))));
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
        let spacing: Vec<_> = calls.iter().map(|(_, at)| at.as_millis()).collect();
        assert_eq!(spacing, vec![200, 400, 600, 800, 1000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_first_success() {
        let schedule = RetrySchedule::new(10, Duration::from_millis(100));
        let (_tx, mut rx) = watch::channel(false);

        let outcome: RetryOutcome<u32, ()> = schedule
            .run(&mut rx, |n| async move { if n == 3 { Ok(n) } else { Err(()) } })
            .await;

        assert!(matches!(outcome, RetryOutcome::Succeeded { value: 3, attempt: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let schedule = RetrySchedule::new(100, Duration::from_secs(1));
        let (tx, mut rx) = watch::channel(false);
        let start = Instant::now();

        tokio::spawn(async move {
            time::sleep(Duration::from_millis(2500)).await;
            let _ = tx.send(true);
        });
        let outcome: RetryOutcome<(), ()> = schedule.run(&mut rx, |_| async { Err(()) }).await;

        assert!(matches!(outcome, RetryOutcome::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_running_attempt() {
        let schedule = RetrySchedule::new(3, Duration::from_millis(100));
        let (tx, mut rx) = watch::channel(false);
        let start = Instant::now();

        tokio::spawn(async move {
            time::sleep(Duration::from_millis(150)).await;
            let _ = tx.send(true);
        });
        let outcome: RetryOutcome<(), ()> = schedule
            .run(&mut rx, |_| std::future::pending::<Result<(), ()>>())
            .await;

        assert!(matches!(outcome, RetryOutcome::Cancelled));
        assert_eq!(start.elapsed(), Duration::from_millis(150));
    }

    #[test]
    fn test_attempt_timeout_is_the_interval() {
        let schedule = RetrySchedule::new(4, Duration::from_millis(250));
        assert_eq!(schedule.attempt_timeout(), Duration::from_millis(250));
    }
}
