// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Restartable one-shot timer on its own thread.
//!
//! [`OneShotTimer::reset`] (re)starts the countdown. When the interval
//! elapses without another reset the *expired* callback runs once. The
//! *reset* callback runs on the first reset after an expiry, so the pair of
//! callbacks always alternates.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

type Callback = Box<dyn Fn() + Send + 'static>;

#[derive(Debug, Default)]
struct TimerState {
    deadline: Option<Instant>,
    reset_pending: bool,
    stop: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

/// A restartable countdown that reports reset/expired transitions.
pub struct OneShotTimer {
    name: String,
    interval: Duration,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for OneShotTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneShotTimer")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl OneShotTimer {
    /// Starts a timer thread. The countdown begins immediately.
    pub fn start(
        name: impl Into<String>,
        interval: Duration,
        on_reset: impl Fn() + Send + 'static,
        on_expired: impl Fn() + Send + 'static,
    ) -> std::io::Result<Self> {
        let name = name.into();
        let shared = Arc::new(Shared::default());
        shared.state.lock().deadline = Some(Instant::now() + interval);

        let worker = Arc::clone(&shared);
        let on_reset: Callback = Box::new(on_reset);
        let on_expired: Callback = Box::new(on_expired);
        let thread = thread::Builder::new()
            .name(format!("timer:{name}"))
            .spawn(move || run(&worker, interval, &on_reset, &on_expired))?;

        Ok(Self {
            name,
            interval,
            shared,
            thread: Some(thread),
        })
    }

    /// Restarts the countdown.
    pub fn reset(&self) {
        let mut state = self.shared.state.lock();
        state.deadline = Some(Instant::now() + self.interval);
        state.reset_pending = true;
        self.shared.wake.notify_one();
    }

    /// The timer's interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Short description for diagnostic dumps.
    #[must_use]
    pub fn dump(&self) -> String {
        format!("{} ms", self.interval.as_millis())
    }

    /// Stops the thread and waits for it. Pending callbacks do not run.
    pub fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stop = true;
            self.shared.wake.notify_one();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(timer = %self.name, "timer thread panicked");
            }
        }
    }
}

impl Drop for OneShotTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(shared: &Shared, interval: Duration, on_reset: &Callback, on_expired: &Callback) {
    let mut state = shared.state.lock();
    let mut expired = false;
    loop {
        if state.stop {
            return;
        }
        if std::mem::take(&mut state.reset_pending) && expired {
            expired = false;
            MutexGuard::unlocked(&mut state, on_reset);
            continue;
        }
        match state.deadline {
            None => shared.wake.wait(&mut state),
            Some(deadline) if Instant::now() >= deadline => {
                state.deadline = None;
                expired = true;
                tracing::trace!(interval_ms = interval.as_millis(), "timer expired");
                MutexGuard::unlocked(&mut state, on_expired);
            }
            Some(deadline) => {
                let _ = shared.wake.wait_until(&mut state, deadline);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[derive(Debug, PartialEq, Eq)]
    enum Fired {
        Reset,
        Expired,
    }

    fn timer(interval_ms: u64) -> (OneShotTimer, mpsc::Receiver<Fired>) {
        let (tx, rx) = mpsc::channel();
        let reset_tx = tx.clone();
        let timer = OneShotTimer::start(
            "test",
            Duration::from_millis(interval_ms),
            move || {
                let _ = reset_tx.send(Fired::Reset);
            },
            move || {
                let _ = tx.send(Fired::Expired);
            },
        )
        .unwrap();
        (timer, rx)
    }

    #[test]
    fn expires_once_then_resets() {
        let (timer, rx) = timer(20);
        let wait = Duration::from_secs(5);
        assert_eq!(rx.recv_timeout(wait).unwrap(), Fired::Expired);
        assert!(
            rx.recv_timeout(Duration::from_millis(60)).is_err(),
            "expiry fires once per countdown"
        );

        timer.reset();
        assert_eq!(rx.recv_timeout(wait).unwrap(), Fired::Reset);
        assert_eq!(rx.recv_timeout(wait).unwrap(), Fired::Expired);
    }

    #[test]
    fn resets_postpone_expiry() {
        let (timer, rx) = timer(200);
        for _ in 0..3 {
            thread::sleep(Duration::from_millis(50));
            timer.reset();
        }
        assert!(
            rx.try_recv().is_err(),
            "no callback while the timer keeps being reset"
        );
    }

    #[test]
    fn stop_joins_the_thread() {
        let (mut timer, rx) = timer(10_000);
        timer.stop();
        timer.stop();
        assert!(rx.try_recv().is_err(), "stopped before expiry");
        assert_eq!(timer.dump(), "10000 ms");
    }
}
