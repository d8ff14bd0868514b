use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, trace};

/// A repeating deadline. The first firing is one period after creation.
#[derive(Debug, Clone)]
pub struct Timer {
    period: Duration,
    next: Instant,
}

impl Timer {
    pub fn new(period: Duration, start: Instant) -> Self {
        Self {
            period,
            next: start + period,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next
    }

    pub fn next_deadline(&self) -> Instant {
        self.next
    }

    /// Reschedules one period after `now`. Ticks missed while a callback
    /// ran long are dropped, not replayed.
    pub fn fire(&mut self, now: Instant) {
        self.next = now + self.period;
    }
}

struct Job<'a> {
    name: &'static str,
    timer: Timer,
    callback: Box<dyn FnMut() -> anyhow::Result<()> + 'a>,
}

/// Runs periodic callbacks on the calling thread. A callback never
/// overlaps itself or another callback.
pub struct Scheduler<'a> {
    start: Instant,
    jobs: Vec<Job<'a>>,
}

impl<'a> Scheduler<'a> {
    pub fn new(start: Instant) -> Self {
        Self {
            start,
            jobs: Vec::new(),
        }
    }

    pub fn every<F>(&mut self, name: &'static str, period: Duration, callback: F)
    where
        F: FnMut() -> anyhow::Result<()> + 'a,
    {
        debug!(name, period_secs = period.as_secs(), "registered timer");
        self.jobs.push(Job {
            name,
            timer: Timer::new(period, self.start),
            callback: Box::new(callback),
        });
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.jobs.iter().map(|job| job.timer.next_deadline()).min()
    }

    /// Fires every job due at `now`, in registration order. Returns how
    /// many fired. Errors are logged and do not stop other jobs.
    pub fn run_pending(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        for job in &mut self.jobs {
            if !job.timer.is_due(now) {
                continue;
            }
            trace!(name = job.name, "timer fired");
            if let Err(err) = (job.callback)() {
                error!(name = job.name, error = %format!("{err:#}"), "timer callback failed");
            }
            job.timer.fire(Instant::now().max(now));
            fired += 1;
        }
        fired
    }

    /// Sleeps until the next deadline and fires, forever or until
    /// `max_ticks` callbacks have run.
    #[tracing::instrument(skip(self))]
    pub fn run(&mut self, max_ticks: Option<u64>) -> u64 {
        let mut ticks = 0_u64;
        loop {
            if let Some(limit) = max_ticks
                && ticks >= limit
            {
                debug!(ticks, "tick limit reached");
                return ticks;
            }

            let Some(deadline) = self.next_deadline() else {
                debug!("no timers registered");
                return ticks;
            };

            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            }
            ticks += self.run_pending(Instant::now()) as u64;
        }
    }
}
