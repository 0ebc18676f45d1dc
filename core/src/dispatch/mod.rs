// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The work dispatcher: a fixed pool of worker threads consuming a FIFO
//! of jobs.
//!
//! Jobs submitted while every worker is busy park on the channel until
//! a worker frees up. Each worker inserts the CPU throttle delay before
//! a job step and reports its busy time back to the meter afterwards. A
//! watchdog abandons workers that blow the guard budget and spawns
//! replacements; the abandoned thread exits once its callout finally
//! returns.

pub mod throttle;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

pub use throttle::{CpuMeter, CPU_HIGH_DEFAULT, CPU_WARN_DEFAULT};

/// Default worker pool size.
pub const DEFAULT_WORKERS: usize = 4;

/// Default guard budget for a single probe or action callout.
pub const DEFAULT_GUARD_BUDGET: Duration = Duration::from_secs(30);

/// How often idle workers re-check the quit flag.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// How often the watchdog sweeps the worker slots.
const WATCHDOG_SWEEP: Duration = Duration::from_secs(1);

/// One queued unit of work.
struct Job {
    label: String,
    run: Box<dyn FnOnce() + Send>,
}

/// Per-worker shared slot observed by the watchdog.
struct WorkerSlot {
    id: usize,
    busy_since: Mutex<Option<Instant>>,
    abandoned: AtomicBool,
}

/// Bounded worker pool with CPU throttling and a guard watchdog.
pub struct Dispatcher {
    inbox: Sender<Job>,
    jobs: Receiver<Job>,
    slots: Mutex<Vec<Arc<WorkerSlot>>>,
    meter: Arc<CpuMeter>,
    guard_budget: Duration,
    quit: Arc<AtomicBool>,
    next_id: AtomicUsize,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Start a pool of `workers` threads plus the watchdog.
    pub fn new(workers: usize, meter: Arc<CpuMeter>, guard_budget: Duration) -> Arc<Self> {
        let (inbox, jobs) = channel::unbounded();
        let dispatcher = Arc::new(Self {
            inbox,
            jobs,
            slots: Mutex::new(Vec::new()),
            meter,
            guard_budget,
            quit: Arc::new(AtomicBool::new(false)),
            next_id: AtomicUsize::new(0),
            threads: Mutex::new(Vec::new()),
        });

        for _ in 0..workers.max(1) {
            dispatcher.spawn_worker();
        }
        Self::spawn_watchdog(&dispatcher);
        dispatcher
    }

    /// Queue a job. Runs as soon as a worker is free; parked otherwise.
    pub fn submit<F>(&self, label: impl Into<String>, run: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.quit.load(Ordering::SeqCst) {
            debug!("dispatcher shut down, job discarded");
            return;
        }
        let job = Job {
            label: label.into(),
            run: Box::new(run),
        };
        if self.inbox.send(job).is_err() {
            error!("dispatcher inbox closed, job discarded");
        }
    }

    /// Jobs parked waiting for a worker.
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }

    /// Workers currently alive (including abandoned ones still draining
    /// a stuck callout).
    pub fn workers(&self) -> usize {
        self.slots.lock().len()
    }

    /// Abandon a single worker by id and spawn a replacement. Returns
    /// false when no such worker exists.
    pub fn kill_worker(self: &Arc<Self>, id: usize) -> bool {
        let slot = {
            let slots = self.slots.lock();
            slots.iter().find(|s| s.id == id).cloned()
        };
        let Some(slot) = slot else {
            return false;
        };
        slot.abandoned.store(true, Ordering::SeqCst);
        self.slots.lock().retain(|s| s.id != id);
        self.spawn_worker();
        true
    }

    /// Stop accepting work and release every idle worker. Threads stuck
    /// inside a host callout exit when the callout returns.
    pub fn kill_all(&self) {
        self.quit.store(true, Ordering::SeqCst);
        for slot in self.slots.lock().iter() {
            slot.abandoned.store(true, Ordering::SeqCst);
        }
        // Idle workers notice within one poll interval; nothing to join
        // that is not potentially blocked inside host code.
        self.threads.lock().clear();
    }

    fn spawn_worker(self: &Arc<Self>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let slot = Arc::new(WorkerSlot {
            id,
            busy_since: Mutex::new(None),
            abandoned: AtomicBool::new(false),
        });
        self.slots.lock().push(slot.clone());

        let jobs = self.jobs.clone();
        let meter = self.meter.clone();
        let quit = self.quit.clone();
        let handle = thread::Builder::new()
            .name(format!("vigil-worker-{}", id))
            .spawn(move || worker_main(id, jobs, meter, quit, slot))
            .expect("failed to spawn worker thread");
        self.threads.lock().push(handle);
    }

    fn spawn_watchdog(dispatcher: &Arc<Self>) {
        let weak = Arc::downgrade(dispatcher);
        let quit = dispatcher.quit.clone();
        let handle = thread::Builder::new()
            .name("vigil-watchdog".to_string())
            .spawn(move || {
                while !quit.load(Ordering::SeqCst) {
                    thread::sleep(WATCHDOG_SWEEP);
                    let Some(dispatcher) = weak.upgrade() else {
                        break;
                    };
                    dispatcher.sweep_stalled();
                }
            })
            .expect("failed to spawn watchdog thread");
        dispatcher.threads.lock().push(handle);
    }

    /// Abandon any worker that has been inside one callout longer than
    /// the guard budget and spawn a replacement so the pool keeps its
    /// capacity.
    fn sweep_stalled(self: &Arc<Self>) {
        let stalled: Vec<Arc<WorkerSlot>> = {
            let slots = self.slots.lock();
            slots
                .iter()
                .filter(|slot| {
                    !slot.abandoned.load(Ordering::SeqCst)
                        && slot
                            .busy_since
                            .lock()
                            .map(|since| since.elapsed() > self.guard_budget)
                            .unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        for slot in stalled {
            warn!(worker = slot.id, "worker exceeded guard budget, abandoned");
            slot.abandoned.store(true, Ordering::SeqCst);
            self.slots.lock().retain(|s| s.id != slot.id);
            self.spawn_worker();
        }
    }
}

fn worker_main(
    id: usize,
    jobs: Receiver<Job>,
    meter: Arc<CpuMeter>,
    quit: Arc<AtomicBool>,
    slot: Arc<WorkerSlot>,
) {
    debug!(worker = id, "worker thread started");

    loop {
        if quit.load(Ordering::SeqCst) || slot.abandoned.load(Ordering::SeqCst) {
            break;
        }

        let job = match jobs.recv_timeout(IDLE_POLL) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // Throttle before the job step, then recompute for the next one.
        if let Some(delay) = meter.current_delay() {
            debug!(worker = id, delay_ms = delay.as_millis() as u64, "throttling");
            thread::sleep(delay);
            meter.recalculate();
        }

        let start = Instant::now();
        *slot.busy_since.lock() = Some(start);
        debug!(worker = id, job = %job.label, "job starting");
        (job.run)();
        *slot.busy_since.lock() = None;

        meter.record(start.elapsed());
        meter.recalculate();
    }

    debug!(worker = id, "worker thread exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_jobs_run_on_workers() {
        let dispatcher = Dispatcher::new(2, Arc::new(CpuMeter::default()), DEFAULT_GUARD_BUDGET);
        let (tx, rx) = mpsc::channel();

        for i in 0..8 {
            let tx = tx.clone();
            dispatcher.submit(format!("job-{}", i), move || {
                tx.send(i).unwrap();
            });
        }

        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());

        dispatcher.kill_all();
    }

    #[test]
    fn test_excess_jobs_park_until_a_worker_frees() {
        let dispatcher = Dispatcher::new(1, Arc::new(CpuMeter::default()), DEFAULT_GUARD_BUDGET);
        let (tx, rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        dispatcher.submit("blocker", move || {
            release_rx.recv().unwrap();
        });
        let tx2 = tx.clone();
        dispatcher.submit("parked", move || {
            tx2.send("ran").unwrap();
        });

        // The second job must not run while the only worker is blocked.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        release_tx.send(()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "ran");

        dispatcher.kill_all();
    }

    #[test]
    fn test_watchdog_replaces_stalled_worker() {
        let dispatcher =
            Dispatcher::new(1, Arc::new(CpuMeter::default()), Duration::from_millis(100));
        let (tx, rx) = mpsc::channel();
        let (hold_tx, hold_rx) = mpsc::channel::<()>();

        dispatcher.submit("stuck", move || {
            // Far beyond the tiny guard budget.
            let _ = hold_rx.recv_timeout(Duration::from_secs(10));
        });

        // Give the watchdog time to abandon the worker and spawn a
        // replacement, then prove the pool still makes progress.
        thread::sleep(Duration::from_millis(2500));
        dispatcher.submit("after", move || {
            tx.send(()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());

        let _ = hold_tx.send(());
        dispatcher.kill_all();
    }

    #[test]
    fn test_shutdown_discards_new_jobs() {
        let dispatcher = Dispatcher::new(1, Arc::new(CpuMeter::default()), DEFAULT_GUARD_BUDGET);
        dispatcher.kill_all();

        let (tx, rx) = mpsc::channel();
        dispatcher.submit("late", move || {
            tx.send(()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }
}
