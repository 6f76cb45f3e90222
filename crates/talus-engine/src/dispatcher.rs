//! Job dispatcher: a fixed thread pool plus a delayed-job timer.
//!
//! Immediate jobs go straight onto a work-stealing pool. Delayed jobs wait
//! in a min-heap keyed on their execution deadline; a dedicated timer thread
//! promotes due jobs into the pool.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct TimedJob {
    deadline: Instant,
    sequence: u64,
    job: Job,
}

impl PartialEq for TimedJob {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}
impl Eq for TimedJob {}
impl PartialOrd for TimedJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimedJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.sequence.cmp(&other.sequence))
    }
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Reverse<TimedJob>>,
    sequence: u64,
}

/// Fixed pool of OS threads with immediate and delayed scheduling.
///
/// Island workers, their fork-join subtasks and all delayed reschedules run
/// here. Jobs are run-to-completion: nothing in the engine blocks a pool
/// thread across a suspension point.
pub struct JobDispatcher {
    pool: Arc<rayon::ThreadPool>,
    timer: Arc<(Mutex<TimerState>, Condvar)>,
    shutdown: Arc<AtomicBool>,
    timer_thread: Option<std::thread::JoinHandle<()>>,
}

impl std::fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("threads", &self.pool.current_num_threads())
            .finish_non_exhaustive()
    }
}

impl JobDispatcher {
    /// Create a dispatcher with `threads` pool threads (`None` uses the
    /// available parallelism) plus the timer thread.
    pub fn new(threads: Option<usize>) -> std::io::Result<Arc<Self>> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("talus-{i}"));
        if let Some(threads) = threads {
            builder = builder.num_threads(threads.max(1));
        }
        let pool = Arc::new(
            builder
                .build()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?,
        );

        let timer = Arc::new((Mutex::new(TimerState::default()), Condvar::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let timer_thread = {
            let timer = Arc::clone(&timer);
            let shutdown = Arc::clone(&shutdown);
            let pool = Arc::clone(&pool);
            std::thread::Builder::new()
                .name("talus-timer".into())
                .spawn(move || {
                    timer_loop(&timer, &shutdown, &pool);
                })?
        };

        debug!(threads = pool.current_num_threads(), "dispatcher started");
        Ok(Arc::new(Self {
            pool,
            timer,
            shutdown,
            timer_thread: Some(timer_thread),
        }))
    }

    /// Run a job on the pool as soon as a thread is free.
    pub fn dispatch<F: FnOnce() + Send + 'static>(&self, job: F) {
        self.pool.spawn(job);
    }

    /// Run a job no earlier than `delay` from now.
    pub fn dispatch_after<F: FnOnce() + Send + 'static>(&self, delay: Duration, job: F) {
        let (lock, cv) = &*self.timer;
        let mut state = match lock.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.sequence += 1;
        let sequence = state.sequence;
        state.heap.push(Reverse(TimedJob {
            deadline: Instant::now() + delay,
            sequence,
            job: Box::new(job),
        }));
        cv.notify_one();
    }

    /// Number of pool threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Drop for JobDispatcher {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.timer.1.notify_all();
        if let Some(handle) = self.timer_thread.take() {
            let _ = handle.join();
        }
    }
}

fn timer_loop(
    timer: &(Mutex<TimerState>, Condvar),
    shutdown: &AtomicBool,
    pool: &rayon::ThreadPool,
) {
    let (lock, cv) = timer;
    let mut state = match lock.lock() {
        Ok(state) => state,
        Err(poisoned) => poisoned.into_inner(),
    };

    while !shutdown.load(Ordering::Acquire) {
        let now = Instant::now();

        // Promote everything due.
        while state
            .heap
            .peek()
            .is_some_and(|Reverse(t)| t.deadline <= now)
        {
            if let Some(Reverse(timed)) = state.heap.pop() {
                pool.spawn(timed.job);
            }
        }

        // Sleep until the next deadline or a new submission.
        let wait = state
            .heap
            .peek()
            .map_or(Duration::from_millis(50), |Reverse(t)| {
                t.deadline.saturating_duration_since(now)
            });
        let (next, _) = match cv.wait_timeout(state, wait.min(Duration::from_millis(50))) {
            Ok(ok) => ok,
            Err(poisoned) => poisoned.into_inner(),
        };
        state = next;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn test_dispatch_runs_job() {
        let dispatcher = JobDispatcher::new(Some(2)).unwrap();
        let (tx, rx) = mpsc::channel();
        dispatcher.dispatch(move || {
            tx.send(42).unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn test_dispatch_after_waits() {
        let dispatcher = JobDispatcher::new(Some(2)).unwrap();
        let (tx, rx) = mpsc::channel();
        let started = Instant::now();
        dispatcher.dispatch_after(Duration::from_millis(50), move || {
            tx.send(Instant::now()).unwrap();
        });

        let fired_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired_at.duration_since(started) >= Duration::from_millis(45));
    }

    #[test]
    fn test_delayed_jobs_fire_in_deadline_order() {
        let dispatcher = JobDispatcher::new(Some(1)).unwrap();
        let (tx, rx) = mpsc::channel();
        for (delay, tag) in [(80u64, 'b'), (20, 'a'), (140, 'c')] {
            let tx = tx.clone();
            dispatcher.dispatch_after(Duration::from_millis(delay), move || {
                tx.send(tag).unwrap();
            });
        }

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        }
        assert_eq!(order, vec!['a', 'b', 'c']);
    }

    #[test]
    fn test_many_concurrent_jobs_complete() {
        let dispatcher = JobDispatcher::new(Some(4)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            dispatcher.dispatch(move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 99 {
                    tx.send(()).unwrap();
                }
            });
        }
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }
}
