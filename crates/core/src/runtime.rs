//! The runtime handle: event-loop threads and process-lifetime accounting.
//!
//! [`Runtime`] is an explicit context object — there is no process-wide
//! singleton. Whoever needs loop access receives (or is injected with) a
//! `Runtime`, which makes it trivial to run several isolated runtimes in one
//! process, tests included.
//!
//! # Event loops
//!
//! The runtime owns a fixed pool of worker threads, each driving a
//! current-thread tokio runtime inside a `LocalSet`. Work is submitted as plain
//! closures via [`Runtime::spawn_on_loop`] (round-robin); inside a closure,
//! `tokio::task::spawn_local` is available for non-`Send` tasks, which is what
//! keeps each connection's state single-threaded.
//!
//! # Staying alive
//!
//! The runtime tracks outstanding asynchronous work with an atomic counter
//! moved only through [`WorkGuard`]s — acquire-on-start, release-on-drop — so
//! callers cannot unbalance it. [`Runtime::wait_idle`] resolves once the
//! counter has stayed at zero for a short grace period, absorbing follow-up
//! work scheduled right after the last unit completed.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::task::LocalSet;
use tracing::{debug, error};

use crate::config::RuntimeConfig;

type LoopTask = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug)]
struct EventLoop {
    tasks: mpsc::UnboundedSender<LoopTask>,
    handle: tokio::runtime::Handle,
    thread: Option<JoinHandle<()>>,
}

/// Outstanding-work accounting shared by every [`WorkGuard`].
#[derive(Debug)]
struct WorkCounter {
    active: AtomicUsize,
    /// Bumped on every acquire; lets the idle waiter detect work that came and
    /// went during the grace sleep.
    epoch: AtomicU64,
    notify: Notify,
}

/// Schedules `callback` onto the current event-loop turn, behind whatever is
/// already queued. Must be called from an event-loop thread (inside a closure
/// submitted via [`Runtime::spawn_on_loop`] or a task spawned there).
pub fn next_tick<F>(callback: F)
where
    F: FnOnce() + 'static,
{
    tokio::task::spawn_local(async move {
        callback();
    });
}

/// Scoped unit of asynchronous work. Dropping the guard releases it; when the
/// last guard drops, the runtime begins its grace countdown toward idle.
#[derive(Debug)]
pub struct WorkGuard {
    counter: Arc<WorkCounter>,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        if self.counter.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.counter.notify.notify_waiters();
        }
    }
}

/// A fixed pool of event-loop threads plus the work counter that models
/// "is there anything left to do".
#[derive(Debug)]
pub struct Runtime {
    loops: Vec<EventLoop>,
    next_loop: AtomicUsize,
    work: Arc<WorkCounter>,
    idle_grace: Duration,
    high_water_mark: usize,
}

impl Runtime {
    /// Builds a runtime from the environment-derived config.
    pub fn from_env() -> Self {
        Self::new(RuntimeConfig::from_env())
    }

    pub fn new(config: RuntimeConfig) -> Self {
        let loops = (0..config.loop_threads).map(spawn_event_loop).collect();
        Self {
            loops,
            next_loop: AtomicUsize::new(0),
            work: Arc::new(WorkCounter { active: AtomicUsize::new(0), epoch: AtomicU64::new(0), notify: Notify::new() }),
            idle_grace: config.idle_grace,
            high_water_mark: config.high_water_mark,
        }
    }

    #[inline]
    pub fn loop_count(&self) -> usize {
        self.loops.len()
    }

    /// Default high-water mark for streams created against this runtime.
    #[inline]
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Submits a closure to the next event-loop thread (round-robin). The
    /// closure runs inside that loop's `LocalSet`, so `spawn_local` works.
    pub fn spawn_on_loop<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let at = self.next_loop.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        if self.loops[at].tasks.send(Box::new(task)).is_err() {
            error!(event_loop = at, "event loop is gone, dropping task");
        }
    }

    /// Registers one unit of outstanding work; drop the guard when done.
    pub fn acquire_work(&self) -> WorkGuard {
        self.work.active.fetch_add(1, Ordering::SeqCst);
        self.work.epoch.fetch_add(1, Ordering::SeqCst);
        WorkGuard { counter: Arc::clone(&self.work) }
    }

    #[inline]
    pub fn active_work(&self) -> usize {
        self.work.active.load(Ordering::SeqCst)
    }

    /// Runs `callback` on an event-loop thread after `delay`. The deferred
    /// callback counts as outstanding work until it has run.
    pub fn set_timeout<F>(&self, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.acquire_work();
        self.spawn_on_loop(move || {
            tokio::task::spawn_local(async move {
                tokio::time::sleep(delay).await;
                callback();
                drop(guard);
            });
        });
    }

    /// Thread-pool submission for blocking work (the contract the filesystem
    /// and JSON helpers build on). Counts as outstanding work until complete.
    pub fn spawn_blocking<F, R>(&self, f: F) -> tokio::task::JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let guard = self.acquire_work();
        let at = self.next_loop.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        self.loops[at].handle.spawn_blocking(move || {
            let result = f();
            drop(guard);
            result
        })
    }

    /// Resolves once the work counter has been zero for the configured grace
    /// period. Work acquired during the grace sleep restarts the wait.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.work.notify.notified();
            tokio::pin!(notified);
            // register interest before re-checking the counter, so a release
            // racing this check cannot be missed
            notified.as_mut().enable();
            if self.work.active.load(Ordering::SeqCst) == 0 {
                let epoch = self.work.epoch.load(Ordering::SeqCst);
                tokio::time::sleep(self.idle_grace).await;
                if self.work.active.load(Ordering::SeqCst) == 0 && self.work.epoch.load(Ordering::SeqCst) == epoch {
                    return;
                }
            } else {
                notified.await;
            }
        }
    }

    /// Blocking variant of [`wait_idle`](Self::wait_idle) for a synchronous
    /// entry point (e.g. `main` after `listen`).
    pub fn block_until_idle(&self) {
        let waiter = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("failed to build idle-wait runtime");
        waiter.block_on(self.wait_idle());
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // dropping the task senders lets each loop finish its queue and exit
        let threads: Vec<JoinHandle<()>> = self.loops.drain(..).filter_map(|mut event_loop| event_loop.thread.take()).collect();
        for thread in threads {
            if thread.join().is_err() {
                error!("event loop thread panicked during shutdown");
            }
        }
    }
}

fn spawn_event_loop(index: usize) -> EventLoop {
    let (tasks, mut queue) = mpsc::unbounded_channel::<LoopTask>();
    let (handle_tx, handle_rx) = std::sync::mpsc::channel();

    let thread = std::thread::Builder::new()
        .name(format!("evio-loop-{index}"))
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build event loop runtime");
            handle_tx.send(runtime.handle().clone()).expect("runtime owner hung up");

            let local = LocalSet::new();
            local.block_on(&runtime, async move {
                while let Some(task) = queue.recv().await {
                    task();
                }
                debug!(event_loop = index, "event loop drained, shutting down");
            });
        })
        .expect("failed to spawn event loop thread");

    let handle = handle_rx.recv().expect("event loop thread died during startup");
    EventLoop { tasks, handle, thread: Some(thread) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn small_runtime() -> Runtime {
        Runtime::new(RuntimeConfig { loop_threads: 2, idle_grace: Duration::from_millis(20), ..RuntimeConfig::default() })
    }

    #[test]
    fn spawned_closures_run_on_loop_threads() {
        let runtime = small_runtime();
        let (tx, rx) = std::sync::mpsc::channel();

        for i in 0..4 {
            let tx = tx.clone();
            runtime.spawn_on_loop(move || {
                tx.send((i, std::thread::current().name().map(String::from))).unwrap();
            });
        }

        let mut seen = Vec::new();
        for _ in 0..4 {
            let (i, name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(name.unwrap().starts_with("evio-loop-"));
            seen.push(i);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn next_tick_runs_after_the_current_turn() {
        let runtime = small_runtime();
        let (tx, rx) = std::sync::mpsc::channel();

        runtime.spawn_on_loop(move || {
            let order = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
            let later = std::rc::Rc::clone(&order);
            next_tick(move || {
                later.borrow_mut().push("tick");
                // the deferred callback observes everything the submitting
                // turn did before yielding
                tx.send(later.borrow().clone()).unwrap();
            });
            order.borrow_mut().push("turn");
        });

        let seen = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(seen, vec!["turn", "tick"]);
    }

    #[test]
    fn spawn_local_is_available_inside_loop_closures() {
        let runtime = small_runtime();
        let (tx, rx) = std::sync::mpsc::channel();

        runtime.spawn_on_loop(move || {
            // non-Send state must be usable inside a loop task
            let local_only = std::rc::Rc::new(41);
            tokio::task::spawn_local(async move {
                tx.send(*local_only + 1).unwrap();
            });
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn wait_idle_respects_outstanding_guards() {
        let runtime = small_runtime();
        let guard = runtime.acquire_work();
        assert_eq!(runtime.active_work(), 1);

        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::SeqCst);
            drop(guard);
        });

        runtime.block_until_idle();
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(runtime.active_work(), 0);
    }

    #[test]
    fn grace_period_absorbs_follow_up_work() {
        let runtime = Arc::new(Runtime::new(RuntimeConfig {
            loop_threads: 1,
            idle_grace: Duration::from_millis(80),
            ..RuntimeConfig::default()
        }));

        let follow_up_done = Arc::new(AtomicBool::new(false));

        // first unit completes immediately but schedules a follow-up during
        // the grace window; idle must not be reported until both are done
        let first = runtime.acquire_work();
        let rt = Arc::clone(&runtime);
        let done = Arc::clone(&follow_up_done);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            let follow_up = rt.acquire_work();
            drop(first);
            std::thread::sleep(Duration::from_millis(30));
            done.store(true, Ordering::SeqCst);
            drop(follow_up);
        });

        runtime.block_until_idle();
        assert!(follow_up_done.load(Ordering::SeqCst));
    }

    #[test]
    fn set_timeout_runs_after_delay_and_keeps_runtime_busy() {
        let runtime = small_runtime();
        let (tx, rx) = std::sync::mpsc::channel();

        let started = std::time::Instant::now();
        runtime.set_timeout(Duration::from_millis(30), move || {
            tx.send(()).unwrap();
        });

        runtime.block_until_idle();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn spawn_blocking_returns_the_closure_result() {
        let runtime = small_runtime();
        let join = runtime.spawn_blocking(|| 6 * 7);

        let waiter = tokio::runtime::Builder::new_current_thread().build().unwrap();
        assert_eq!(waiter.block_on(join).unwrap(), 42);
    }
}
