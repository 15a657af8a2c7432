// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Scheduler and timers
//!
//! Time-based message delivery. A single background thread drains a min-heap
//! of scheduled tasks ordered by deadline, waking either when a new task is
//! inserted or when the nearest deadline falls due. Delivery re-enters the
//! normal `tell` path, so scheduled messages obey the same mailbox and
//! dispatch rules as any other send.
//!
//! Cancellation is lazy: [`Cancellable::cancel`] flips a flag and the
//! drain skips flagged entries when they surface, so cancelling is O(1)
//! and never touches the heap.
//!
//! [`TimerScheduler`] is the per-actor convenience wrapper, keying timers by
//! name and auto-cancelling a timer when its key is reused or its actor
//! stops.
//!

use crate::{
    actor::ActorRef,
    envelope::{DynMessage, Envelope, SystemMessage},
};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use std::{
    any::Any,
    cmp::Ordering as CmpOrdering,
    collections::{BinaryHeap, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Handle to a scheduled task.
#[derive(Clone)]
pub struct Cancellable {
    cancelled: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
}

impl Cancellable {
    fn new() -> Self {
        Cancellable {
            cancelled: Arc::new(AtomicBool::new(false)),
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle whose task already ran; `cancel` always returns false.
    fn spent() -> Self {
        let handle = Cancellable::new();
        handle.done.store(true, Ordering::Release);
        handle
    }

    /// Cancels the task. Idempotent; returns false when the task already
    /// fired (one-shot) or was already cancelled.
    pub fn cancel(&self) -> bool {
        if self.done.load(Ordering::Acquire) {
            return false;
        }
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    /// True once `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// True while the task can still fire.
    pub fn is_active(&self) -> bool {
        !self.is_cancelled() && !self.done.load(Ordering::Acquire)
    }
}

/// What a scheduled task delivers when it fires.
#[derive(Clone)]
enum Delivery {
    User(DynMessage),
    System(SystemMessage),
}

/// A task in the scheduler heap, ordered by deadline.
struct ScheduledTask {
    id: u64,
    execute_at: Instant,
    target: ActorRef,
    delivery: Delivery,
    sender: Option<ActorRef>,
    interval: Option<Duration>,
    cancelled: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed so the binary heap pops the earliest deadline first.
        other
            .execute_at
            .cmp(&self.execute_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

struct SchedulerState {
    heap: Mutex<BinaryHeap<ScheduledTask>>,
    signal: Condvar,
    down: AtomicBool,
    next_id: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// One-shot and periodic timed message delivery.
///
/// Cloning a `Scheduler` yields another handle to the same background
/// thread.
#[derive(Clone)]
pub struct Scheduler {
    state: Arc<SchedulerState>,
}

impl Scheduler {
    /// Starts the scheduler thread. `label` seeds the thread name.
    pub(crate) fn new(label: &str) -> Self {
        let state = Arc::new(SchedulerState {
            heap: Mutex::new(BinaryHeap::new()),
            signal: Condvar::new(),
            down: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            thread: Mutex::new(None),
        });
        let runner = Arc::clone(&state);
        let handle = thread::Builder::new()
            .name(format!("{}-scheduler", label))
            .spawn(move || run(runner))
            .expect("failed to spawn scheduler thread");
        *state.thread.lock() = Some(handle);
        Scheduler { state }
    }

    /// Delivers `message` to `target` once, after `delay`.
    pub fn schedule_once<M: Any + Send + Sync>(
        &self,
        delay: Duration,
        target: &ActorRef,
        message: M,
        sender: Option<ActorRef>,
    ) -> Cancellable {
        self.insert(
            Instant::now() + delay,
            target.clone(),
            Delivery::User(Arc::new(message)),
            sender,
            None,
        )
    }

    /// Delivers `message` to `target` at the given instant.
    pub fn schedule_at<M: Any + Send + Sync>(
        &self,
        when: Instant,
        target: &ActorRef,
        message: M,
        sender: Option<ActorRef>,
    ) -> Cancellable {
        self.insert(
            when,
            target.clone(),
            Delivery::User(Arc::new(message)),
            sender,
            None,
        )
    }

    /// Delivers `message` to `target` after `initial_delay` and then every
    /// `interval` until cancelled. Deadlines advance at a fixed rate from
    /// the previous deadline, not from the delivery time.
    pub fn schedule_repeatedly<M: Any + Send + Sync>(
        &self,
        initial_delay: Duration,
        interval: Duration,
        target: &ActorRef,
        message: M,
        sender: Option<ActorRef>,
    ) -> Cancellable {
        self.insert(
            Instant::now() + initial_delay,
            target.clone(),
            Delivery::User(Arc::new(message)),
            sender,
            Some(interval.max(Duration::from_millis(1))),
        )
    }

    /// Schedules delivery of a runtime control message. Used for delayed
    /// restarts and ask timeouts.
    pub(crate) fn schedule_system(
        &self,
        delay: Duration,
        target: &ActorRef,
        message: SystemMessage,
    ) -> Cancellable {
        self.insert(
            Instant::now() + delay,
            target.clone(),
            Delivery::System(message),
            None,
            None,
        )
    }

    fn insert(
        &self,
        execute_at: Instant,
        target: ActorRef,
        delivery: Delivery,
        sender: Option<ActorRef>,
        interval: Option<Duration>,
    ) -> Cancellable {
        if self.state.down.load(Ordering::Acquire) {
            warn!("Task scheduled after scheduler shutdown, dropping it.");
            return Cancellable::spent();
        }
        let handle = Cancellable::new();
        let task = ScheduledTask {
            id: self.state.next_id.fetch_add(1, Ordering::Relaxed),
            execute_at,
            target,
            delivery,
            sender,
            interval,
            cancelled: Arc::clone(&handle.cancelled),
            done: Arc::clone(&handle.done),
        };
        self.state.heap.lock().push(task);
        self.signal();
        handle
    }

    fn signal(&self) {
        self.state.signal.notify_all();
    }

    /// Stops the scheduler thread. Pending tasks are discarded. Idempotent.
    pub(crate) fn shutdown(&self) {
        if self.state.down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.signal();
        let handle = self.state.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        self.state.heap.lock().clear();
        debug!("Scheduler stopped.");
    }
}

fn run(state: Arc<SchedulerState>) {
    debug!("Scheduler thread started.");
    let mut heap = state.heap.lock();
    loop {
        if state.down.load(Ordering::Acquire) {
            break;
        }
        let now = Instant::now();
        let due = match heap.peek() {
            Some(task) if task.execute_at <= now => heap.pop(),
            Some(task) => {
                let wait = task.execute_at - now;
                let _ = state.signal.wait_for(&mut heap, wait);
                None
            }
            None => {
                state.signal.wait(&mut heap);
                None
            }
        };
        if let Some(task) = due {
            // Deliver without holding the heap lock; sends may take
            // arbitrary mailbox locks.
            let reinsert =
                MutexGuard::unlocked(&mut heap, || fire(task));
            if let Some(task) = reinsert {
                heap.push(task);
            }
        }
    }
    debug!("Scheduler thread finished.");
}

/// Fires one task; returns it again when it repeats.
fn fire(mut task: ScheduledTask) -> Option<ScheduledTask> {
    if task.cancelled.load(Ordering::Acquire) {
        task.done.store(true, Ordering::Release);
        return None;
    }
    match &task.delivery {
        Delivery::User(message) => task.target.tell_envelope(
            Envelope::new(Arc::clone(message), task.sender.clone()),
        ),
        Delivery::System(message) => {
            task.target.send_system(message.clone(), task.sender.clone())
        }
    }
    match task.interval {
        Some(interval) if !task.cancelled.load(Ordering::Acquire) => {
            task.execute_at += interval;
            Some(task)
        }
        _ => {
            task.done.store(true, Ordering::Release);
            None
        }
    }
}

/// Per-actor timers keyed by caller-chosen names.
///
/// Starting a timer under a key that is already in use cancels the old
/// timer first, so at most one timer per key is ever active. The owning
/// cell calls [`TimerScheduler::cancel_all`] when the actor stops.
pub struct TimerScheduler {
    owner: ActorRef,
    scheduler: Scheduler,
    timers: Mutex<HashMap<String, Cancellable>>,
}

impl TimerScheduler {
    pub(crate) fn new(owner: ActorRef, scheduler: Scheduler) -> Self {
        TimerScheduler {
            owner,
            scheduler,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a one-shot timer delivering `message` to the owning actor
    /// after `delay`, replacing any timer with the same key.
    pub fn start_single_timer<M: Any + Send + Sync>(
        &self,
        key: &str,
        delay: Duration,
        message: M,
    ) -> Cancellable {
        let handle =
            self.scheduler
                .schedule_once(delay, &self.owner, message, None);
        self.store(key, handle.clone());
        handle
    }

    /// Starts a periodic timer delivering `message` to the owning actor,
    /// replacing any timer with the same key.
    pub fn start_periodic_timer<M: Any + Send + Sync>(
        &self,
        key: &str,
        initial_delay: Duration,
        interval: Duration,
        message: M,
    ) -> Cancellable {
        let handle = self.scheduler.schedule_repeatedly(
            initial_delay,
            interval,
            &self.owner,
            message,
            None,
        );
        self.store(key, handle.clone());
        handle
    }

    /// True while a timer with the given key can still fire.
    pub fn is_timer_active(&self, key: &str) -> bool {
        self.timers
            .lock()
            .get(key)
            .map(Cancellable::is_active)
            .unwrap_or(false)
    }

    /// Cancels the timer with the given key. Returns false when no such
    /// timer is pending.
    pub fn cancel(&self, key: &str) -> bool {
        self.timers
            .lock()
            .remove(key)
            .map(|handle| handle.cancel())
            .unwrap_or(false)
    }

    /// Cancels every pending timer. Intended for `post_stop`; the runtime
    /// also invokes it automatically when the owning actor stops.
    pub fn cancel_all(&self) {
        let timers: Vec<_> =
            self.timers.lock().drain().map(|(_, handle)| handle).collect();
        for handle in timers {
            handle.cancel();
        }
    }

    fn store(&self, key: &str, handle: Cancellable) {
        if let Some(previous) =
            self.timers.lock().insert(key.to_owned(), handle)
        {
            previous.cancel();
        }
    }
}
