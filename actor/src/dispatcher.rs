// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Dispatchers
//!
//! A dispatcher executes the mailbox-draining tasks of the actors assigned
//! to it. All variants share one contract: [`Dispatcher::execute`] accepts a
//! boxed closure, [`Dispatcher::shutdown`] drains and stops the workers, and
//! submissions after shutdown are logged and dropped rather than surfaced as
//! errors.
//!
//! Variants:
//!
//! - [`DefaultDispatcher`]: a shared pool of worker threads, sized at twice
//!   the core count unless configured otherwise.
//! - [`PinnedDispatcher`]: one dedicated thread, owned by a single actor;
//!   appropriate for actors that perform blocking I/O.
//! - [`CallingThreadDispatcher`]: runs tasks synchronously on the calling
//!   thread. Deterministic, intended for tests; actors that message each
//!   other in a cycle on it will deadlock.
//! - [`ForkJoinDispatcher`]: per-worker queues with round-robin submission;
//!   idle workers steal from their siblings.
//! - [`BalancingDispatcher`]: round-robins submissions across a set of
//!   underlying dispatchers.
//!

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// Unit of work submitted to a dispatcher.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Number of messages an actor drains per dispatch before yielding its
/// thread, unless overridden through [`DispatcherConfig`].
pub const DEFAULT_THROUGHPUT: usize = 5;

/// How long an idle fork-join worker sleeps when its own queue and every
/// sibling queue are empty.
const STEAL_BACKOFF: Duration = Duration::from_micros(200);

/// Thread-pool abstraction executing actor processing work.
pub trait Dispatcher: Send + Sync {
    /// Submits a task for execution. After shutdown the task is dropped
    /// with a warning.
    fn execute(&self, task: Task);

    /// Stops accepting tasks; already queued tasks are drained. With
    /// `wait`, blocks until the worker threads have finished.
    fn shutdown(&self, wait: bool);

    /// True once `shutdown` has been called.
    fn is_shutdown(&self) -> bool;
}

/// Dispatcher selection plus the per-actor drain throughput.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Which dispatcher variant executes the actor.
    pub kind: DispatcherKind,
    /// Maximum envelopes drained per dispatch before the actor yields.
    pub throughput: usize,
}

impl DispatcherConfig {
    /// Configuration for the given kind with the default throughput.
    pub fn of(kind: DispatcherKind) -> Self {
        DispatcherConfig {
            kind,
            throughput: DEFAULT_THROUGHPUT,
        }
    }

    /// Returns a copy with a different throughput.
    pub fn with_throughput(&self, throughput: usize) -> Self {
        DispatcherConfig {
            kind: self.kind.clone(),
            throughput: throughput.max(1),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig::of(DispatcherKind::default())
    }
}

/// The dispatcher variants an actor can be assigned to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DispatcherKind {
    /// Shared worker pool; `pool_size` defaults to twice the core count.
    Default { pool_size: Option<usize> },
    /// One dedicated thread per actor.
    Pinned,
    /// Synchronous execution on the submitting thread.
    CallingThread,
    /// Work-stealing pool; `workers` defaults to the core count.
    ForkJoin { workers: Option<usize> },
    /// Round-robin over `count` dispatchers of the inner kind.
    Balancing {
        count: usize,
        worker: Box<DispatcherKind>,
    },
}

impl Default for DispatcherKind {
    fn default() -> Self {
        DispatcherKind::Default { pool_size: None }
    }
}

impl DispatcherKind {
    /// Key under which instances of this kind are shared between actors.
    /// `None` means the kind is never shared (one instance per actor).
    pub(crate) fn cache_key(&self) -> Option<String> {
        match self {
            DispatcherKind::Default { pool_size } => {
                Some(format!("default-{}", pool_size.unwrap_or(0)))
            }
            DispatcherKind::Pinned => None,
            DispatcherKind::CallingThread => Some("calling-thread".into()),
            DispatcherKind::ForkJoin { workers } => {
                Some(format!("fork-join-{}", workers.unwrap_or(0)))
            }
            DispatcherKind::Balancing { count, worker } => worker
                .cache_key()
                .map(|inner| format!("balancing-{}-{}", count, inner)),
        }
    }

    /// Builds a dispatcher of this kind. `label` seeds the worker thread
    /// names.
    pub(crate) fn build(&self, label: &str) -> Arc<dyn Dispatcher> {
        match self {
            DispatcherKind::Default { pool_size } => {
                let size = pool_size.unwrap_or_else(|| 2 * num_cpus::get());
                Arc::new(DefaultDispatcher::new(label, size))
            }
            DispatcherKind::Pinned => Arc::new(PinnedDispatcher::new(label)),
            DispatcherKind::CallingThread => {
                Arc::new(CallingThreadDispatcher::new())
            }
            DispatcherKind::ForkJoin { workers } => {
                let size = workers.unwrap_or_else(num_cpus::get);
                Arc::new(ForkJoinDispatcher::new(label, size))
            }
            DispatcherKind::Balancing { count, worker } => {
                let count = (*count).max(1);
                let inner = (0..count)
                    .map(|i| worker.build(&format!("{}-{}", label, i)))
                    .collect();
                Arc::new(BalancingDispatcher::new(inner))
            }
        }
    }
}

/// Shared thread pool fed from a single queue.
pub struct DefaultDispatcher {
    sender: RwLock<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DefaultDispatcher {
    /// Creates a pool with `size` worker threads.
    pub fn new(label: &str, size: usize) -> Self {
        let (sender, receiver) = unbounded::<Task>();
        let size = size.max(1);
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            workers.push(spawn_worker(
                format!("{}-{}", label, i),
                receiver.clone(),
            ));
        }
        DefaultDispatcher {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }
}

impl Dispatcher for DefaultDispatcher {
    fn execute(&self, task: Task) {
        let sender = self.sender.read();
        match sender.as_ref() {
            Some(sender) => {
                // The channel is unbounded; send only fails if every worker
                // is gone, which shutdown already guards against.
                let _ = sender.send(task);
            }
            None => warn!("Task submitted after dispatcher shutdown, dropping it."),
        }
    }

    fn shutdown(&self, wait: bool) {
        // Dropping the sender lets the workers drain the queue and exit.
        self.sender.write().take();
        if wait {
            join_workers(&self.workers);
        }
    }

    fn is_shutdown(&self) -> bool {
        self.sender.read().is_none()
    }
}

/// One dedicated thread and queue, owned by a single actor. The thread may
/// block indefinitely on its queue since no other actor shares it.
pub struct PinnedDispatcher {
    sender: RwLock<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PinnedDispatcher {
    pub fn new(label: &str) -> Self {
        let (sender, receiver) = unbounded::<Task>();
        let worker = spawn_worker(format!("{}-pinned", label), receiver);
        PinnedDispatcher {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(vec![worker]),
        }
    }

    /// Reclaims the dedicated thread. Queued tasks are drained first.
    pub fn release_thread(&self) {
        self.shutdown(false);
    }
}

impl Dispatcher for PinnedDispatcher {
    fn execute(&self, task: Task) {
        let sender = self.sender.read();
        match sender.as_ref() {
            Some(sender) => {
                let _ = sender.send(task);
            }
            None => warn!("Task submitted after dispatcher shutdown, dropping it."),
        }
    }

    fn shutdown(&self, wait: bool) {
        self.sender.write().take();
        if wait {
            join_workers(&self.workers);
        }
    }

    fn is_shutdown(&self) -> bool {
        self.sender.read().is_none()
    }
}

/// Runs every task synchronously on the thread that submits it.
///
/// Execution is deterministic, which makes this variant convenient for
/// tests. It must not be used by actors that message each other in a cycle:
/// the nested synchronous sends deadlock.
#[derive(Default)]
pub struct CallingThreadDispatcher {
    down: AtomicBool,
}

impl CallingThreadDispatcher {
    pub fn new() -> Self {
        CallingThreadDispatcher::default()
    }
}

impl Dispatcher for CallingThreadDispatcher {
    fn execute(&self, task: Task) {
        if self.down.load(Ordering::Acquire) {
            warn!("Task submitted after dispatcher shutdown, dropping it.");
            return;
        }
        task();
    }

    fn shutdown(&self, _wait: bool) {
        self.down.store(true, Ordering::Release);
    }

    fn is_shutdown(&self) -> bool {
        self.down.load(Ordering::Acquire)
    }
}

/// Work-stealing pool: each worker owns a queue, submissions are assigned
/// round-robin, and an idle worker first pops its own queue, then steals
/// from its siblings, then sleeps briefly.
pub struct ForkJoinDispatcher {
    queues: Arc<Vec<Mutex<VecDeque<Task>>>>,
    next: AtomicUsize,
    down: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ForkJoinDispatcher {
    pub fn new(label: &str, size: usize) -> Self {
        let size = size.max(1);
        let queues: Arc<Vec<Mutex<VecDeque<Task>>>> =
            Arc::new((0..size).map(|_| Mutex::new(VecDeque::new())).collect());
        let down = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let queues = Arc::clone(&queues);
            let down = Arc::clone(&down);
            let handle = thread::Builder::new()
                .name(format!("{}-fj-{}", label, index))
                .spawn(move || loop {
                    let task = next_task(&queues, index);
                    match task {
                        Some(task) => task(),
                        None => {
                            if down.load(Ordering::Acquire) {
                                break;
                            }
                            thread::sleep(STEAL_BACKOFF);
                        }
                    }
                })
                .expect("failed to spawn fork-join worker");
            workers.push(handle);
        }
        ForkJoinDispatcher {
            queues,
            next: AtomicUsize::new(0),
            down,
            workers: Mutex::new(workers),
        }
    }
}

/// Pops the worker's own queue, stealing from the back of a sibling queue
/// when it comes up empty.
fn next_task(
    queues: &[Mutex<VecDeque<Task>>],
    own: usize,
) -> Option<Task> {
    if let Some(task) = queues[own].lock().pop_front() {
        return Some(task);
    }
    for offset in 1..queues.len() {
        let victim = (own + offset) % queues.len();
        if let Some(task) = queues[victim].lock().pop_back() {
            return Some(task);
        }
    }
    None
}

impl Dispatcher for ForkJoinDispatcher {
    fn execute(&self, task: Task) {
        if self.down.load(Ordering::Acquire) {
            warn!("Task submitted after dispatcher shutdown, dropping it.");
            return;
        }
        let index =
            self.next.fetch_add(1, Ordering::Relaxed) % self.queues.len();
        self.queues[index].lock().push_back(task);
    }

    fn shutdown(&self, wait: bool) {
        self.down.store(true, Ordering::Release);
        if wait {
            join_workers(&self.workers);
        }
    }

    fn is_shutdown(&self) -> bool {
        self.down.load(Ordering::Acquire)
    }
}

/// Round-robins submissions across a set of underlying dispatchers.
pub struct BalancingDispatcher {
    inner: Vec<Arc<dyn Dispatcher>>,
    next: AtomicUsize,
}

impl BalancingDispatcher {
    pub fn new(inner: Vec<Arc<dyn Dispatcher>>) -> Self {
        debug_assert!(!inner.is_empty());
        BalancingDispatcher {
            inner,
            next: AtomicUsize::new(0),
        }
    }
}

impl Dispatcher for BalancingDispatcher {
    fn execute(&self, task: Task) {
        let index =
            self.next.fetch_add(1, Ordering::Relaxed) % self.inner.len();
        self.inner[index].execute(task);
    }

    fn shutdown(&self, wait: bool) {
        for dispatcher in &self.inner {
            dispatcher.shutdown(wait);
        }
    }

    fn is_shutdown(&self) -> bool {
        self.inner.iter().all(|d| d.is_shutdown())
    }
}

fn spawn_worker(name: String, receiver: Receiver<Task>) -> JoinHandle<()> {
    thread::Builder::new()
        .name(name)
        .spawn(move || {
            debug!("Dispatcher worker started.");
            while let Ok(task) = receiver.recv() {
                task();
            }
            debug!("Dispatcher worker finished.");
        })
        .expect("failed to spawn dispatcher worker")
}

/// Joins every worker except, defensively, the calling thread itself.
fn join_workers(workers: &Mutex<Vec<JoinHandle<()>>>) {
    let handles: Vec<_> = workers.lock().drain(..).collect();
    let current = thread::current().id();
    for handle in handles {
        if handle.thread().id() != current {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicU32;
    use std::sync::mpsc;

    #[test]
    fn test_default_dispatcher_executes() {
        let dispatcher = DefaultDispatcher::new("test", 2);
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            dispatcher.execute(Box::new(move || {
                tx.send(i).unwrap();
            }));
        }
        let mut received: Vec<i32> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        received.sort_unstable();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
        dispatcher.shutdown(true);
        assert!(dispatcher.is_shutdown());
    }

    #[test]
    fn test_shutdown_drains_queued_tasks() {
        let dispatcher = DefaultDispatcher::new("drain", 1);
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            dispatcher.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        dispatcher.shutdown(true);
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        // Submissions after shutdown are dropped.
        let counter_clone = Arc::clone(&counter);
        dispatcher.execute(Box::new(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_calling_thread_runs_inline() {
        let dispatcher = CallingThreadDispatcher::new();
        let here = thread::current().id();
        let (tx, rx) = mpsc::channel();
        dispatcher.execute(Box::new(move || {
            tx.send(thread::current().id()).unwrap();
        }));
        assert_eq!(rx.try_recv().unwrap(), here);
    }

    #[test]
    fn test_fork_join_completes_all_tasks() {
        let dispatcher = ForkJoinDispatcher::new("fj", 4);
        let counter = Arc::new(AtomicU32::new(0));
        // Uneven task durations force idle workers to steal.
        for i in 0..200u64 {
            let counter = Arc::clone(&counter);
            dispatcher.execute(Box::new(move || {
                if i % 50 == 0 {
                    thread::sleep(Duration::from_millis(5));
                }
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        dispatcher.shutdown(true);
        assert_eq!(counter.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn test_balancing_spreads_over_inner() {
        let kind = DispatcherKind::Balancing {
            count: 2,
            worker: Box::new(DispatcherKind::Default { pool_size: Some(1) }),
        };
        let dispatcher = kind.build("bal");
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            dispatcher.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        dispatcher.shutdown(true);
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_cache_keys() {
        assert_eq!(DispatcherKind::Pinned.cache_key(), None);
        assert_eq!(
            DispatcherKind::default().cache_key(),
            Some("default-0".to_owned())
        );
        assert!(DispatcherKind::ForkJoin { workers: Some(4) }
            .cache_key()
            .unwrap()
            .contains("fork-join"));
    }
}
