// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor system
//!
//! The `system` module provides the `ActorSystem` type: the top-level
//! registry that creates and stops actors by path, owns the dispatchers,
//! the scheduler and the dead-letter office, and implements the
//! request/response (`ask`) pattern.
//!
//! There is no process-wide registry of systems; the owning process keeps
//! the `ActorSystem` value and decides when to call [`ActorSystem::terminate`],
//! which is the single, idempotent shutdown path.
//!

use crate::{
    actor::{Actor, ActorContext, ActorRef},
    cell::ActorCell,
    dispatcher::{Dispatcher, DispatcherConfig},
    envelope::{DynMessage, Envelope, SystemMessage},
    mailbox::{DeadLetter, DeadLetterOffice, DeadLetterSubscriber},
    scheduler::{Cancellable, Scheduler},
    supervision::StoppingStrategy,
    ActorPath, Error, Props,
};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

/// Configuration of an actor system.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Name of the system; the first segment of every actor path.
    pub name: String,
    /// Dispatcher used by actors that do not configure their own.
    pub dispatcher: DispatcherConfig,
    /// How long a stopping parent waits for each child.
    pub stop_timeout: Duration,
    /// How long `terminate` waits for each top-level actor.
    pub shutdown_timeout: Duration,
    /// Capacity of the dead-letter ring.
    pub dead_letter_capacity: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            name: "troupe".to_owned(),
            dispatcher: DispatcherConfig::default(),
            stop_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
            dead_letter_capacity: 1000,
        }
    }
}

impl SystemConfig {
    /// Default configuration under a different system name.
    pub fn named(name: &str) -> Self {
        SystemConfig {
            name: name.to_owned(),
            ..SystemConfig::default()
        }
    }
}

/// Shared state behind every handle to one actor system.
pub(crate) struct SystemState {
    config: SystemConfig,
    cells: RwLock<HashMap<ActorPath, Arc<ActorCell>>>,
    dispatchers: Mutex<HashMap<String, Arc<dyn Dispatcher>>>,
    scheduler: Scheduler,
    dead_letters: DeadLetterOffice,
    token: CancellationToken,
    terminated: AtomicBool,
    temp_seq: AtomicU64,
}

impl SystemState {
    /// Resolves the live cell for `path`, provided the registered
    /// incarnation matches `uid`. A stale ref resolves to nothing and its
    /// sends become dead letters.
    pub(crate) fn cell_for(
        &self,
        path: &ActorPath,
        uid: uuid::Uuid,
    ) -> Option<Arc<ActorCell>> {
        self.cells
            .read()
            .get(path)
            .filter(|cell| cell.uid() == uid)
            .cloned()
    }

    pub(crate) fn unregister(&self, path: &ActorPath, uid: uuid::Uuid) {
        let mut cells = self.cells.write();
        if cells.get(path).map(|cell| cell.uid() == uid).unwrap_or(false) {
            cells.remove(path);
        }
    }

    pub(crate) fn dead_letters(&self) -> &DeadLetterOffice {
        &self.dead_letters
    }

    pub(crate) fn ask(
        self: Arc<Self>,
        target: &ActorRef,
        message: DynMessage,
        timeout: Duration,
    ) -> AskFuture {
        ActorSystem::from_state(self).ask_any(target, message, timeout)
    }
}

/// Top-level registry: creates and stops actors by path, owns the default
/// dispatcher, the dead-letter sink and the scheduler.
///
/// Cloning an `ActorSystem` yields another handle to the same system.
///
/// ```ignore
/// use actor::{ActorSystem, Props, SystemConfig};
///
/// let system = ActorSystem::new(SystemConfig::named("billing"));
/// let worker = system.actor_of(Props::new(Worker::default), "worker")?;
/// worker.tell(Invoice::new(42), None);
/// system.terminate();
/// ```
#[derive(Clone)]
pub struct ActorSystem {
    state: Arc<SystemState>,
}

impl Default for ActorSystem {
    fn default() -> Self {
        ActorSystem::new(SystemConfig::default())
    }
}

impl ActorSystem {
    /// Creates a system: starts the scheduler thread and the default
    /// dispatcher pool.
    pub fn new(config: SystemConfig) -> Self {
        debug!("Creating actor system {}.", config.name);
        let scheduler = Scheduler::new(&config.name);
        let dead_letters =
            DeadLetterOffice::new(config.dead_letter_capacity);
        let mut dispatchers: HashMap<String, Arc<dyn Dispatcher>> =
            HashMap::new();
        if let Some(key) = config.dispatcher.kind.cache_key() {
            dispatchers
                .insert(key, config.dispatcher.kind.build(&config.name));
        }
        ActorSystem {
            state: Arc::new(SystemState {
                config,
                cells: RwLock::new(HashMap::new()),
                dispatchers: Mutex::new(dispatchers),
                scheduler,
                dead_letters,
                token: CancellationToken::new(),
                terminated: AtomicBool::new(false),
                temp_seq: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn from_state(state: Arc<SystemState>) -> Self {
        ActorSystem { state }
    }

    /// Name of the system.
    pub fn name(&self) -> &str {
        &self.state.config.name
    }

    /// The configuration the system was created with.
    pub fn config(&self) -> &SystemConfig {
        &self.state.config
    }

    /// The system scheduler.
    pub fn scheduler(&self) -> Scheduler {
        self.state.scheduler.clone()
    }

    fn root_path(&self) -> ActorPath {
        ActorPath::default() / self.name()
    }

    /// Launches a new top-level actor under the `user` guardian path. If
    /// another actor with the same name already exists an
    /// `Err(Error::Exists(path))` is returned instead.
    pub fn actor_of(
        &self,
        props: Props,
        name: &str,
    ) -> Result<ActorRef, Error> {
        if name.is_empty() || name.contains('/') {
            return Err(Error::Functional(format!(
                "invalid actor name '{}'",
                name
            )));
        }
        let path = self.root_path() / "user" / name;
        self.create_actor_path(path, props, None)
    }

    /// Creates an actor at an explicit path. Used by `actor_of`, by
    /// contexts spawning children, and by the ask pattern for its
    /// temporary reply actors.
    pub(crate) fn create_actor_path(
        &self,
        path: ActorPath,
        props: Props,
        parent: Option<ActorRef>,
    ) -> Result<ActorRef, Error> {
        if self.is_terminated() {
            return Err(Error::SystemTerminated);
        }
        let (dispatcher, owns_dispatcher) =
            self.resolve_dispatcher(props.dispatcher());
        let mailbox = props.mailbox().build(path.clone());
        let cell = ActorCell::new(
            path.clone(),
            props,
            mailbox,
            dispatcher,
            owns_dispatcher,
            parent,
            Arc::downgrade(&self.state),
        );
        {
            let mut cells = self.state.cells.write();
            if cells.contains_key(&path) {
                error!("Actor {} already exists!", path);
                if owns_dispatcher {
                    cell.release_dispatcher();
                }
                return Err(Error::Exists(path));
            }
            cells.insert(path.clone(), Arc::clone(&cell));
        }
        let actor_ref = cell.myself();
        cell.start();
        Ok(actor_ref)
    }

    /// Looks up a running actor by path. No actor is created; a missing or
    /// stopped path yields `None`.
    pub fn actor_selection(
        &self,
        path: impl Into<ActorPath>,
    ) -> Option<ActorRef> {
        let path = path.into();
        self.state.cells.read().get(&path).map(|cell| cell.myself())
    }

    /// Stops the addressed actor and its children, waiting up to the
    /// configured stop timeout. Returns false when the ref was already
    /// dead or the wait timed out.
    pub fn stop_actor(&self, actor: &ActorRef) -> bool {
        match actor.cell() {
            Some(cell) => {
                cell.stop();
                cell.wait_stopped(self.state.config.stop_timeout)
            }
            None => false,
        }
    }

    /// Request/response against `target` with a type-erased payload. See
    /// [`ActorRef::ask`].
    pub(crate) fn ask_any(
        &self,
        target: &ActorRef,
        message: DynMessage,
        timeout: Duration,
    ) -> AskFuture {
        let (reply_sender, reply_receiver) =
            oneshot::channel::<DynMessage>();
        let slot = Arc::new(Mutex::new(Some(reply_sender)));
        let factory_slot = Arc::clone(&slot);
        let props = Props::new(move || ReplyActor {
            slot: Arc::clone(&factory_slot),
        })
        .with_strategy(Arc::new(StoppingStrategy));

        let seq = self.state.temp_seq.fetch_add(1, Ordering::Relaxed);
        let name = format!("ask-{}", seq);
        let path = self.root_path() / "temp" / name.as_str();
        let reply_ref = match self.create_actor_path(path, props, None) {
            Ok(reply_ref) => reply_ref,
            Err(cause) => return AskFuture::failed(cause),
        };
        // If no reply arrives in time the reply actor is terminated, which
        // drops the channel and fails the future with a timeout.
        let timeout_task = self.state.scheduler.schedule_system(
            timeout,
            &reply_ref,
            SystemMessage::Stop,
        );
        target.tell_envelope(Envelope::new(message, Some(reply_ref)));
        AskFuture {
            receiver: Some(reply_receiver),
            timeout,
            timeout_task: Some(timeout_task),
            failed: None,
        }
    }

    /// Registers a callback invoked for every dead letter.
    pub fn subscribe_dead_letters<F>(&self, callback: F)
    where
        F: Fn(&DeadLetter) + Send + Sync + 'static,
    {
        let subscriber: Arc<DeadLetterSubscriber> = Arc::new(callback);
        self.state.dead_letters.subscribe(subscriber);
    }

    /// The most recent dead letters, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.dead_letters.recent()
    }

    pub(crate) fn publish_dead_letter(&self, dead_letter: DeadLetter) {
        self.state.dead_letters.publish(dead_letter);
    }

    /// True once `terminate` has begun.
    pub fn is_terminated(&self) -> bool {
        self.state.terminated.load(Ordering::Acquire)
    }

    /// Token cancelled when the system has terminated; async callers can
    /// await it.
    pub fn when_terminated(&self) -> CancellationToken {
        self.state.token.clone()
    }

    /// The single authoritative drain: stops every top-level actor
    /// (cascading to children, depth-first), shuts down all dispatchers
    /// waiting for their workers, then stops the scheduler thread.
    /// Idempotent, and safe to call from a process exit path.
    pub fn terminate(&self) {
        if self.state.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Terminating actor system {}.", self.name());
        let top_level: Vec<Arc<ActorCell>> = {
            self.state
                .cells
                .read()
                .values()
                .filter(|cell| cell.is_top_level())
                .cloned()
                .collect()
        };
        for cell in top_level {
            cell.stop();
            if !cell.wait_stopped(self.state.config.shutdown_timeout) {
                error!(
                    "Actor {} did not stop during termination.",
                    cell.path()
                );
            }
        }
        self.state.cells.write().clear();
        let dispatchers: Vec<Arc<dyn Dispatcher>> = {
            self.state
                .dispatchers
                .lock()
                .drain()
                .map(|(_, dispatcher)| dispatcher)
                .collect()
        };
        for dispatcher in dispatchers {
            dispatcher.shutdown(true);
        }
        self.state.scheduler.shutdown();
        self.state.token.cancel();
        debug!("Actor system {} terminated.", self.name());
    }

    /// Resolves the dispatcher for a config: shareable kinds are cached by
    /// key, pinned dispatchers are exclusive to their actor.
    fn resolve_dispatcher(
        &self,
        config: &DispatcherConfig,
    ) -> (Arc<dyn Dispatcher>, bool) {
        match config.kind.cache_key() {
            None => (config.kind.build(self.name()), true),
            Some(key) => {
                let mut dispatchers = self.state.dispatchers.lock();
                let dispatcher = dispatchers
                    .entry(key)
                    .or_insert_with(|| config.kind.build(self.name()));
                (Arc::clone(dispatcher), false)
            }
        }
    }

}

/// Resolves the ask future with the first message it receives, then stops
/// itself. A timeout stop simply drops the channel.
struct ReplyActor {
    slot: Arc<Mutex<Option<oneshot::Sender<DynMessage>>>>,
}

impl Actor for ReplyActor {
    fn receive(
        &mut self,
        message: DynMessage,
        ctx: &mut ActorContext<'_>,
    ) -> Result<(), Error> {
        if let Some(sender) = self.slot.lock().take() {
            let _ = sender.send(message);
        }
        ctx.stop_self();
        Ok(())
    }

    fn post_stop(&mut self, _ctx: &mut ActorContext<'_>) -> Result<(), Error> {
        // Drop an unresolved channel so a pending ask fails promptly.
        self.slot.lock().take();
        Ok(())
    }
}

/// Future returned by [`ActorRef::ask`], resolving to the reply payload or
/// failing with [`Error::AskTimeout`].
pub struct AskFuture {
    receiver: Option<oneshot::Receiver<DynMessage>>,
    timeout: Duration,
    timeout_task: Option<Cancellable>,
    failed: Option<Error>,
}

impl AskFuture {
    pub(crate) fn failed(cause: Error) -> Self {
        AskFuture {
            receiver: None,
            timeout: Duration::ZERO,
            timeout_task: None,
            failed: Some(cause),
        }
    }

    /// Blocks the calling thread until the reply or the timeout. For
    /// callers outside an async runtime.
    pub fn wait(self) -> Result<DynMessage, Error> {
        futures::executor::block_on(self)
    }
}

impl Future for AskFuture {
    type Output = Result<DynMessage, Error>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        if let Some(cause) = self.failed.take() {
            return Poll::Ready(Err(cause));
        }
        let Some(receiver) = self.receiver.as_mut() else {
            return Poll::Ready(Err(Error::Functional(
                "ask future polled after completion".to_owned(),
            )));
        };
        match Pin::new(receiver).poll(cx) {
            Poll::Ready(Ok(message)) => {
                if let Some(task) = self.timeout_task.take() {
                    task.cancel();
                }
                self.receiver = None;
                Poll::Ready(Ok(message))
            }
            Poll::Ready(Err(_)) => {
                let timeout = self.timeout;
                self.receiver = None;
                Poll::Ready(Err(Error::AskTimeout(timeout)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_config_default() {
        let config = SystemConfig::default();
        assert_eq!(config.name, "troupe");
        assert_eq!(config.dead_letter_capacity, 1000);
        let named = SystemConfig::named("billing");
        assert_eq!(named.name, "billing");
        assert_eq!(named.stop_timeout, config.stop_timeout);
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let system = ActorSystem::new(SystemConfig::named("idempotent"));
        system.terminate();
        assert!(system.is_terminated());
        // A second call returns without touching anything.
        system.terminate();
        assert!(system.when_terminated().is_cancelled());
    }

    #[test]
    fn test_no_actors_after_terminate() {
        let system = ActorSystem::new(SystemConfig::named("closed"));
        system.terminate();
        let result = system.actor_of(
            Props::new(|| ReplyActor {
                slot: Arc::new(Mutex::new(None)),
            }),
            "late",
        );
        assert_eq!(result.unwrap_err(), Error::SystemTerminated);
    }
}
