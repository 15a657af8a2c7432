// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor
//!
//! The `actor` module provides the `Actor` trait, the `ActorContext` handed
//! to every handler invocation, and the `ActorRef` handle used to address an
//! actor from anywhere in the process.
//!

use crate::{
    cell::ActorCell,
    envelope::{DynMessage, Envelope, SystemMessage},
    mailbox::DeadLetter,
    scheduler::{Scheduler, TimerScheduler},
    system::{ActorSystem, AskFuture, SystemState},
    ActorPath, Error, Props,
};

use tracing::{debug, warn};
use uuid::Uuid;

use std::{
    any::Any,
    sync::{Arc, Weak},
    time::Duration,
};

/// The behaviour of an actor: one message handler plus lifecycle hooks.
///
/// An actor instance is owned exclusively by its cell; the runtime
/// guarantees that `receive` and the lifecycle hooks are never invoked
/// concurrently for the same actor, so implementations can mutate their
/// state freely without locks.
///
/// Returning `Err` from `receive` (or panicking inside it) does not kill
/// the dispatcher thread: the failure is captured and handed to the
/// supervising strategy, which decides whether the actor resumes, restarts,
/// stops or escalates.
///
/// ```ignore
/// use actor::{Actor, ActorContext, DynMessage, Error};
///
/// struct Counter {
///     value: u64,
/// }
///
/// struct Increment(u64);
/// struct GetValue;
///
/// impl Actor for Counter {
///     fn receive(
///         &mut self,
///         message: DynMessage,
///         ctx: &mut ActorContext<'_>,
///     ) -> Result<(), Error> {
///         if let Some(Increment(n)) = message.downcast_ref() {
///             self.value += n;
///         } else if message.downcast_ref::<GetValue>().is_some() {
///             ctx.reply(self.value);
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Actor: Send + 'static {
    /// Handles one user message. System control messages never reach this
    /// method.
    fn receive(
        &mut self,
        message: DynMessage,
        ctx: &mut ActorContext<'_>,
    ) -> Result<(), Error>;

    /// Invoked once before the actor processes its first message. An `Err`
    /// here is routed to supervision like any other failure.
    fn pre_start(&mut self, _ctx: &mut ActorContext<'_>) -> Result<(), Error> {
        Ok(())
    }

    /// Invoked on the old instance just before a restart replaces it.
    /// `reason` is the failure that triggered the restart and `message` the
    /// envelope being processed when it happened, if any.
    fn pre_restart(
        &mut self,
        _ctx: &mut ActorContext<'_>,
        _reason: &Error,
        _message: Option<&DynMessage>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Invoked on the fresh instance right after a restart. The default
    /// implementation runs `pre_start`, so initialisation logic written
    /// there applies to restarts as well.
    fn post_restart(&mut self, ctx: &mut ActorContext<'_>) -> Result<(), Error> {
        self.pre_start(ctx)
    }

    /// Invoked once after the actor has stopped, before watchers are
    /// notified.
    fn post_stop(&mut self, _ctx: &mut ActorContext<'_>) -> Result<(), Error> {
        Ok(())
    }
}

/// Execution context handed to every handler and lifecycle hook.
///
/// The context is the actor's window on the runtime: it names the actor,
/// identifies the sender of the message being processed, and offers child
/// management, watching, timers and scheduling.
pub struct ActorContext<'a> {
    cell: &'a Arc<ActorCell>,
    system: ActorSystem,
    sender: Option<ActorRef>,
}

impl<'a> ActorContext<'a> {
    pub(crate) fn new(cell: &'a Arc<ActorCell>, system: ActorSystem) -> Self {
        ActorContext {
            cell,
            system,
            sender: None,
        }
    }

    pub(crate) fn set_sender(&mut self, sender: Option<ActorRef>) {
        self.sender = sender;
    }

    /// Path of this actor.
    pub fn path(&self) -> &ActorPath {
        self.cell.path()
    }

    /// A ref addressing this actor.
    pub fn myself(&self) -> ActorRef {
        self.cell.myself()
    }

    /// Sender of the message currently being processed, if it carried one.
    pub fn sender(&self) -> Option<&ActorRef> {
        self.sender.as_ref()
    }

    /// The owning actor system.
    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    /// Sends `message` back to the sender of the message currently being
    /// processed. Without a sender the message goes to dead letters.
    pub fn reply<M: Any + Send + Sync>(&self, message: M) {
        match &self.sender {
            Some(sender) => sender.tell(message, Some(&self.myself())),
            None => {
                self.system.publish_dead_letter(DeadLetter {
                    recipient: ActorPath::default(),
                    sender: Some(self.path().clone()),
                    message: Arc::new(message),
                });
            }
        }
    }

    /// Creates a child actor supervised by this one.
    ///
    /// The child lives at `<own path>/<name>` and this actor's supervision
    /// strategy governs its failures.
    pub fn create_child(
        &mut self,
        name: &str,
        props: Props,
    ) -> Result<ActorRef, Error> {
        let path = self.path().clone() / name;
        let child =
            self.system
                .create_actor_path(path, props, Some(self.myself()))?;
        self.cell.register_child(child.clone());
        Ok(child)
    }

    /// Looks up a direct child by name.
    pub fn get_child(&self, name: &str) -> Option<ActorRef> {
        let path = self.path().clone() / name;
        self.cell
            .children()
            .into_iter()
            .find(|child| child.path() == &path)
    }

    /// Refs of all live children.
    pub fn children(&self) -> Vec<ActorRef> {
        self.cell.children()
    }

    /// Requests a graceful stop of this actor once the current message has
    /// been handled. Children are stopped first, remaining mailbox contents
    /// go to dead letters, and watchers are notified.
    pub fn stop_self(&mut self) {
        debug!("Actor {} requested stop.", self.path());
        self.cell.mark_stopping();
    }

    /// Stops a child of this actor.
    pub fn stop_child(&self, child: &ActorRef) {
        self.system.stop_actor(child);
    }

    /// Registers this actor as a watcher of `target`; a [`Terminated`]
    /// notice arrives when the target stops.
    ///
    /// [`Terminated`]: crate::Terminated
    pub fn watch(&self, target: &ActorRef) {
        target.send_system(SystemMessage::Watch(self.myself()), None);
    }

    /// Removes this actor from the watcher set of `target`.
    pub fn unwatch(&self, target: &ActorRef) {
        target.send_system(SystemMessage::Unwatch(self.myself()), None);
    }

    /// The system scheduler, for one-shot and periodic message delivery.
    pub fn scheduler(&self) -> Scheduler {
        self.system.scheduler()
    }

    /// Per-actor timers keyed by name. Starting a timer with an existing
    /// key cancels the previous one; every timer is cancelled automatically
    /// when the actor stops.
    pub fn timers(&self) -> Arc<TimerScheduler> {
        self.cell.timers(self.system.scheduler())
    }
}

/// Immutable, shareable handle to an actor.
///
/// A ref is a path plus the unique id of the incarnation it was issued for;
/// delivery resolves the live cell through the system registry on every
/// send. Refs therefore outlive their actor safely: once the actor has
/// stopped, sends turn into dead letters instead of dangling.
#[derive(Clone)]
pub struct ActorRef {
    path: ActorPath,
    uid: Uuid,
    system: Weak<SystemState>,
}

impl ActorRef {
    pub(crate) fn new(
        path: ActorPath,
        uid: Uuid,
        system: Weak<SystemState>,
    ) -> Self {
        ActorRef { path, uid, system }
    }

    /// A ref that resolves to nothing; every send dead-ends. Used where a
    /// placeholder sender is required.
    pub(crate) fn dangling(path: ActorPath) -> Self {
        ActorRef {
            path,
            uid: Uuid::new_v4(),
            system: Weak::new(),
        }
    }

    /// Path this ref addresses.
    pub fn path(&self) -> &ActorPath {
        &self.path
    }

    /// Unique id of the actor incarnation this ref was issued for.
    pub fn uid(&self) -> Uuid {
        self.uid
    }

    /// True while the addressed incarnation is registered and accepting
    /// messages.
    pub fn is_alive(&self) -> bool {
        self.cell().is_some()
    }

    /// Fire-and-forget send. Undeliverable messages become dead letters;
    /// `tell` itself never fails.
    pub fn tell<M: Any + Send + Sync>(
        &self,
        message: M,
        sender: Option<&ActorRef>,
    ) {
        self.tell_any(Arc::new(message), sender.cloned());
    }

    /// Fire-and-forget send of an already type-erased payload. Routers use
    /// this to forward a message without re-wrapping it.
    pub fn tell_any(&self, message: DynMessage, sender: Option<ActorRef>) {
        self.tell_envelope(Envelope::new(message, sender));
    }

    pub(crate) fn tell_envelope(&self, envelope: Envelope) {
        let Some(state) = self.system.upgrade() else {
            warn!(
                "Message to {} dropped: the actor system is gone.",
                self.path
            );
            return;
        };
        match state.cell_for(&self.path, self.uid) {
            Some(cell) => cell.send_envelope(envelope),
            None => {
                let (message, sender) = envelope.into_parts();
                state.dead_letters().publish(DeadLetter {
                    recipient: self.path.clone(),
                    sender: sender.map(|s| s.path().clone()),
                    message,
                });
            }
        }
    }

    /// Request/response: sends `message` with a temporary reply actor as
    /// the sender and returns a future resolving to the first message that
    /// actor receives. If no reply arrives within `timeout` the future
    /// fails with [`Error::AskTimeout`].
    ///
    /// The future can be awaited from async code or resolved synchronously
    /// through [`AskFuture::wait`].
    pub fn ask<M: Any + Send + Sync>(
        &self,
        message: M,
        timeout: Duration,
    ) -> AskFuture {
        match self.system.upgrade() {
            Some(state) => {
                state.ask(self, Arc::new(message), timeout)
            }
            None => AskFuture::failed(Error::SystemTerminated),
        }
    }

    /// Registers `watcher` for a termination notice from this actor. If the
    /// actor is already gone the notice is delivered immediately, with
    /// `existence_confirmed` set to false.
    pub fn watch(&self, watcher: &ActorRef) {
        self.send_system(SystemMessage::Watch(watcher.clone()), None);
    }

    /// Removes `watcher` from this actor's watcher set.
    pub fn unwatch(&self, watcher: &ActorRef) {
        self.send_system(SystemMessage::Unwatch(watcher.clone()), None);
    }

    /// Terminates the actor immediately: queued user messages are not
    /// processed, the mailbox is discarded to dead letters and watchers
    /// are notified as with a graceful stop.
    pub fn kill(&self) {
        self.send_system(SystemMessage::Kill, None);
    }

    /// Number of envelopes queued in the addressed actor's mailbox, when it
    /// is alive. Routing logics use this to pick the least loaded routee.
    pub fn mailbox_len(&self) -> Option<usize> {
        self.cell().map(|cell| cell.mailbox_len())
    }

    pub(crate) fn send_system(
        &self,
        message: SystemMessage,
        sender: Option<ActorRef>,
    ) {
        match self.cell() {
            Some(cell) => cell.send_system(message, sender),
            None => {
                // The only control message with dead-ref semantics is a
                // watch: confirm the death immediately.
                if let SystemMessage::Watch(watcher) = message {
                    watcher.tell(
                        crate::Terminated {
                            path: self.path.clone(),
                            existence_confirmed: false,
                        },
                        None,
                    );
                } else {
                    debug!(
                        "Control message for dead actor {} ignored.",
                        self.path
                    );
                }
            }
        }
    }

    pub(crate) fn cell(&self) -> Option<Arc<ActorCell>> {
        self.system
            .upgrade()
            .and_then(|state| state.cell_for(&self.path, self.uid))
    }
}

impl PartialEq for ActorRef {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.uid == other.uid
    }
}

impl Eq for ActorRef {}

impl std::hash::Hash for ActorRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.path.hash(state);
        self.uid.hash(state);
    }
}

impl std::fmt::Display for ActorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}

impl std::fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ActorRef({})", self.path)
    }
}
