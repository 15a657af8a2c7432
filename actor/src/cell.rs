// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor cell
//!
//! The cell is the per-actor runtime container: it owns the actor instance,
//! its mailbox, its lifecycle state and its watcher set, and it schedules
//! its own mailbox draining on the assigned dispatcher.
//!
//! Two properties of the whole runtime are enforced here:
//!
//! - **Mutual exclusion.** The `scheduled` gate guarantees at most one
//!   drain pass per actor at any instant, however many dispatcher threads
//!   exist. A pass that leaves work behind re-submits the cell instead of
//!   monopolising its thread.
//! - **Failure isolation.** User code runs inside a failure boundary; an
//!   `Err` or panic from a handler or lifecycle hook is converted into a
//!   supervision decision and never reaches the dispatcher thread.
//!
//! The lifecycle is a strict state machine:
//!
//! ```text
//! Created -> Starting -> Running -> (Restarting -> Running)* -> Stopping -> Stopped
//! ```
//!
//! `Stopped` is terminal; once reached, no further processing occurs and
//! watchers have been notified exactly once.
//!

use crate::{
    actor::{Actor, ActorContext, ActorRef},
    dispatcher::Dispatcher,
    envelope::{ActorIdentity, DynMessage, Envelope, SystemMessage, Terminated},
    mailbox::{DeadLetter, Mailbox},
    scheduler::{Scheduler, TimerScheduler},
    supervision::{Directive, Failure, SupervisorStrategy},
    system::{ActorSystem, SystemState},
    ActorPath, Error, Props,
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};
use uuid::Uuid;

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::{Duration, Instant},
};

/// Lifecycle states of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Created,
    Starting,
    Running,
    Restarting,
    Stopping,
    Stopped,
}

/// The next unit of work for a drain pass: control traffic always comes
/// before user envelopes, and the two are matched exhaustively so user
/// handlers can never observe a system message.
enum Item {
    System(SystemMessage, Option<ActorRef>),
    User(Envelope),
}

/// Per-actor runtime container. Exactly one cell exists per live path.
pub(crate) struct ActorCell {
    path: ActorPath,
    uid: Uuid,
    props: Props,
    actor: Mutex<Option<Box<dyn Actor>>>,
    mailbox: Box<dyn Mailbox>,
    dispatcher: Arc<dyn Dispatcher>,
    /// True when the dispatcher is exclusive to this actor (pinned) and
    /// must be released when the actor stops.
    owns_dispatcher: bool,
    throughput: usize,
    state: Mutex<Lifecycle>,
    state_changed: Condvar,
    /// Gate ensuring at most one in-flight drain pass.
    scheduled: AtomicBool,
    /// Control messages; drained ahead of the mailbox.
    system_queue: Mutex<VecDeque<(SystemMessage, Option<ActorRef>)>>,
    watchers: Mutex<Vec<ActorRef>>,
    children: Mutex<Vec<ActorRef>>,
    parent: Option<ActorRef>,
    system: Weak<SystemState>,
    /// Message being processed, consulted by the restart path.
    current_message: Mutex<Option<DynMessage>>,
    timers: Mutex<Option<Arc<TimerScheduler>>>,
    self_ref: Weak<ActorCell>,
}

impl ActorCell {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        path: ActorPath,
        props: Props,
        mailbox: Box<dyn Mailbox>,
        dispatcher: Arc<dyn Dispatcher>,
        owns_dispatcher: bool,
        parent: Option<ActorRef>,
        system: Weak<SystemState>,
    ) -> Arc<Self> {
        let throughput = props.dispatcher().throughput.max(1);
        let actor = props.produce();
        Arc::new_cyclic(|self_ref| ActorCell {
            path,
            uid: Uuid::new_v4(),
            props,
            actor: Mutex::new(Some(actor)),
            mailbox,
            dispatcher,
            owns_dispatcher,
            throughput,
            state: Mutex::new(Lifecycle::Created),
            state_changed: Condvar::new(),
            scheduled: AtomicBool::new(false),
            system_queue: Mutex::new(VecDeque::new()),
            watchers: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
            parent,
            system,
            current_message: Mutex::new(None),
            timers: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    pub(crate) fn path(&self) -> &ActorPath {
        &self.path
    }

    pub(crate) fn uid(&self) -> Uuid {
        self.uid
    }

    pub(crate) fn myself(&self) -> ActorRef {
        ActorRef::new(self.path.clone(), self.uid, self.system.clone())
    }

    pub(crate) fn mailbox_len(&self) -> usize {
        self.mailbox.len()
    }

    pub(crate) fn children(&self) -> Vec<ActorRef> {
        self.children.lock().clone()
    }

    /// True for actors without a supervising parent (user-guardian
    /// children and temporary ask actors).
    pub(crate) fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    /// Releases a dispatcher owned exclusively by this actor.
    pub(crate) fn release_dispatcher(&self) {
        if self.owns_dispatcher {
            self.dispatcher.shutdown(false);
        }
    }

    pub(crate) fn register_child(&self, child: ActorRef) {
        let mut children = self.children.lock();
        if !children.contains(&child) {
            children.push(child);
        }
    }

    pub(crate) fn remove_child(&self, path: &ActorPath) {
        self.children.lock().retain(|child| child.path() != path);
    }

    /// Lazily created per-actor timers; cancelled when the actor stops.
    pub(crate) fn timers(&self, scheduler: Scheduler) -> Arc<TimerScheduler> {
        let mut timers = self.timers.lock();
        match timers.as_ref() {
            Some(existing) => Arc::clone(existing),
            None => {
                let created =
                    Arc::new(TimerScheduler::new(self.myself(), scheduler));
                *timers = Some(Arc::clone(&created));
                created
            }
        }
    }

    /// Starts the actor: runs `pre_start` inside the failure boundary and,
    /// on success, transitions to `Running` and schedules any queued work.
    pub(crate) fn start(&self) {
        {
            let mut state = self.state.lock();
            if *state != Lifecycle::Created {
                return;
            }
            *state = Lifecycle::Starting;
        }
        debug!("Actor {} is starting.", self.path);
        let Some(cell) = self.self_ref.upgrade() else {
            return;
        };
        let Some(system) = self.owner() else {
            return;
        };
        let mut actor = match self.actor.lock().take() {
            Some(actor) => actor,
            None => return,
        };
        let mut ctx = ActorContext::new(&cell, system);
        match run_protected(|| actor.pre_start(&mut ctx)) {
            Ok(()) => {
                let mut state = self.state.lock();
                if *state == Lifecycle::Starting {
                    *state = Lifecycle::Running;
                }
                drop(state);
                debug!("Actor {} has started successfully.", self.path);
            }
            Err(cause) => {
                error!("Actor {} failed to start: {}", self.path, cause);
                let failure =
                    Error::Start(self.path.clone(), cause.to_string());
                self.handle_failure(failure, &mut actor, &mut ctx);
            }
        }
        self.finish_pass(actor, &mut ctx);
    }

    /// Accepts a user envelope, or routes it to dead letters when the
    /// actor no longer takes messages.
    pub(crate) fn send_envelope(&self, envelope: Envelope) {
        let accepting = !matches!(
            *self.state.lock(),
            Lifecycle::Stopping | Lifecycle::Stopped
        );
        if !accepting {
            self.dead_letter(envelope);
            return;
        }
        match self.mailbox.enqueue(envelope.clone()) {
            Ok(()) => self.dispatch(),
            Err(cause) => {
                warn!(
                    "Mailbox of {} rejected a message: {}",
                    self.path, cause
                );
                self.dead_letter(envelope);
            }
        }
    }

    /// Accepts a control message; control traffic jumps all queued user
    /// messages.
    pub(crate) fn send_system(
        &self,
        message: SystemMessage,
        sender: Option<ActorRef>,
    ) {
        {
            let state = self.state.lock();
            if matches!(*state, Lifecycle::Stopping | Lifecycle::Stopped) {
                drop(state);
                if let SystemMessage::Watch(watcher) = message {
                    watcher.tell(
                        Terminated {
                            path: self.path.clone(),
                            existence_confirmed: true,
                        },
                        None,
                    );
                }
                return;
            }
        }
        self.system_queue.lock().push_back((message, sender));
        self.dispatch();
    }

    /// Schedules a drain pass unless one is already in flight. User
    /// envelopes only count as work while the actor is running; during a
    /// deferred restart the cell wakes up for control traffic alone.
    pub(crate) fn dispatch(&self) {
        let state = *self.state.lock();
        let has_work = match state {
            Lifecycle::Running => {
                !self.system_queue.lock().is_empty()
                    || !self.mailbox.is_empty()
            }
            Lifecycle::Restarting => !self.system_queue.lock().is_empty(),
            _ => false,
        };
        if !has_work {
            return;
        }
        if self
            .scheduled
            .compare_exchange(
                false,
                true,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            let Some(cell) = self.self_ref.upgrade() else {
                self.scheduled.store(false, Ordering::Release);
                return;
            };
            self.dispatcher
                .execute(Box::new(move || cell.process_mailbox()));
        }
    }

    /// One drain pass: control messages first, then up to `throughput`
    /// user envelopes, each inside the failure boundary. Leftover work
    /// re-submits the cell so no actor monopolises a dispatcher thread.
    fn process_mailbox(&self) {
        let Some(cell) = self.self_ref.upgrade() else {
            return;
        };
        let Some(system) = self.owner() else {
            self.scheduled.store(false, Ordering::Release);
            return;
        };
        let mut actor = match self.actor.lock().take() {
            Some(actor) => actor,
            None => {
                // The instance is held elsewhere (a stop adopted it);
                // nothing to do.
                self.scheduled.store(false, Ordering::Release);
                return;
            }
        };
        let mut ctx = ActorContext::new(&cell, system);
        let mut processed = 0;
        while processed < self.throughput {
            let Some(item) = self.next_item() else {
                break;
            };
            match item {
                Item::System(message, sender) => {
                    ctx.set_sender(sender);
                    self.handle_system(message, &mut actor, &mut ctx);
                }
                Item::User(envelope) => {
                    processed += 1;
                    let (message, sender) = envelope.into_parts();
                    *self.current_message.lock() =
                        Some(Arc::clone(&message));
                    ctx.set_sender(sender);
                    let result = run_protected(|| {
                        actor.receive(Arc::clone(&message), &mut ctx)
                    });
                    if let Err(cause) = result {
                        warn!(
                            "Actor {} failed handling a message: {}",
                            self.path, cause
                        );
                        self.handle_failure(cause, &mut actor, &mut ctx);
                    }
                    *self.current_message.lock() = None;
                }
            }
            if *self.state.lock() == Lifecycle::Stopping {
                break;
            }
        }
        self.finish_pass(actor, &mut ctx);
    }

    /// Control messages come before user envelopes; user envelopes are
    /// only drained while the actor is running.
    fn next_item(&self) -> Option<Item> {
        if let Some((message, sender)) = self.system_queue.lock().pop_front()
        {
            return Some(Item::System(message, sender));
        }
        if *self.state.lock() == Lifecycle::Running {
            self.mailbox.dequeue(Duration::ZERO).map(Item::User)
        } else {
            None
        }
    }

    fn handle_system(
        &self,
        message: SystemMessage,
        actor: &mut Box<dyn Actor>,
        ctx: &mut ActorContext<'_>,
    ) {
        match message {
            SystemMessage::Stop => {
                self.mark_stopping();
            }
            SystemMessage::Kill => {
                warn!("Actor {} killed.", self.path);
                self.mark_stopping();
            }
            SystemMessage::Identify => {
                if let Some(sender) = ctx.sender() {
                    sender.tell(
                        ActorIdentity {
                            path: self.path.clone(),
                            uid: self.uid,
                        },
                        Some(&self.myself()),
                    );
                }
            }
            SystemMessage::Restart { reason } => {
                self.do_restart(reason, actor, ctx);
            }
            SystemMessage::Watch(watcher) => {
                let mut watchers = self.watchers.lock();
                if !watchers.contains(&watcher) {
                    watchers.push(watcher);
                }
            }
            SystemMessage::Unwatch(watcher) => {
                self.watchers.lock().retain(|w| w != &watcher);
            }
            SystemMessage::Escalated(failure) => {
                warn!(
                    "Failure of {} escalated to {}.",
                    failure.child.path(),
                    self.path
                );
                let cause =
                    Error::Escalated(failure.child.path().clone());
                self.handle_failure(cause, actor, ctx);
            }
        }
    }

    /// Routes a failure to the governing supervision strategy: the
    /// parent's when the actor has one, the actor's own `Props` strategy
    /// at the top level.
    fn handle_failure(
        &self,
        cause: Error,
        actor: &mut Box<dyn Actor>,
        ctx: &mut ActorContext<'_>,
    ) {
        let failure = Failure {
            child: self.myself(),
            error: cause.clone(),
            message: self.current_message.lock().clone(),
        };
        let supervisor = self.parent.as_ref().and_then(|p| p.cell());
        let strategy: Arc<dyn SupervisorStrategy> = match &supervisor {
            Some(parent_cell) => Arc::clone(parent_cell.props.strategy()),
            None => Arc::clone(self.props.strategy()),
        };
        let directive = strategy.decide(&failure);
        debug!(
            "Supervision directive for {}: {:?}.",
            self.path, directive
        );
        match directive {
            Directive::Resume => {
                debug!("Actor {} resumes with its current state.", self.path);
            }
            Directive::Restart => {
                if strategy.applies_to_siblings() {
                    self.notify_siblings(&supervisor, |sibling| {
                        sibling.send_system(
                            SystemMessage::Restart {
                                reason: cause.clone(),
                            },
                            None,
                        );
                    });
                }
                match strategy.restart_delay(&failure) {
                    None => self.do_restart(cause, actor, ctx),
                    Some(delay) => {
                        debug!(
                            "Restart of {} deferred for {:?}.",
                            self.path, delay
                        );
                        {
                            let mut state = self.state.lock();
                            if !matches!(
                                *state,
                                Lifecycle::Stopping | Lifecycle::Stopped
                            ) {
                                *state = Lifecycle::Restarting;
                            }
                        }
                        ctx.system().scheduler().schedule_system(
                            delay,
                            &self.myself(),
                            SystemMessage::Restart { reason: cause },
                        );
                    }
                }
            }
            Directive::Stop => {
                if strategy.applies_to_siblings() {
                    self.notify_siblings(&supervisor, |sibling| {
                        sibling.send_system(SystemMessage::Stop, None);
                    });
                }
                self.mark_stopping();
            }
            Directive::Escalate => match &self.parent {
                Some(parent) => {
                    parent.send_system(
                        SystemMessage::Escalated(failure),
                        None,
                    );
                }
                None => {
                    warn!(
                        "Failure at {} with no supervisor; stopping.",
                        self.path
                    );
                    self.mark_stopping();
                }
            },
        }
    }

    fn notify_siblings<F: Fn(&ActorRef)>(
        &self,
        supervisor: &Option<Arc<ActorCell>>,
        notify: F,
    ) {
        if let Some(parent_cell) = supervisor {
            for sibling in parent_cell.children() {
                if sibling.path() != &self.path {
                    notify(&sibling);
                }
            }
        }
    }

    /// Replaces the actor instance with a fresh one built from the same
    /// `Props`. Mailbox, watchers and children are preserved.
    fn do_restart(
        &self,
        reason: Error,
        actor: &mut Box<dyn Actor>,
        ctx: &mut ActorContext<'_>,
    ) {
        debug!("Restarting actor {}.", self.path);
        let offending = self.current_message.lock().clone();
        if let Err(cause) = run_protected(|| {
            actor.pre_restart(ctx, &reason, offending.as_ref())
        }) {
            warn!(
                "Actor {} failed in pre_restart: {}",
                self.path, cause
            );
        }
        let mut fresh = self.props.produce();
        std::mem::swap(actor, &mut fresh);
        drop(fresh);
        {
            let mut state = self.state.lock();
            if !matches!(
                *state,
                Lifecycle::Stopping | Lifecycle::Stopped
            ) {
                *state = Lifecycle::Running;
            }
        }
        match run_protected(|| actor.post_restart(ctx)) {
            Ok(()) => debug!("Actor {} restarted.", self.path),
            Err(cause) => {
                // Re-enter the failure path so a broken replacement does
                // not loop forever: the restart window runs out and the
                // directive degrades to Stop.
                error!(
                    "Actor {} failed after restart: {}",
                    self.path, cause
                );
                self.handle_failure(cause, actor, ctx);
            }
        }
    }

    /// Requests a graceful stop; the instance owner (an active drain pass
    /// or [`ActorCell::stop`]) performs the teardown.
    pub(crate) fn mark_stopping(&self) {
        let mut state = self.state.lock();
        if !matches!(
            *state,
            Lifecycle::Stopping | Lifecycle::Stopped
        ) {
            *state = Lifecycle::Stopping;
        }
    }

    /// Authoritative external stop. If the actor is idle the teardown runs
    /// on the calling thread; an active drain pass otherwise observes the
    /// state change and completes it.
    pub(crate) fn stop(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                Lifecycle::Stopping | Lifecycle::Stopped => return,
                _ => *state = Lifecycle::Stopping,
            }
        }
        debug!("Stopping actor {}.", self.path);
        let taken = self.actor.lock().take();
        if let Some(actor) = taken {
            let Some(cell) = self.self_ref.upgrade() else {
                return;
            };
            let Some(system) = self.owner() else {
                return;
            };
            let mut ctx = ActorContext::new(&cell, system);
            self.finish_stop(actor, &mut ctx);
        }
    }

    /// Blocks until the actor reaches `Stopped`, up to `timeout`.
    pub(crate) fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while *state != Lifecycle::Stopped {
            let remaining =
                deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let _ = self.state_changed.wait_for(&mut state, remaining);
        }
        true
    }

    /// End of a processing pass: return the instance to its slot, or
    /// complete a requested stop, then release the gate and re-submit if
    /// work remains.
    fn finish_pass(&self, actor: Box<dyn Actor>, ctx: &mut ActorContext<'_>) {
        let mut slot = self.actor.lock();
        let stopping = *self.state.lock() == Lifecycle::Stopping;
        if stopping {
            drop(slot);
            self.finish_stop(actor, ctx);
        } else {
            *slot = Some(actor);
            drop(slot);
        }
        self.scheduled.store(false, Ordering::Release);
        self.dispatch();
    }

    /// The teardown sequence. Children are stopped depth-first before the
    /// parent completes; leftover messages go to dead letters; watchers
    /// are notified exactly once.
    fn finish_stop(
        &self,
        mut actor: Box<dyn Actor>,
        ctx: &mut ActorContext<'_>,
    ) {
        debug!("Actor {} is stopping.", self.path);
        let stop_timeout = ctx.system().config().stop_timeout;
        let children: Vec<ActorRef> =
            self.children.lock().drain(..).collect();
        for child in children {
            if let Some(child_cell) = child.cell() {
                child_cell.stop();
                if !child_cell.wait_stopped(stop_timeout) {
                    warn!(
                        "Child {} did not stop within {:?}.",
                        child.path(),
                        stop_timeout
                    );
                }
            }
        }
        if let Some(timers) = self.timers.lock().take() {
            timers.cancel_all();
        }
        // Pending control messages: watches are confirmed, the rest is
        // moot once the actor is gone.
        let pending: Vec<_> =
            self.system_queue.lock().drain(..).collect();
        for (message, _sender) in pending {
            if let SystemMessage::Watch(watcher) = message {
                watcher.tell(
                    Terminated {
                        path: self.path.clone(),
                        existence_confirmed: true,
                    },
                    None,
                );
            }
        }
        let leftovers = self.mailbox.clear();
        if !leftovers.is_empty() {
            debug!(
                "Discarding {} queued messages of {}.",
                leftovers.len(),
                self.path
            );
            for envelope in leftovers {
                self.dead_letter(envelope);
            }
        }
        self.mailbox.close();
        if let Err(cause) = run_protected(|| actor.post_stop(ctx)) {
            error!("Actor {} failed in post_stop: {}", self.path, cause);
        }
        {
            let mut state = self.state.lock();
            *state = Lifecycle::Stopped;
        }
        self.state_changed.notify_all();
        let watchers: Vec<ActorRef> =
            self.watchers.lock().drain(..).collect();
        for watcher in watchers {
            watcher.tell(
                Terminated {
                    path: self.path.clone(),
                    existence_confirmed: true,
                },
                None,
            );
        }
        if let Some(state) = self.system.upgrade() {
            state.unregister(&self.path, self.uid);
        }
        if let Some(parent) = &self.parent {
            if let Some(parent_cell) = parent.cell() {
                parent_cell.remove_child(&self.path);
            }
        }
        self.release_dispatcher();
        debug!("Actor {} is stopped.", self.path);
    }

    fn dead_letter(&self, envelope: Envelope) {
        if let Some(state) = self.system.upgrade() {
            let (message, sender) = envelope.into_parts();
            state.dead_letters().publish(DeadLetter {
                recipient: self.path.clone(),
                sender: sender.map(|s| s.path().clone()),
                message,
            });
        }
    }

    fn owner(&self) -> Option<ActorSystem> {
        self.system.upgrade().map(ActorSystem::from_state)
    }
}

/// Runs user code inside the failure boundary: an `Err` passes through and
/// a panic is captured as [`Error::Handler`], so neither can reach the
/// dispatcher thread.
fn run_protected<F>(f: F) -> Result<(), Error>
where
    F: FnOnce() -> Result<(), Error>,
{
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Error::Handler(panic_message(payload))),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_owned()
    }
}
