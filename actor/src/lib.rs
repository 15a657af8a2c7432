// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Troupe Actor Runtime
//!
//! A general-purpose, in-process actor-model concurrency runtime: actor
//! lifecycle management, mailbox queuing, dispatcher thread-pool
//! scheduling, fault-tolerant supervision, time-based scheduling and
//! message routing. Everything outside this crate interacts with actors
//! through `actor_of`, `tell`, `ask`, `watch` and `stop` style operations;
//! no actor state is ever shared between threads directly.
//!
//! ## Overview
//!
//! An actor is an isolated unit of behaviour processing one message at a
//! time. In response to a message it can update its private state, create
//! supervised child actors, send messages to other actors (including
//! itself), schedule timed messages, and stop itself. The runtime
//! guarantees that no two processing passes for the same actor ever run
//! concurrently, however many dispatcher threads exist system-wide.
//!
//! ## Core architecture
//!
//! - **[`ActorSystem`]** is the top-level registry. It creates actors by
//!   path, owns the dispatchers, the scheduler and the dead-letter office,
//!   and provides the single, idempotent [`ActorSystem::terminate`] drain.
//! - **[`Props`]** is the immutable blueprint from which actors are built:
//!   a factory closure plus dispatcher, mailbox and supervision choices.
//!   One `Props` value can spawn any number of independent actors.
//! - **[`ActorRef`]** is the only way to address an actor. A ref is a path
//!   plus incarnation id; delivery resolves the live actor through the
//!   registry, so a ref held after its actor stopped routes sends to dead
//!   letters instead of dangling.
//! - **Mailboxes** queue pending envelopes per actor: unbounded, bounded,
//!   priority or control-aware, selected via [`MailboxConfig`].
//! - **Dispatchers** execute the mailbox-draining work on pools of OS
//!   threads: a shared default pool, pinned per-actor threads, a
//!   deterministic calling-thread variant for tests, a work-stealing
//!   fork-join pool, and a balancing wrapper; see [`DispatcherConfig`].
//! - **Supervision** turns handler failures into decisions — resume,
//!   restart, stop or escalate — applied by the parent's strategy with
//!   restart budgets counted in sliding time windows.
//! - **[`Scheduler`]** delivers one-shot and periodic messages from a
//!   dedicated timer thread; [`TimerScheduler`] wraps it per actor with
//!   named, auto-replacing timers.
//! - **Routers** fan messages out over routee pools or groups with
//!   round-robin, random, broadcast, scatter-gather, smallest-mailbox or
//!   consistent-hashing logics.
//!
//! ## Getting started
//!
//! ```ignore
//! use actor::{Actor, ActorContext, ActorSystem, DynMessage, Error, Props};
//!
//! struct Greeter;
//!
//! struct Greet(String);
//!
//! impl Actor for Greeter {
//!     fn receive(
//!         &mut self,
//!         message: DynMessage,
//!         ctx: &mut ActorContext<'_>,
//!     ) -> Result<(), Error> {
//!         if let Some(Greet(name)) = message.downcast_ref() {
//!             ctx.reply(format!("hello, {}", name));
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let system = ActorSystem::default();
//! let greeter = system.actor_of(Props::new(|| Greeter), "greeter")?;
//!
//! // Fire and forget.
//! greeter.tell(Greet("world".into()), None);
//!
//! // Request/response with a deadline.
//! let reply = greeter
//!     .ask(Greet("again".into()), std::time::Duration::from_secs(1))
//!     .wait()?;
//!
//! system.terminate();
//! ```
//!
//! ## Fault tolerance
//!
//! Failures inside a handler (an `Err` return or a panic) never escape to
//! the dispatcher thread. They are captured by the owning cell and routed
//! to the supervising strategy: [`OneForOneStrategy`] restarts only the
//! failing actor, [`AllForOneStrategy`] extends the directive to its
//! siblings, and [`ExponentialBackoffStrategy`] spaces successive restarts
//! out through the scheduler. Once a restart budget is exhausted the actor
//! stops and its watchers receive a single [`Terminated`] notice.
//!

// Private modules containing the implementation
mod actor;
mod cell;
mod dispatcher;
mod envelope;
mod error;
mod mailbox;
mod path;
mod props;
mod router;
mod scheduler;
mod supervision;
mod system;

//
// Core Actor Types
//

/// The fundamental actor trait: one message handler plus lifecycle hooks
/// (`pre_start`, `pre_restart`, `post_restart`, `post_stop`).
pub use actor::Actor;

/// Execution context handed to every handler invocation, providing child
/// management, watching, timers and scheduling.
pub use actor::ActorContext;

/// Immutable, shareable handle used to `tell`, `ask` and `watch` an actor.
pub use actor::ActorRef;

//
// Messages and Envelopes
//

/// A dynamically typed, shareable message payload.
pub use envelope::DynMessage;

/// Wraps a concrete value as a [`DynMessage`].
pub use envelope::message;

/// A user message in flight: payload, optional sender, priority class.
pub use envelope::Envelope;

/// Priority class used by priority and control-aware mailboxes.
pub use envelope::Priority;

/// Termination notice delivered to watchers of a stopped actor.
pub use envelope::Terminated;

/// Reply to an identify request.
pub use envelope::ActorIdentity;

//
// Error Handling
//

/// Error type for the actor runtime.
pub use error::Error;

//
// Actor Addressing
//

/// Hierarchical path identifying actors within the system tree.
pub use path::ActorPath;

//
// Construction
//

/// Immutable actor construction blueprint.
pub use props::Props;

/// Fluent builder for [`Props`].
pub use props::PropsBuilder;

//
// Mailboxes
//

/// Per-actor queue abstraction.
pub use mailbox::Mailbox;

/// Mailbox discipline selection carried by [`Props`].
pub use mailbox::MailboxConfig;

/// Overflow behaviour of bounded mailboxes.
pub use mailbox::OverflowPolicy;

/// The concrete mailbox implementations.
pub use mailbox::{
    BoundedMailbox, ControlAwareMailbox, PriorityMailbox, UnboundedMailbox,
};

/// Record of a message that could not be delivered to a live actor.
pub use mailbox::DeadLetter;

/// Callback type for dead-letter subscriptions.
pub use mailbox::DeadLetterSubscriber;

//
// Dispatchers
//

/// Thread-pool abstraction executing actor processing work.
pub use dispatcher::Dispatcher;

/// Dispatcher selection plus per-actor drain throughput.
pub use dispatcher::DispatcherConfig;

/// The dispatcher variants an actor can be assigned to.
pub use dispatcher::DispatcherKind;

/// Unit of work submitted to a dispatcher.
pub use dispatcher::Task;

/// Default per-dispatch drain throughput.
pub use dispatcher::DEFAULT_THROUGHPUT;

/// The concrete dispatcher implementations.
pub use dispatcher::{
    BalancingDispatcher, CallingThreadDispatcher, DefaultDispatcher,
    ForkJoinDispatcher, PinnedDispatcher,
};

//
// Supervision and Fault Tolerance
//

/// Policy deciding resume/restart/stop/escalate on failure.
pub use supervision::SupervisorStrategy;

/// The decision returned by a supervision strategy.
pub use supervision::Directive;

/// A failure handed to the supervising strategy.
pub use supervision::Failure;

/// Custom decision function consulted by the windowed strategies.
pub use supervision::Decider;

/// Restarts only the failing actor within a sliding restart budget.
pub use supervision::OneForOneStrategy;

/// Applies the directive to all sibling children of the failing actor.
pub use supervision::AllForOneStrategy;

/// Delays each successive restart by a growing backoff interval.
pub use supervision::ExponentialBackoffStrategy;

/// Always stops the failing actor.
pub use supervision::StoppingStrategy;

/// Always escalates to the parent's supervisor.
pub use supervision::EscalatingStrategy;

//
// Scheduler and Timers
//

/// One-shot and periodic timed message delivery.
pub use scheduler::Scheduler;

/// Handle to a scheduled task; cancellation is idempotent and lazy.
pub use scheduler::Cancellable;

/// Per-actor timers keyed by caller-chosen names.
pub use scheduler::TimerScheduler;

//
// System Management
//

/// Top-level registry owning dispatchers, scheduler and dead letters.
pub use system::ActorSystem;

/// Configuration of an actor system.
pub use system::SystemConfig;

/// Future returned by [`ActorRef::ask`].
pub use system::AskFuture;

//
// Routers
//

/// Selects the routees that receive a message.
pub use router::RoutingLogic;

/// The routee list a logic selects from, with its generation counter.
pub use router::RouteeSet;

/// The routing logics.
pub use router::{
    BroadcastLogic, ConsistentHashingLogic, RandomLogic, RoundRobinLogic,
    ScatterGatherLogic, SmallestMailboxLogic,
};

/// Key-carrying wrapper required by consistent-hashing routers.
pub use router::ConsistentHashEnvelope;

/// Router management messages and the routee reply.
pub use router::{AddRoutee, Broadcast, GetRoutees, RemoveRoutee, Routees};

/// The actor implementing pool and group routers.
pub use router::RouterActor;

/// Router factory helpers producing ready-to-spawn [`Props`].
pub use router::{
    broadcast_group, broadcast_pool, consistent_hashing_pool, random_pool,
    round_robin_group, round_robin_pool, scatter_gather_group,
    scatter_gather_pool, smallest_mailbox_pool,
};
