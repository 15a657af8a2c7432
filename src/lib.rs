//! Core library for the Troupe actor runtime.
//! Re-exports the actor crate: the actor model itself, message passing,
//! dispatchers, supervision, scheduling and routing. The runtime is a pure
//! in-process concurrency primitive; persistence, transport and interface
//! layers belong to the applications built on top of it.

pub use actor::{
    Actor, ActorContext, ActorIdentity, ActorPath, ActorRef, ActorSystem,
    AddRoutee, AllForOneStrategy, AskFuture, Broadcast, Cancellable,
    ConsistentHashEnvelope, DeadLetter, Directive, Dispatcher,
    DispatcherConfig, DispatcherKind, DynMessage, Envelope,
    Error as ActorError, ExponentialBackoffStrategy, Failure, GetRoutees,
    Mailbox, MailboxConfig, OneForOneStrategy, OverflowPolicy, Priority,
    Props, PropsBuilder, RemoveRoutee, Routees, RoutingLogic, Scheduler,
    SupervisorStrategy, SystemConfig, Terminated, TimerScheduler,
    broadcast_group, broadcast_pool, consistent_hashing_pool, message,
    random_pool, round_robin_group, round_robin_pool,
    scatter_gather_group, scatter_gather_pool, smallest_mailbox_pool,
};
