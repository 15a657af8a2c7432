// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Envelopes and message payloads
//!
//! Every user-level send travels through the runtime as an [`Envelope`]
//! pairing the message with its sender and a priority class. Messages are
//! dynamically typed: anything `Any + Send + Sync` can be sent, shared as an
//! [`DynMessage`] so that routers and dead letters can fan the same payload
//! out without copying it.
//!
//! Control traffic addressed to the runtime itself (stop, kill, watch, ...)
//! is a separate [`SystemMessage`] sum type. The distinction is made once, at
//! the sending edge, and matched exhaustively at the cell's processing
//! boundary; user handlers never see a system message.
//!

use crate::{actor::ActorRef, supervision::Failure, ActorPath, Error};

use serde::{Deserialize, Serialize};

use std::{any::Any, sync::Arc};

/// A dynamically typed, shareable message payload.
pub type DynMessage = Arc<dyn Any + Send + Sync>;

/// Wraps a concrete value as a [`DynMessage`].
pub fn message<M: Any + Send + Sync>(value: M) -> DynMessage {
    Arc::new(value)
}

/// Priority class of an envelope. Plain FIFO mailboxes ignore it; priority
/// and control-aware mailboxes order by it, preserving FIFO within a class.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub enum Priority {
    /// Background traffic, drained after everything else.
    Low,
    /// The default class for user messages.
    #[default]
    Normal,
    /// Urgent user traffic.
    High,
    /// Reserved for runtime control; jumps user messages in control-aware
    /// mailboxes.
    Control,
}

/// A user message in flight: payload, optional sender and priority class.
/// Immutable once enqueued.
#[derive(Clone)]
pub struct Envelope {
    message: DynMessage,
    sender: Option<ActorRef>,
    priority: Priority,
}

impl Envelope {
    /// Creates an envelope with [`Priority::Normal`].
    pub fn new(message: DynMessage, sender: Option<ActorRef>) -> Self {
        Envelope {
            message,
            sender,
            priority: Priority::default(),
        }
    }

    /// Creates an envelope with an explicit priority class.
    pub fn with_priority(
        message: DynMessage,
        sender: Option<ActorRef>,
        priority: Priority,
    ) -> Self {
        Envelope {
            message,
            sender,
            priority,
        }
    }

    /// The message payload.
    pub fn message(&self) -> &DynMessage {
        &self.message
    }

    /// The sending actor, if the send carried one.
    pub fn sender(&self) -> Option<&ActorRef> {
        self.sender.as_ref()
    }

    /// The priority class.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Consumes the envelope, returning payload and sender.
    pub(crate) fn into_parts(self) -> (DynMessage, Option<ActorRef>) {
        (self.message, self.sender)
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("sender", &self.sender.as_ref().map(|s| s.path().clone()))
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Control messages handled by the cell itself. These never reach the
/// actor's `receive` and always jump ahead of queued user messages.
#[derive(Clone, Debug)]
pub(crate) enum SystemMessage {
    /// Graceful stop: discard the mailbox, run `post_stop`, notify watchers.
    Stop,
    /// Immediate stop, bypassing the supervision decision.
    Kill,
    /// Request an [`ActorIdentity`] reply to the sender.
    Identify,
    /// Perform a restart previously decided by supervision.
    Restart { reason: Error },
    /// Register the given ref for a termination notice.
    Watch(ActorRef),
    /// Remove a previously registered watcher.
    Unwatch(ActorRef),
    /// A child escalated its failure to this actor.
    Escalated(Failure),
}

/// Termination notice delivered to watchers of a stopped actor, exactly once
/// per registered watcher.
#[derive(Clone, Debug)]
pub struct Terminated {
    /// Path of the stopped actor.
    pub path: ActorPath,
    /// True when the watched actor was seen alive before it stopped; false
    /// when the watch was issued against an already dead ref.
    pub existence_confirmed: bool,
}

/// Reply to an identify request.
#[derive(Clone, Debug)]
pub struct ActorIdentity {
    /// Path of the identified actor.
    pub path: ActorPath,
    /// Unique id of the running incarnation.
    pub uid: uuid::Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Control > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_envelope_downcast() {
        let envelope = Envelope::new(message(42usize), None);
        let value = envelope.message().downcast_ref::<usize>();
        assert_eq!(value, Some(&42));
        assert!(envelope.message().downcast_ref::<String>().is_none());
    }
}
