// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!

use crate::ActorPath;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::time::Duration;

/// Error type for the actor runtime.
///
/// Most runtime conditions are not surfaced as errors at all: undeliverable
/// messages become dead letters and tasks submitted to a stopped dispatcher
/// are logged and dropped. The variants below cover the situations a caller
/// can actually react to.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// An actor with the same path is already registered.
    #[error("Actor {0} already exists.")]
    Exists(ActorPath),
    /// A message could not be enqueued for the given actor.
    #[error("Can't send message to actor {0}: {1}")]
    Send(ActorPath, String),
    /// A bounded mailbox rejected an envelope.
    #[error("Mailbox of actor {0} is full.")]
    MailboxFull(ActorPath),
    /// The mailbox has been closed because the actor stopped.
    #[error("Mailbox of actor {0} is closed.")]
    MailboxClosed(ActorPath),
    /// An `ask` did not receive a reply within its deadline.
    #[error("Ask did not complete within {0:?}.")]
    AskTimeout(Duration),
    /// An actor failed inside `pre_start`.
    #[error("Actor {0} failed to start: {1}")]
    Start(ActorPath, String),
    /// A message handler returned an error or panicked.
    #[error("Handler failed: {0}")]
    Handler(String),
    /// A child failure was escalated to its parent.
    #[error("Failure escalated from {0}.")]
    Escalated(ActorPath),
    /// The actor system has been terminated.
    #[error("The actor system is terminated.")]
    SystemTerminated,
    /// Error that does not compromise the operation of the runtime.
    #[error("Error: {0}")]
    Functional(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = Error::Exists(ActorPath::from("/troupe/user/worker"));
        assert_eq!(
            error.to_string(),
            "Actor /troupe/user/worker already exists."
        );
        let error = Error::AskTimeout(Duration::from_millis(50));
        assert!(error.to_string().contains("50ms"));
    }
}
