// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Props
//!
//! A `Props` value is the immutable blueprint from which actors are built:
//! a factory closure producing fresh instances, plus the dispatcher,
//! mailbox and supervision choices for every actor spawned from it. Props
//! are cheap to clone and safe to share across threads; one value can spawn
//! any number of independent actors, and restarts use the same factory to
//! produce the replacement instance.
//!

use crate::{
    actor::Actor,
    dispatcher::DispatcherConfig,
    mailbox::MailboxConfig,
    supervision::{OneForOneStrategy, SupervisorStrategy},
};

use std::sync::Arc;

/// Factory producing fresh actor instances.
type ActorFactory = dyn Fn() -> Box<dyn Actor> + Send + Sync;

/// Immutable, shareable construction blueprint for actors.
///
/// Deriving a modified `Props` (`with_dispatcher`, `with_mailbox`,
/// `with_strategy`) always returns a new value; the original is never
/// mutated.
///
/// ```ignore
/// use actor::{Props, DispatcherConfig, DispatcherKind, MailboxConfig};
///
/// let props = Props::new(|| Worker::new("queue"))
///     .with_dispatcher(DispatcherConfig::of(DispatcherKind::Pinned))
///     .with_mailbox(MailboxConfig::ControlAware);
/// ```
#[derive(Clone)]
pub struct Props {
    factory: Arc<ActorFactory>,
    dispatcher: DispatcherConfig,
    mailbox: MailboxConfig,
    strategy: Arc<dyn SupervisorStrategy>,
}

impl Props {
    /// Creates props from a factory closure. Constructor arguments are
    /// captured by the closure.
    pub fn new<A, F>(factory: F) -> Self
    where
        A: Actor,
        F: Fn() -> A + Send + Sync + 'static,
    {
        Props {
            factory: Arc::new(move || Box::new(factory())),
            dispatcher: DispatcherConfig::default(),
            mailbox: MailboxConfig::default(),
            strategy: Arc::new(OneForOneStrategy::default()),
        }
    }

    /// Starts a fluent builder around the same factory.
    pub fn builder<A, F>(factory: F) -> PropsBuilder
    where
        A: Actor,
        F: Fn() -> A + Send + Sync + 'static,
    {
        PropsBuilder {
            props: Props::new(factory),
        }
    }

    /// Returns a copy using the given dispatcher configuration.
    pub fn with_dispatcher(&self, dispatcher: DispatcherConfig) -> Self {
        let mut props = self.clone();
        props.dispatcher = dispatcher;
        props
    }

    /// Returns a copy using the given mailbox configuration.
    pub fn with_mailbox(&self, mailbox: MailboxConfig) -> Self {
        let mut props = self.clone();
        props.mailbox = mailbox;
        props
    }

    /// Returns a copy using the given supervision strategy.
    pub fn with_strategy(
        &self,
        strategy: Arc<dyn SupervisorStrategy>,
    ) -> Self {
        let mut props = self.clone();
        props.strategy = strategy;
        props
    }

    /// Builds a fresh actor instance.
    pub(crate) fn produce(&self) -> Box<dyn Actor> {
        (self.factory)()
    }

    /// The dispatcher configuration.
    pub fn dispatcher(&self) -> &DispatcherConfig {
        &self.dispatcher
    }

    /// The mailbox configuration.
    pub fn mailbox(&self) -> &MailboxConfig {
        &self.mailbox
    }

    /// The supervision strategy this actor applies to its children (and to
    /// itself when it has no parent).
    pub fn strategy(&self) -> &Arc<dyn SupervisorStrategy> {
        &self.strategy
    }
}

impl std::fmt::Debug for Props {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Props")
            .field("dispatcher", &self.dispatcher)
            .field("mailbox", &self.mailbox)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`Props`].
pub struct PropsBuilder {
    props: Props,
}

impl PropsBuilder {
    /// Selects the dispatcher configuration.
    pub fn dispatcher(mut self, dispatcher: DispatcherConfig) -> Self {
        self.props.dispatcher = dispatcher;
        self
    }

    /// Selects the mailbox configuration.
    pub fn mailbox(mut self, mailbox: MailboxConfig) -> Self {
        self.props.mailbox = mailbox;
        self
    }

    /// Selects the supervision strategy.
    pub fn strategy(
        mut self,
        strategy: Arc<dyn SupervisorStrategy>,
    ) -> Self {
        self.props.strategy = strategy;
        self
    }

    /// Finishes the builder.
    pub fn build(self) -> Props {
        self.props
    }
}
