//! Supervision strategies
//!

use crate::{actor::ActorRef, envelope::DynMessage, ActorPath, Error};

use backoff::backoff::Backoff as InnerBackoff;
use parking_lot::Mutex;

use std::{
    collections::{HashMap, VecDeque},
    fmt::Debug,
    time::{Duration, Instant},
};

/// A failure observed while an actor was processing a message or running a
/// lifecycle hook, handed to the supervising strategy for a decision.
#[derive(Clone)]
pub struct Failure {
    /// The failing actor.
    pub child: ActorRef,
    /// What went wrong.
    pub error: Error,
    /// The message being processed when the failure occurred, if any.
    pub message: Option<DynMessage>,
}

impl Debug for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Failure")
            .field("child", self.child.path())
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// What to do with a failing actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Keep the current instance and continue with the next message.
    Resume,
    /// Replace the instance with a fresh one built from the same `Props`;
    /// mailbox and watchers are preserved.
    Restart,
    /// Stop the actor.
    Stop,
    /// Re-raise the failure to the parent's own supervisor. An actor
    /// without a parent stops instead.
    Escalate,
}

/// Custom decision function mapping an error to a [`Directive`].
pub type Decider = dyn Fn(&Error) -> Directive + Send + Sync;

/// Policy deciding how actor failures are handled. Strategies are stateful:
/// restart attempts are counted in sliding time windows, so a strategy
/// shared through cloned `Props` still budgets each supervised actor
/// correctly.
pub trait SupervisorStrategy: Debug + Send + Sync {
    /// Decides what happens to the failing actor.
    fn decide(&self, failure: &Failure) -> Directive;

    /// Delay to wait, via the scheduler, before a decided restart is
    /// performed. `None` restarts immediately.
    fn restart_delay(&self, _failure: &Failure) -> Option<Duration> {
        None
    }

    /// True when the directive applies to all sibling children rather than
    /// only the failing one.
    fn applies_to_siblings(&self) -> bool {
        false
    }
}

/// Sliding-window restart accounting shared by the concrete strategies.
#[derive(Debug)]
struct RestartWindow {
    max_restarts: usize,
    within: Duration,
    restarts: Mutex<HashMap<ActorPath, VecDeque<Instant>>>,
}

impl RestartWindow {
    fn new(max_restarts: usize, within: Duration) -> Self {
        RestartWindow {
            max_restarts,
            within,
            restarts: Mutex::new(HashMap::new()),
        }
    }

    /// Records a restart for `key` and reports whether the budget still
    /// allows it.
    fn grant(&self, key: ActorPath) -> bool {
        let now = Instant::now();
        let mut restarts = self.restarts.lock();
        let window = restarts.entry(key).or_default();
        while let Some(first) = window.front() {
            if now.duration_since(*first) > self.within {
                window.pop_front();
            } else {
                break;
            }
        }
        window.push_back(now);
        window.len() <= self.max_restarts
    }
}

/// Restarts only the failing actor, up to `max_restarts` times within the
/// `within` window; past the budget the directive degrades to
/// [`Directive::Stop`].
pub struct OneForOneStrategy {
    window: RestartWindow,
    decider: Option<Box<Decider>>,
}

impl OneForOneStrategy {
    pub fn new(max_restarts: usize, within: Duration) -> Self {
        OneForOneStrategy {
            window: RestartWindow::new(max_restarts, within),
            decider: None,
        }
    }

    /// Installs a custom decision function consulted before the restart
    /// budget is applied.
    pub fn with_decider<F>(mut self, decider: F) -> Self
    where
        F: Fn(&Error) -> Directive + Send + Sync + 'static,
    {
        self.decider = Some(Box::new(decider));
        self
    }

    fn base_directive(&self, error: &Error) -> Directive {
        match &self.decider {
            Some(decider) => decider(error),
            None => Directive::Restart,
        }
    }
}

impl Default for OneForOneStrategy {
    fn default() -> Self {
        OneForOneStrategy::new(10, Duration::from_secs(60))
    }
}

impl Debug for OneForOneStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneForOneStrategy")
            .field("max_restarts", &self.window.max_restarts)
            .field("within", &self.window.within)
            .finish_non_exhaustive()
    }
}

impl SupervisorStrategy for OneForOneStrategy {
    fn decide(&self, failure: &Failure) -> Directive {
        match self.base_directive(&failure.error) {
            Directive::Restart => {
                if self.window.grant(failure.child.path().clone()) {
                    Directive::Restart
                } else {
                    Directive::Stop
                }
            }
            directive => directive,
        }
    }
}

/// Like [`OneForOneStrategy`], but the directive applies to every sibling
/// of the failing actor; restarts are budgeted per parent.
pub struct AllForOneStrategy {
    window: RestartWindow,
    decider: Option<Box<Decider>>,
}

impl AllForOneStrategy {
    pub fn new(max_restarts: usize, within: Duration) -> Self {
        AllForOneStrategy {
            window: RestartWindow::new(max_restarts, within),
            decider: None,
        }
    }

    /// Installs a custom decision function consulted before the restart
    /// budget is applied.
    pub fn with_decider<F>(mut self, decider: F) -> Self
    where
        F: Fn(&Error) -> Directive + Send + Sync + 'static,
    {
        self.decider = Some(Box::new(decider));
        self
    }
}

impl Debug for AllForOneStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllForOneStrategy")
            .field("max_restarts", &self.window.max_restarts)
            .field("within", &self.window.within)
            .finish_non_exhaustive()
    }
}

impl SupervisorStrategy for AllForOneStrategy {
    fn decide(&self, failure: &Failure) -> Directive {
        let directive = match &self.decider {
            Some(decider) => decider(&failure.error),
            None => Directive::Restart,
        };
        match directive {
            Directive::Restart => {
                if self.window.grant(failure.child.path().parent()) {
                    Directive::Restart
                } else {
                    Directive::Stop
                }
            }
            directive => directive,
        }
    }

    fn applies_to_siblings(&self) -> bool {
        true
    }
}

/// One-for-one restarts where each successive restart is delayed by a
/// growing backoff interval, scheduled rather than performed inline.
pub struct ExponentialBackoffStrategy {
    window: RestartWindow,
    inner: Mutex<backoff::ExponentialBackoff>,
}

impl ExponentialBackoffStrategy {
    pub fn new(max_restarts: usize, within: Duration) -> Self {
        ExponentialBackoffStrategy {
            window: RestartWindow::new(max_restarts, within),
            inner: Mutex::new(backoff::ExponentialBackoff::default()),
        }
    }
}

impl Debug for ExponentialBackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExponentialBackoffStrategy")
            .field("max_restarts", &self.window.max_restarts)
            .field("within", &self.window.within)
            .finish_non_exhaustive()
    }
}

impl SupervisorStrategy for ExponentialBackoffStrategy {
    fn decide(&self, failure: &Failure) -> Directive {
        if self.window.grant(failure.child.path().clone()) {
            Directive::Restart
        } else {
            Directive::Stop
        }
    }

    fn restart_delay(&self, _failure: &Failure) -> Option<Duration> {
        self.inner.lock().next_backoff()
    }
}

/// Strategy that always stops the failing actor.
#[derive(Debug, Default)]
pub struct StoppingStrategy;

impl SupervisorStrategy for StoppingStrategy {
    fn decide(&self, _failure: &Failure) -> Directive {
        Directive::Stop
    }
}

/// Strategy that always escalates to the parent's supervisor.
#[derive(Debug, Default)]
pub struct EscalatingStrategy;

impl SupervisorStrategy for EscalatingStrategy {
    fn decide(&self, _failure: &Failure) -> Directive {
        Directive::Escalate
    }
}
