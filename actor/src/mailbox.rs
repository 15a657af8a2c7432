// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Mailboxes
//!
//! A mailbox is the per-actor queue of pending [`Envelope`]s. Each cell owns
//! exactly one mailbox; it is never shared between actors. Four queuing
//! disciplines are provided, selected through [`MailboxConfig`] on the
//! actor's `Props`:
//!
//! - unbounded FIFO (the default),
//! - bounded FIFO with a configurable overflow policy,
//! - priority ordering by [`Priority`] class, FIFO within a class,
//! - control-aware, where `Priority::Control` envelopes jump the queue.
//!
//! `dequeue` performs a bounded poll and never blocks indefinitely, so a
//! dispatcher thread draining an idle mailbox is returned to the pool
//! promptly.
//!
//! The module also hosts the system-wide dead-letter office: a capacity
//! bounded ring of undeliverable messages with a subscription hook.
//!

use crate::{
    envelope::{DynMessage, Envelope, Priority},
    ActorPath, Error,
};

use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

/// Queue discipline of an actor's mailbox.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum MailboxConfig {
    /// FIFO queue without a capacity limit.
    #[default]
    Unbounded,
    /// FIFO queue holding at most `capacity` envelopes; overflow behaviour
    /// is governed by the policy.
    Bounded {
        capacity: usize,
        policy: OverflowPolicy,
    },
    /// Envelopes are drained highest [`Priority`] first, FIFO within a class.
    Priority,
    /// Two FIFO segments; `Priority::Control` envelopes jump ahead of the
    /// rest.
    ControlAware,
}

impl MailboxConfig {
    /// Builds a mailbox for the actor at `path`.
    pub(crate) fn build(&self, path: ActorPath) -> Box<dyn Mailbox> {
        match self {
            MailboxConfig::Unbounded => {
                Box::new(UnboundedMailbox::new(path))
            }
            MailboxConfig::Bounded { capacity, policy } => Box::new(
                BoundedMailbox::new(path, *capacity, policy.clone()),
            ),
            MailboxConfig::Priority => Box::new(PriorityMailbox::new(path)),
            MailboxConfig::ControlAware => {
                Box::new(ControlAwareMailbox::new(path))
            }
        }
    }
}

/// What a bounded mailbox does when it is full.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Block the sender until space is available or the timeout elapses,
    /// then reject.
    Block(Duration),
    /// Reject immediately with [`Error::MailboxFull`].
    Reject,
}

/// Per-actor queue of pending envelopes.
///
/// All operations are callable from any thread; implementations guard their
/// state internally and keep critical sections free of user code.
pub trait Mailbox: Send + Sync {
    /// Appends an envelope according to the mailbox discipline.
    fn enqueue(&self, envelope: Envelope) -> Result<(), Error>;

    /// Removes the next envelope, waiting at most `timeout` for one to
    /// arrive. `Duration::ZERO` polls without waiting.
    fn dequeue(&self, timeout: Duration) -> Option<Envelope>;

    /// Number of queued envelopes.
    fn len(&self) -> usize;

    /// True when no envelopes are queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns every queued envelope. Used on stop so the cell
    /// can route leftovers to dead letters.
    fn clear(&self) -> Vec<Envelope>;

    /// Closes the mailbox; later enqueues fail with
    /// [`Error::MailboxClosed`].
    fn close(&self);

    /// True once the mailbox has been closed.
    fn is_closed(&self) -> bool;
}

struct FifoInner {
    queue: VecDeque<Envelope>,
    closed: bool,
}

/// FIFO mailbox without a capacity limit.
pub struct UnboundedMailbox {
    path: ActorPath,
    inner: Mutex<FifoInner>,
    available: Condvar,
}

impl UnboundedMailbox {
    pub fn new(path: ActorPath) -> Self {
        UnboundedMailbox {
            path,
            inner: Mutex::new(FifoInner {
                queue: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }
}

impl Mailbox for UnboundedMailbox {
    fn enqueue(&self, envelope: Envelope) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::MailboxClosed(self.path.clone()));
        }
        inner.queue.push_back(envelope);
        drop(inner);
        self.available.notify_one();
        Ok(())
    }

    fn dequeue(&self, timeout: Duration) -> Option<Envelope> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(envelope) = inner.queue.pop_front() {
                return Some(envelope);
            }
            if inner.closed {
                return None;
            }
            let remaining =
                deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let _ = self.available.wait_for(&mut inner, remaining);
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    fn clear(&self) -> Vec<Envelope> {
        self.inner.lock().queue.drain(..).collect()
    }

    fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

/// FIFO mailbox holding at most `capacity` envelopes.
pub struct BoundedMailbox {
    path: ActorPath,
    capacity: usize,
    policy: OverflowPolicy,
    inner: Mutex<FifoInner>,
    available: Condvar,
    vacant: Condvar,
}

impl BoundedMailbox {
    pub fn new(
        path: ActorPath,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> Self {
        BoundedMailbox {
            path,
            capacity: capacity.max(1),
            policy,
            inner: Mutex::new(FifoInner {
                queue: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
            vacant: Condvar::new(),
        }
    }
}

impl Mailbox for BoundedMailbox {
    fn enqueue(&self, envelope: Envelope) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::MailboxClosed(self.path.clone()));
        }
        if inner.queue.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::Reject => {
                    return Err(Error::MailboxFull(self.path.clone()));
                }
                OverflowPolicy::Block(timeout) => {
                    let deadline = Instant::now() + timeout;
                    while inner.queue.len() >= self.capacity {
                        if inner.closed {
                            return Err(Error::MailboxClosed(
                                self.path.clone(),
                            ));
                        }
                        let remaining = deadline
                            .saturating_duration_since(Instant::now());
                        if remaining.is_zero() {
                            return Err(Error::MailboxFull(
                                self.path.clone(),
                            ));
                        }
                        let _ = self.vacant.wait_for(&mut inner, remaining);
                    }
                }
            }
        }
        inner.queue.push_back(envelope);
        drop(inner);
        self.available.notify_one();
        Ok(())
    }

    fn dequeue(&self, timeout: Duration) -> Option<Envelope> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(envelope) = inner.queue.pop_front() {
                drop(inner);
                self.vacant.notify_one();
                return Some(envelope);
            }
            if inner.closed {
                return None;
            }
            let remaining =
                deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let _ = self.available.wait_for(&mut inner, remaining);
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    fn clear(&self) -> Vec<Envelope> {
        let drained: Vec<_> = self.inner.lock().queue.drain(..).collect();
        self.vacant.notify_all();
        drained
    }

    fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
        self.vacant.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

/// Heap entry pairing an envelope with a sequence number so that envelopes
/// of equal priority keep their arrival order.
struct Ranked {
    priority: Priority,
    seq: u64,
    envelope: Envelope,
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; within a class, lower sequence first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct PriorityInner {
    heap: BinaryHeap<Ranked>,
    next_seq: u64,
    closed: bool,
}

/// Mailbox ordered by [`Priority`] class, FIFO within a class.
pub struct PriorityMailbox {
    path: ActorPath,
    inner: Mutex<PriorityInner>,
    available: Condvar,
}

impl PriorityMailbox {
    pub fn new(path: ActorPath) -> Self {
        PriorityMailbox {
            path,
            inner: Mutex::new(PriorityInner {
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }
}

impl Mailbox for PriorityMailbox {
    fn enqueue(&self, envelope: Envelope) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::MailboxClosed(self.path.clone()));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(Ranked {
            priority: envelope.priority(),
            seq,
            envelope,
        });
        drop(inner);
        self.available.notify_one();
        Ok(())
    }

    fn dequeue(&self, timeout: Duration) -> Option<Envelope> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(ranked) = inner.heap.pop() {
                return Some(ranked.envelope);
            }
            if inner.closed {
                return None;
            }
            let remaining =
                deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let _ = self.available.wait_for(&mut inner, remaining);
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    fn clear(&self) -> Vec<Envelope> {
        let mut inner = self.inner.lock();
        let mut drained = Vec::with_capacity(inner.heap.len());
        while let Some(ranked) = inner.heap.pop() {
            drained.push(ranked.envelope);
        }
        drained
    }

    fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

struct ControlAwareInner {
    control: VecDeque<Envelope>,
    user: VecDeque<Envelope>,
    closed: bool,
}

/// Two-segment mailbox where [`Priority::Control`] envelopes jump ahead of
/// all user traffic; each segment stays FIFO.
pub struct ControlAwareMailbox {
    path: ActorPath,
    inner: Mutex<ControlAwareInner>,
    available: Condvar,
}

impl ControlAwareMailbox {
    pub fn new(path: ActorPath) -> Self {
        ControlAwareMailbox {
            path,
            inner: Mutex::new(ControlAwareInner {
                control: VecDeque::new(),
                user: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }
}

impl Mailbox for ControlAwareMailbox {
    fn enqueue(&self, envelope: Envelope) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::MailboxClosed(self.path.clone()));
        }
        if envelope.priority() == Priority::Control {
            inner.control.push_back(envelope);
        } else {
            inner.user.push_back(envelope);
        }
        drop(inner);
        self.available.notify_one();
        Ok(())
    }

    fn dequeue(&self, timeout: Duration) -> Option<Envelope> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(envelope) = inner.control.pop_front() {
                return Some(envelope);
            }
            if let Some(envelope) = inner.user.pop_front() {
                return Some(envelope);
            }
            if inner.closed {
                return None;
            }
            let remaining =
                deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let _ = self.available.wait_for(&mut inner, remaining);
        }
    }

    fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.control.len() + inner.user.len()
    }

    fn clear(&self) -> Vec<Envelope> {
        let mut inner = self.inner.lock();
        let mut drained: Vec<_> = inner.control.drain(..).collect();
        drained.extend(inner.user.drain(..));
        drained
    }

    fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

/// Record of a message that could not be delivered to a live actor.
#[derive(Clone)]
pub struct DeadLetter {
    /// Path the message was addressed to.
    pub recipient: ActorPath,
    /// Path of the sender, when the send carried one.
    pub sender: Option<ActorPath>,
    /// The undeliverable payload.
    pub message: DynMessage,
}

impl std::fmt::Debug for DeadLetter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetter")
            .field("recipient", &self.recipient)
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

/// Callback invoked for every dead letter.
pub type DeadLetterSubscriber = dyn Fn(&DeadLetter) + Send + Sync;

/// System-wide sink for undeliverable messages.
///
/// The office keeps the most recent dead letters in a capacity-bounded ring
/// (older entries are evicted first) and notifies every subscriber of each
/// record. Publishing never fails and never reaches back into the sender.
pub(crate) struct DeadLetterOffice {
    capacity: usize,
    ring: Mutex<VecDeque<DeadLetter>>,
    subscribers: RwLock<Vec<Arc<DeadLetterSubscriber>>>,
}

impl DeadLetterOffice {
    pub(crate) fn new(capacity: usize) -> Self {
        DeadLetterOffice {
            capacity: capacity.max(1),
            ring: Mutex::new(VecDeque::new()),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn publish(&self, dead_letter: DeadLetter) {
        debug!(
            "Dead letter for {} from {:?}.",
            dead_letter.recipient, dead_letter.sender
        );
        {
            let mut ring = self.ring.lock();
            if ring.len() >= self.capacity {
                ring.pop_front();
            }
            ring.push_back(dead_letter.clone());
        }
        let subscribers = self.subscribers.read().clone();
        for subscriber in subscribers {
            subscriber(&dead_letter);
        }
    }

    pub(crate) fn subscribe(&self, subscriber: Arc<DeadLetterSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    pub(crate) fn recent(&self) -> Vec<DeadLetter> {
        self.ring.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::message;

    fn envelope(value: usize, priority: Priority) -> Envelope {
        Envelope::with_priority(message(value), None, priority)
    }

    fn value_of(envelope: &Envelope) -> usize {
        *envelope.message().downcast_ref::<usize>().unwrap()
    }

    #[test]
    fn test_unbounded_fifo() {
        let mailbox = UnboundedMailbox::new(ActorPath::from("/t/user/a"));
        for i in 0..5 {
            mailbox.enqueue(envelope(i, Priority::Normal)).unwrap();
        }
        assert_eq!(mailbox.len(), 5);
        for i in 0..5 {
            let env = mailbox.dequeue(Duration::ZERO).unwrap();
            assert_eq!(value_of(&env), i);
        }
        assert!(mailbox.dequeue(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_bounded_reject() {
        let mailbox = BoundedMailbox::new(
            ActorPath::from("/t/user/a"),
            2,
            OverflowPolicy::Reject,
        );
        mailbox.enqueue(envelope(0, Priority::Normal)).unwrap();
        mailbox.enqueue(envelope(1, Priority::Normal)).unwrap();
        let result = mailbox.enqueue(envelope(2, Priority::Normal));
        assert_eq!(
            result,
            Err(Error::MailboxFull(ActorPath::from("/t/user/a")))
        );
        mailbox.dequeue(Duration::ZERO).unwrap();
        mailbox.enqueue(envelope(2, Priority::Normal)).unwrap();
    }

    #[test]
    fn test_bounded_block_times_out() {
        let mailbox = BoundedMailbox::new(
            ActorPath::from("/t/user/a"),
            1,
            OverflowPolicy::Block(Duration::from_millis(20)),
        );
        mailbox.enqueue(envelope(0, Priority::Normal)).unwrap();
        let start = Instant::now();
        let result = mailbox.enqueue(envelope(1, Priority::Normal));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(matches!(result, Err(Error::MailboxFull(_))));
    }

    #[test]
    fn test_priority_ordering_fifo_within_class() {
        let mailbox = PriorityMailbox::new(ActorPath::from("/t/user/a"));
        mailbox.enqueue(envelope(0, Priority::Low)).unwrap();
        mailbox.enqueue(envelope(1, Priority::Normal)).unwrap();
        mailbox.enqueue(envelope(2, Priority::High)).unwrap();
        mailbox.enqueue(envelope(3, Priority::Normal)).unwrap();
        mailbox.enqueue(envelope(4, Priority::Control)).unwrap();

        let order: Vec<usize> = std::iter::from_fn(|| {
            mailbox.dequeue(Duration::ZERO).map(|e| value_of(&e))
        })
        .collect();
        assert_eq!(order, vec![4, 2, 1, 3, 0]);
    }

    #[test]
    fn test_control_aware_jumps_queue() {
        let mailbox = ControlAwareMailbox::new(ActorPath::from("/t/user/a"));
        mailbox.enqueue(envelope(0, Priority::Normal)).unwrap();
        mailbox.enqueue(envelope(1, Priority::Control)).unwrap();
        mailbox.enqueue(envelope(2, Priority::Normal)).unwrap();

        let first = mailbox.dequeue(Duration::ZERO).unwrap();
        assert_eq!(value_of(&first), 1);
        let second = mailbox.dequeue(Duration::ZERO).unwrap();
        assert_eq!(value_of(&second), 0);
    }

    #[test]
    fn test_clear_returns_leftovers() {
        let mailbox = UnboundedMailbox::new(ActorPath::from("/t/user/a"));
        for i in 0..3 {
            mailbox.enqueue(envelope(i, Priority::Normal)).unwrap();
        }
        let drained = mailbox.clear();
        assert_eq!(drained.len(), 3);
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_closed_mailbox_rejects() {
        let mailbox = UnboundedMailbox::new(ActorPath::from("/t/user/a"));
        mailbox.close();
        let result = mailbox.enqueue(envelope(0, Priority::Normal));
        assert_eq!(
            result,
            Err(Error::MailboxClosed(ActorPath::from("/t/user/a")))
        );
    }

    #[test]
    fn test_dead_letter_ring_caps() {
        let office = DeadLetterOffice::new(2);
        for i in 0..4usize {
            office.publish(DeadLetter {
                recipient: ActorPath::from("/t/user/gone"),
                sender: None,
                message: message(i),
            });
        }
        let recent = office.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(
            recent[0].message.downcast_ref::<usize>(),
            Some(&2usize)
        );
    }
}
