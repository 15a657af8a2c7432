// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Routers
//!
//! A router is an ordinary actor owning a set of routees and forwarding
//! every message to the routees a [`RoutingLogic`] selects. Pool routers
//! spawn and supervise their routees as children; group routers route to
//! pre-existing actors resolved by path.
//!
//! Management messages ([`AddRoutee`], [`RemoveRoutee`], [`GetRoutees`],
//! [`Broadcast`]) are handled by the router itself; everything else is
//! re-told to the selected routees with the original sender preserved, so
//! replies bypass the router entirely.
//!

use crate::{
    actor::{Actor, ActorContext, ActorRef},
    envelope::{DynMessage, Envelope},
    mailbox::DeadLetter,
    ActorPath, Error, Props,
};

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, warn};

use std::{
    any::Any,
    collections::BTreeMap,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// The routee list a logic selects from, together with a generation
/// counter incremented on every membership change. Logics that cache
/// derived structures (the consistent-hash ring) rebuild when the
/// generation moves.
pub struct RouteeSet<'a> {
    routees: &'a [ActorRef],
    generation: u64,
}

impl<'a> RouteeSet<'a> {
    pub fn new(routees: &'a [ActorRef], generation: u64) -> Self {
        RouteeSet {
            routees,
            generation,
        }
    }

    pub fn routees(&self) -> &[ActorRef] {
        self.routees
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.routees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routees.is_empty()
    }
}

/// Selects the routees that receive a message.
pub trait RoutingLogic: Send + Sync {
    fn select(
        &self,
        envelope: &Envelope,
        routees: &RouteeSet<'_>,
    ) -> Vec<ActorRef>;
}

/// Cycles through the routees with a shared monotonically increasing
/// counter.
#[derive(Default)]
pub struct RoundRobinLogic {
    next: AtomicUsize,
}

impl RoutingLogic for RoundRobinLogic {
    fn select(
        &self,
        _envelope: &Envelope,
        routees: &RouteeSet<'_>,
    ) -> Vec<ActorRef> {
        if routees.is_empty() {
            return Vec::new();
        }
        let index =
            self.next.fetch_add(1, Ordering::Relaxed) % routees.len();
        vec![routees.routees()[index].clone()]
    }
}

/// Picks a routee uniformly at random.
#[derive(Default)]
pub struct RandomLogic;

impl RoutingLogic for RandomLogic {
    fn select(
        &self,
        _envelope: &Envelope,
        routees: &RouteeSet<'_>,
    ) -> Vec<ActorRef> {
        if routees.is_empty() {
            return Vec::new();
        }
        let index = rand::thread_rng().gen_range(0..routees.len());
        vec![routees.routees()[index].clone()]
    }
}

/// Sends every message to every routee.
#[derive(Default)]
pub struct BroadcastLogic;

impl RoutingLogic for BroadcastLogic {
    fn select(
        &self,
        _envelope: &Envelope,
        routees: &RouteeSet<'_>,
    ) -> Vec<ActorRef> {
        routees.routees().to_vec()
    }
}

/// Sends to every routee; the caller gathers the replies, typically
/// keeping the first one via `ask`.
#[derive(Default)]
pub struct ScatterGatherLogic;

impl RoutingLogic for ScatterGatherLogic {
    fn select(
        &self,
        _envelope: &Envelope,
        routees: &RouteeSet<'_>,
    ) -> Vec<ActorRef> {
        routees.routees().to_vec()
    }
}

/// Picks the routee with the fewest queued messages; dead routees rank
/// last.
#[derive(Default)]
pub struct SmallestMailboxLogic;

impl RoutingLogic for SmallestMailboxLogic {
    fn select(
        &self,
        _envelope: &Envelope,
        routees: &RouteeSet<'_>,
    ) -> Vec<ActorRef> {
        routees
            .routees()
            .iter()
            .min_by_key(|routee| {
                routee.mailbox_len().unwrap_or(usize::MAX)
            })
            .cloned()
            .map(|routee| vec![routee])
            .unwrap_or_default()
    }
}

/// Carries the routing key alongside the payload for
/// [`ConsistentHashingLogic`]; the router unwraps it before forwarding.
pub struct ConsistentHashEnvelope {
    /// Key hashed onto the ring.
    pub key: String,
    /// The payload forwarded to the selected routee.
    pub message: DynMessage,
}

impl ConsistentHashEnvelope {
    pub fn new<M: Any + Send + Sync>(key: &str, message: M) -> Self {
        ConsistentHashEnvelope {
            key: key.to_owned(),
            message: Arc::new(message),
        }
    }
}

struct HashRing {
    generation: Option<u64>,
    ring: BTreeMap<u64, ActorRef>,
}

/// Maps a message's routing key to a stable routee through a hash ring
/// with `virtual_nodes` positions per routee; adding or removing a routee
/// only moves the keys adjacent to its positions.
pub struct ConsistentHashingLogic {
    virtual_nodes: usize,
    ring: Mutex<HashRing>,
}

impl ConsistentHashingLogic {
    pub fn new(virtual_nodes: usize) -> Self {
        ConsistentHashingLogic {
            virtual_nodes: virtual_nodes.max(1),
            ring: Mutex::new(HashRing {
                generation: None,
                ring: BTreeMap::new(),
            }),
        }
    }

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher =
            std::collections::hash_map::DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }
}

impl RoutingLogic for ConsistentHashingLogic {
    fn select(
        &self,
        envelope: &Envelope,
        routees: &RouteeSet<'_>,
    ) -> Vec<ActorRef> {
        let Some(hashed) = envelope
            .message()
            .downcast_ref::<ConsistentHashEnvelope>()
        else {
            warn!(
                "Message without a routing key reached a consistent-hashing router."
            );
            return Vec::new();
        };
        if routees.is_empty() {
            return Vec::new();
        }
        let mut ring = self.ring.lock();
        if ring.generation != Some(routees.generation()) {
            debug!(
                "Rebuilding hash ring for generation {}.",
                routees.generation()
            );
            ring.ring.clear();
            for routee in routees.routees() {
                for node in 0..self.virtual_nodes {
                    let position = Self::hash_of(&format!(
                        "{}#{}",
                        routee.path(),
                        node
                    ));
                    ring.ring.insert(position, routee.clone());
                }
            }
            ring.generation = Some(routees.generation());
        }
        let position = Self::hash_of(&hashed.key);
        ring.ring
            .range(position..)
            .next()
            .or_else(|| ring.ring.iter().next())
            .map(|(_, routee)| vec![routee.clone()])
            .unwrap_or_default()
    }
}

/// Sends the wrapped message to every routee of the router that receives
/// it.
pub struct Broadcast(pub DynMessage);

impl Broadcast {
    pub fn new<M: Any + Send + Sync>(message: M) -> Self {
        Broadcast(Arc::new(message))
    }
}

/// Adds a routee to the router's set.
pub struct AddRoutee(pub ActorRef);

/// Removes a routee from the router's set.
pub struct RemoveRoutee(pub ActorRef);

/// Asks the router for its current routees; answered with [`Routees`].
pub struct GetRoutees;

/// Reply to [`GetRoutees`].
#[derive(Clone)]
pub struct Routees(pub Vec<ActorRef>);

/// How a router obtains its routees.
#[derive(Clone)]
enum RouterMode {
    /// Spawn `size` children from `routee_props` and supervise them.
    Pool { routee_props: Props, size: usize },
    /// Route to pre-existing actors resolved by path, unsupervised.
    Group { paths: Vec<ActorPath> },
}

/// The actor behind every router: owns the routee set, reacts to the
/// management messages and applies the configured logic to everything
/// else.
pub struct RouterActor {
    logic: Arc<dyn RoutingLogic>,
    mode: RouterMode,
    routees: Vec<ActorRef>,
    generation: u64,
}

impl RouterActor {
    fn new(logic: Arc<dyn RoutingLogic>, mode: RouterMode) -> Self {
        RouterActor {
            logic,
            mode,
            routees: Vec::new(),
            generation: 0,
        }
    }

    fn route(&self, message: DynMessage, ctx: &mut ActorContext<'_>) {
        let envelope =
            Envelope::new(Arc::clone(&message), ctx.sender().cloned());
        let set = RouteeSet::new(&self.routees, self.generation);
        let selected = self.logic.select(&envelope, &set);
        if selected.is_empty() {
            ctx.system().publish_dead_letter(DeadLetter {
                recipient: ctx.path().clone(),
                sender: ctx.sender().map(|s| s.path().clone()),
                message,
            });
            return;
        }
        // A keyed envelope is unwrapped so routees see the plain payload.
        let payload = message
            .downcast_ref::<ConsistentHashEnvelope>()
            .map(|hashed| Arc::clone(&hashed.message))
            .unwrap_or(message);
        for routee in selected {
            routee.tell_any(Arc::clone(&payload), ctx.sender().cloned());
        }
    }
}

impl Actor for RouterActor {
    fn pre_start(&mut self, ctx: &mut ActorContext<'_>) -> Result<(), Error> {
        self.routees.clear();
        let mode = self.mode.clone();
        match &mode {
            RouterMode::Pool { routee_props, size } => {
                for index in 0..*size {
                    let name = format!("r{}", index);
                    // A restarted router keeps its children; reuse them
                    // instead of spawning duplicates.
                    let routee = match ctx.get_child(&name) {
                        Some(existing) => existing,
                        None => {
                            ctx.create_child(&name, routee_props.clone())?
                        }
                    };
                    self.routees.push(routee);
                }
            }
            RouterMode::Group { paths } => {
                for path in paths {
                    match ctx.system().actor_selection(path.clone()) {
                        Some(routee) => self.routees.push(routee),
                        None => warn!(
                            "Group routee {} does not exist, skipping it.",
                            path
                        ),
                    }
                }
            }
        }
        self.generation += 1;
        Ok(())
    }

    fn receive(
        &mut self,
        message: DynMessage,
        ctx: &mut ActorContext<'_>,
    ) -> Result<(), Error> {
        if let Some(AddRoutee(routee)) = message.downcast_ref() {
            self.routees.push(routee.clone());
            self.generation += 1;
        } else if let Some(RemoveRoutee(routee)) = message.downcast_ref() {
            self.routees.retain(|existing| existing != routee);
            self.generation += 1;
        } else if message.downcast_ref::<GetRoutees>().is_some() {
            ctx.reply(Routees(self.routees.clone()));
        } else if let Some(Broadcast(payload)) = message.downcast_ref() {
            for routee in &self.routees {
                routee.tell_any(
                    Arc::clone(payload),
                    ctx.sender().cloned(),
                );
            }
        } else {
            self.route(message, ctx);
        }
        Ok(())
    }
}

fn pool_mode(routee_props: &Props, size: usize) -> RouterMode {
    RouterMode::Pool {
        routee_props: routee_props.clone(),
        size,
    }
}

/// Props of a pool router cycling messages over `size` children.
pub fn round_robin_pool(routee_props: Props, size: usize) -> Props {
    Props::new(move || {
        RouterActor::new(
            Arc::new(RoundRobinLogic::default()),
            pool_mode(&routee_props, size),
        )
    })
}

/// Props of a pool router picking a random child per message.
pub fn random_pool(routee_props: Props, size: usize) -> Props {
    Props::new(move || {
        RouterActor::new(
            Arc::new(RandomLogic),
            pool_mode(&routee_props, size),
        )
    })
}

/// Props of a pool router sending every message to all children.
pub fn broadcast_pool(routee_props: Props, size: usize) -> Props {
    Props::new(move || {
        RouterActor::new(
            Arc::new(BroadcastLogic),
            pool_mode(&routee_props, size),
        )
    })
}

/// Props of a pool router preferring the least loaded child.
pub fn smallest_mailbox_pool(routee_props: Props, size: usize) -> Props {
    Props::new(move || {
        RouterActor::new(
            Arc::new(SmallestMailboxLogic),
            pool_mode(&routee_props, size),
        )
    })
}

/// Props of a pool router mapping routing keys to stable children via a
/// hash ring with `virtual_nodes` positions per child. Messages must be
/// wrapped in [`ConsistentHashEnvelope`].
pub fn consistent_hashing_pool(
    routee_props: Props,
    size: usize,
    virtual_nodes: usize,
) -> Props {
    Props::new(move || {
        RouterActor::new(
            Arc::new(ConsistentHashingLogic::new(virtual_nodes)),
            pool_mode(&routee_props, size),
        )
    })
}

/// Props of a pool router that scatters each ask to all children; the
/// first reply resolves the caller's future.
pub fn scatter_gather_pool(routee_props: Props, size: usize) -> Props {
    Props::new(move || {
        RouterActor::new(
            Arc::new(ScatterGatherLogic),
            pool_mode(&routee_props, size),
        )
    })
}

/// Props of a group router cycling over pre-existing actors.
pub fn round_robin_group(paths: Vec<ActorPath>) -> Props {
    Props::new(move || {
        RouterActor::new(
            Arc::new(RoundRobinLogic::default()),
            RouterMode::Group {
                paths: paths.clone(),
            },
        )
    })
}

/// Props of a group router sending every message to all members.
pub fn broadcast_group(paths: Vec<ActorPath>) -> Props {
    Props::new(move || {
        RouterActor::new(
            Arc::new(BroadcastLogic),
            RouterMode::Group {
                paths: paths.clone(),
            },
        )
    })
}

/// Props of a group router that scatters each ask to all members.
pub fn scatter_gather_group(paths: Vec<ActorPath>) -> Props {
    Props::new(move || {
        RouterActor::new(
            Arc::new(ScatterGatherLogic),
            RouterMode::Group {
                paths: paths.clone(),
            },
        )
    })
}
