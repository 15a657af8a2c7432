// Ordering and mutual-exclusion guarantees under load

use actor::{
    Actor, ActorContext, ActorSystem, DispatcherConfig, DispatcherKind,
    DynMessage, Error, Props, SystemConfig,
};

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::{Duration, Instant};

fn eventually<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

// Records every integer it receives, in processing order.
struct Recorder {
    seen: Arc<Mutex<Vec<usize>>>,
}

impl Actor for Recorder {
    fn receive(
        &mut self,
        message: DynMessage,
        _ctx: &mut ActorContext<'_>,
    ) -> Result<(), Error> {
        if let Some(value) = message.downcast_ref::<usize>() {
            self.seen.lock().unwrap().push(*value);
        }
        Ok(())
    }
}

// Tracks how many processing passes overlap; the runtime must never let
// this exceed one for a single actor.
struct Exclusive {
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    processed: Arc<AtomicUsize>,
}

impl Actor for Exclusive {
    fn receive(
        &mut self,
        _message: DynMessage,
        _ctx: &mut ActorContext<'_>,
    ) -> Result<(), Error> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if self.processed.load(Ordering::SeqCst) % 37 == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.processed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_single_sender_fifo_order() {
    let system = ActorSystem::new(SystemConfig::named("fifo"));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_factory = Arc::clone(&seen);
    let recorder = system
        .actor_of(
            Props::new(move || Recorder {
                seen: Arc::clone(&seen_factory),
            }),
            "recorder",
        )
        .unwrap();

    const COUNT: usize = 200;
    for value in 0..COUNT {
        recorder.tell(value, None);
    }
    assert!(eventually(Duration::from_secs(5), || {
        seen.lock().unwrap().len() == COUNT
    }));
    let observed = seen.lock().unwrap().clone();
    assert_eq!(observed, (0..COUNT).collect::<Vec<_>>());
    system.terminate();
}

#[test]
fn test_no_concurrent_processing_for_one_actor() {
    let system = ActorSystem::new(SystemConfig::named("exclusive"));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let processed = Arc::new(AtomicUsize::new(0));

    let (a, b, c) = (
        Arc::clone(&in_flight),
        Arc::clone(&max_in_flight),
        Arc::clone(&processed),
    );
    let props = Props::new(move || Exclusive {
        in_flight: Arc::clone(&a),
        max_in_flight: Arc::clone(&b),
        processed: Arc::clone(&c),
    })
    .with_dispatcher(DispatcherConfig::of(DispatcherKind::ForkJoin {
        workers: Some(4),
    }));
    let actor = system.actor_of(props, "exclusive").unwrap();

    // Saturate the work-stealing pool from several sender threads.
    const SENDERS: usize = 4;
    const PER_SENDER: usize = 100;
    let handles: Vec<_> = (0..SENDERS)
        .map(|_| {
            let actor = actor.clone();
            std::thread::spawn(move || {
                for value in 0..PER_SENDER {
                    actor.tell(value, None);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(eventually(Duration::from_secs(10), || {
        processed.load(Ordering::SeqCst) == SENDERS * PER_SENDER
    }));
    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    system.terminate();
}

#[test]
fn test_throughput_yields_between_bursts() {
    // Two actors sharing a single-thread pool still interleave because a
    // drain pass yields after the configured throughput.
    let system = ActorSystem::new(SystemConfig::named("fairness"));
    let seen_a = Arc::new(Mutex::new(Vec::new()));
    let seen_b = Arc::new(Mutex::new(Vec::new()));

    let single_thread = DispatcherConfig {
        kind: DispatcherKind::Default { pool_size: Some(1) },
        throughput: 2,
    };
    let factory_a = Arc::clone(&seen_a);
    let actor_a = system
        .actor_of(
            Props::new(move || Recorder {
                seen: Arc::clone(&factory_a),
            })
            .with_dispatcher(single_thread.clone()),
            "a",
        )
        .unwrap();
    let factory_b = Arc::clone(&seen_b);
    let actor_b = system
        .actor_of(
            Props::new(move || Recorder {
                seen: Arc::clone(&factory_b),
            })
            .with_dispatcher(single_thread),
            "b",
        )
        .unwrap();

    for value in 0..50 {
        actor_a.tell(value, None);
        actor_b.tell(value, None);
    }
    assert!(eventually(Duration::from_secs(5), || {
        seen_a.lock().unwrap().len() == 50
            && seen_b.lock().unwrap().len() == 50
    }));
    // FIFO per actor still holds on the shared thread.
    assert_eq!(*seen_a.lock().unwrap(), (0..50).collect::<Vec<_>>());
    assert_eq!(*seen_b.lock().unwrap(), (0..50).collect::<Vec<_>>());
    system.terminate();
}
