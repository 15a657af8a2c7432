// Integration tests for the actor runtime

use actor::{
    Actor, ActorContext, ActorPath, ActorSystem, DispatcherConfig,
    DispatcherKind, DynMessage, Error, Props, SystemConfig, Terminated,
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

// Parent actor keeping a counter and forwarding every change to an
// auditor child created in pre_start.
struct Counter {
    value: usize,
    audited: Arc<AtomicUsize>,
}

#[derive(Debug)]
enum CounterCommand {
    Increment(usize),
    Get,
}

struct Audit;

impl Actor for Counter {
    fn pre_start(&mut self, ctx: &mut ActorContext<'_>) -> Result<(), Error> {
        let audited = Arc::clone(&self.audited);
        ctx.create_child(
            "auditor",
            Props::new(move || Auditor {
                seen: Arc::clone(&audited),
            }),
        )?;
        Ok(())
    }

    fn receive(
        &mut self,
        message: DynMessage,
        ctx: &mut ActorContext<'_>,
    ) -> Result<(), Error> {
        match message.downcast_ref::<CounterCommand>() {
            Some(CounterCommand::Increment(amount)) => {
                self.value += amount;
                if let Some(auditor) = ctx.get_child("auditor") {
                    auditor.tell(Audit, Some(&ctx.myself()));
                }
            }
            Some(CounterCommand::Get) => ctx.reply(self.value),
            None => {}
        }
        Ok(())
    }
}

struct Auditor {
    seen: Arc<AtomicUsize>,
}

impl Actor for Auditor {
    fn receive(
        &mut self,
        message: DynMessage,
        _ctx: &mut ActorContext<'_>,
    ) -> Result<(), Error> {
        if message.downcast_ref::<Audit>().is_some() {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// Collects the termination notices it observes.
struct WatchProbe {
    notices: Arc<Mutex<Vec<Terminated>>>,
}

impl Actor for WatchProbe {
    fn receive(
        &mut self,
        message: DynMessage,
        _ctx: &mut ActorContext<'_>,
    ) -> Result<(), Error> {
        if let Some(notice) = message.downcast_ref::<Terminated>() {
            self.notices.lock().unwrap().push(notice.clone());
        }
        Ok(())
    }
}

// Replies after a deliberate delay.
struct SlowReplier {
    delay: Duration,
}

impl Actor for SlowReplier {
    fn receive(
        &mut self,
        _message: DynMessage,
        ctx: &mut ActorContext<'_>,
    ) -> Result<(), Error> {
        std::thread::sleep(self.delay);
        ctx.reply("done");
        Ok(())
    }
}

struct Prober {
    hits: Arc<AtomicUsize>,
    thread_name: Arc<Mutex<Option<String>>>,
}

impl Actor for Prober {
    fn receive(
        &mut self,
        _message: DynMessage,
        _ctx: &mut ActorContext<'_>,
    ) -> Result<(), Error> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let name = std::thread::current().name().map(str::to_owned);
        *self.thread_name.lock().unwrap() = name;
        Ok(())
    }
}

fn prober_props(
    hits: &Arc<AtomicUsize>,
    thread_name: &Arc<Mutex<Option<String>>>,
) -> Props {
    let hits = Arc::clone(hits);
    let thread_name = Arc::clone(thread_name);
    Props::new(move || Prober {
        hits: Arc::clone(&hits),
        thread_name: Arc::clone(&thread_name),
    })
}

#[tokio::test]
async fn test_tell_ask_and_children() {
    let system = ActorSystem::new(SystemConfig::named("integration"));
    let audited = Arc::new(AtomicUsize::new(0));
    let audited_factory = Arc::clone(&audited);
    let counter = system
        .actor_of(
            Props::new(move || Counter {
                value: 0,
                audited: Arc::clone(&audited_factory),
            }),
            "counter",
        )
        .unwrap();

    counter.tell(CounterCommand::Increment(10), None);
    counter.tell(CounterCommand::Increment(5), None);

    let reply = counter
        .ask(CounterCommand::Get, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(reply.downcast_ref::<usize>(), Some(&15));

    // The auditor child exists and has seen both increments.
    assert!(system
        .actor_selection("/integration/user/counter/auditor")
        .is_some());
    assert!(eventually(Duration::from_secs(2), || {
        audited.load(Ordering::SeqCst) == 2
    }));

    // Stopping the parent cascades to the child.
    assert!(system.stop_actor(&counter));
    assert!(system.actor_selection("/integration/user/counter").is_none());
    assert!(system
        .actor_selection("/integration/user/counter/auditor")
        .is_none());

    system.terminate();
}

#[test]
fn test_duplicate_path_is_rejected() {
    let system = ActorSystem::new(SystemConfig::named("dupes"));
    let hits = Arc::new(AtomicUsize::new(0));
    let names = Arc::new(Mutex::new(None));
    system
        .actor_of(prober_props(&hits, &names), "worker")
        .unwrap();
    let second = system.actor_of(prober_props(&hits, &names), "worker");
    assert_eq!(
        second.unwrap_err(),
        Error::Exists(ActorPath::from("/dupes/user/worker"))
    );
    system.terminate();
}

#[test]
fn test_exactly_one_dead_letter_after_stop() {
    let system = ActorSystem::new(SystemConfig::named("letters"));
    let observed = Arc::new(AtomicUsize::new(0));
    let observed_sub = Arc::clone(&observed);
    system.subscribe_dead_letters(move |_| {
        observed_sub.fetch_add(1, Ordering::SeqCst);
    });

    let hits = Arc::new(AtomicUsize::new(0));
    let names = Arc::new(Mutex::new(None));
    let worker = system
        .actor_of(prober_props(&hits, &names), "worker")
        .unwrap();
    assert!(system.stop_actor(&worker));
    assert!(!worker.is_alive());

    worker.tell("anyone there?", None);
    assert!(eventually(Duration::from_secs(1), || {
        observed.load(Ordering::SeqCst) == 1
    }));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(observed.load(Ordering::SeqCst), 1);
    let recent = system.dead_letters();
    assert_eq!(recent.len(), 1);
    assert_eq!(
        recent[0].recipient,
        ActorPath::from("/letters/user/worker")
    );
    system.terminate();
}

#[test]
fn test_watcher_notified_exactly_once() {
    let system = ActorSystem::new(SystemConfig::named("watching"));
    let notices = Arc::new(Mutex::new(Vec::new()));
    let notices_factory = Arc::clone(&notices);
    let probe = system
        .actor_of(
            Props::new(move || WatchProbe {
                notices: Arc::clone(&notices_factory),
            }),
            "probe",
        )
        .unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let names = Arc::new(Mutex::new(None));
    let target = system
        .actor_of(prober_props(&hits, &names), "target")
        .unwrap();

    target.watch(&probe);
    assert!(system.stop_actor(&target));

    assert!(eventually(Duration::from_secs(2), || {
        notices.lock().unwrap().len() == 1
    }));
    std::thread::sleep(Duration::from_millis(100));
    {
        let seen = notices.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].path, ActorPath::from("/watching/user/target"));
        assert!(seen[0].existence_confirmed);
    }

    // Watching a dead ref confirms the death immediately.
    target.watch(&probe);
    assert!(eventually(Duration::from_secs(1), || {
        notices.lock().unwrap().len() == 2
    }));
    assert!(!notices.lock().unwrap()[1].existence_confirmed);
    system.terminate();
}

#[tokio::test]
async fn test_ask_times_out_on_late_reply() {
    let system = ActorSystem::new(SystemConfig::named("deadline"));
    let slow = system
        .actor_of(
            Props::new(|| SlowReplier {
                delay: Duration::from_millis(500),
            }),
            "slow",
        )
        .unwrap();

    let result = slow.ask("now!", Duration::from_millis(50)).await;
    assert_eq!(
        result.unwrap_err(),
        Error::AskTimeout(Duration::from_millis(50))
    );

    // A generous deadline resolves with the actual reply.
    let reply = slow.ask("again", Duration::from_secs(3)).await.unwrap();
    assert_eq!(reply.downcast_ref::<&str>(), Some(&"done"));
    system.terminate();
}

#[test]
fn test_calling_thread_dispatcher_is_synchronous() {
    let system = ActorSystem::new(SystemConfig::named("inline"));
    let hits = Arc::new(AtomicUsize::new(0));
    let names = Arc::new(Mutex::new(None));
    let props = prober_props(&hits, &names).with_dispatcher(
        DispatcherConfig::of(DispatcherKind::CallingThread),
    );
    let prober = system.actor_of(props, "prober").unwrap();

    prober.tell("go", None);
    // The calling-thread dispatcher processed the message before tell
    // returned.
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    system.terminate();
}

#[test]
fn test_pinned_dispatcher_uses_dedicated_thread() {
    let system = ActorSystem::new(SystemConfig::named("pinned"));
    let hits = Arc::new(AtomicUsize::new(0));
    let names = Arc::new(Mutex::new(None));
    let props = prober_props(&hits, &names)
        .with_dispatcher(DispatcherConfig::of(DispatcherKind::Pinned));
    let prober = system.actor_of(props, "prober").unwrap();

    prober.tell("go", None);
    assert!(eventually(Duration::from_secs(1), || {
        hits.load(Ordering::SeqCst) == 1
    }));
    let name = names.lock().unwrap().clone().unwrap_or_default();
    assert!(name.contains("pinned"), "unexpected thread name {}", name);
    assert!(system.stop_actor(&prober));
    system.terminate();
}

#[test]
fn test_terminate_stops_everything() {
    let system = ActorSystem::new(SystemConfig::named("drain"));
    let hits = Arc::new(AtomicUsize::new(0));
    let names = Arc::new(Mutex::new(None));
    let worker = system
        .actor_of(prober_props(&hits, &names), "worker")
        .unwrap();
    system.terminate();
    assert!(system.is_terminated());
    assert!(!worker.is_alive());
    assert!(system.actor_selection("/drain/user/worker").is_none());
    // Terminate twice is a no-op.
    system.terminate();
}
