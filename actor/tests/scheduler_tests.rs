// Scheduler and timer behaviour

use actor::{
    Actor, ActorContext, ActorSystem, DynMessage, Error, Props,
    SystemConfig,
};

use std::sync::{Arc, Mutex};
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

#[derive(Debug, Clone, PartialEq)]
struct Tick(usize);

// Records every tick with the instant it arrived.
struct TickProbe {
    ticks: Arc<Mutex<Vec<(usize, Instant)>>>,
}

impl Actor for TickProbe {
    fn receive(
        &mut self,
        message: DynMessage,
        _ctx: &mut ActorContext<'_>,
    ) -> Result<(), Error> {
        if let Some(tick) = message.downcast_ref::<Tick>() {
            self.ticks
                .lock()
                .unwrap()
                .push((tick.0, Instant::now()));
        }
        Ok(())
    }
}

fn probe_props(ticks: &Arc<Mutex<Vec<(usize, Instant)>>>) -> Props {
    let ticks = Arc::clone(ticks);
    Props::new(move || TickProbe {
        ticks: Arc::clone(&ticks),
    })
}

#[test]
fn test_schedule_once_fires_after_delay() {
    let system = ActorSystem::new(SystemConfig::named("once"));
    let ticks = Arc::new(Mutex::new(Vec::new()));
    let probe = system.actor_of(probe_props(&ticks), "probe").unwrap();

    let sent_at = Instant::now();
    system.scheduler().schedule_once(
        Duration::from_millis(200),
        &probe,
        Tick(1),
        None,
    );

    assert!(eventually(Duration::from_secs(2), || {
        ticks.lock().unwrap().len() == 1
    }));
    let (value, arrived_at) = ticks.lock().unwrap()[0];
    assert_eq!(value, 1);
    let elapsed = arrived_at - sent_at;
    assert!(elapsed >= Duration::from_millis(200), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(500), "{:?}", elapsed);
    system.terminate();
}

#[test]
fn test_cancel_before_fire_means_no_delivery() {
    let system = ActorSystem::new(SystemConfig::named("cancelled"));
    let ticks = Arc::new(Mutex::new(Vec::new()));
    let probe = system.actor_of(probe_props(&ticks), "probe").unwrap();

    let handle = system.scheduler().schedule_once(
        Duration::from_millis(200),
        &probe,
        Tick(1),
        None,
    );
    assert!(handle.cancel());
    assert!(!handle.cancel());

    std::thread::sleep(Duration::from_millis(450));
    assert!(ticks.lock().unwrap().is_empty());
    system.terminate();
}

#[test]
fn test_schedule_repeatedly_until_cancelled() {
    let system = ActorSystem::new(SystemConfig::named("repeat"));
    let ticks = Arc::new(Mutex::new(Vec::new()));
    let probe = system.actor_of(probe_props(&ticks), "probe").unwrap();

    let handle = system.scheduler().schedule_repeatedly(
        Duration::from_millis(50),
        Duration::from_millis(50),
        &probe,
        Tick(7),
        None,
    );

    assert!(eventually(Duration::from_secs(3), || {
        ticks.lock().unwrap().len() >= 4
    }));
    assert!(handle.cancel());

    // Allow an already fired delivery to land, then expect silence.
    std::thread::sleep(Duration::from_millis(120));
    let settled = ticks.lock().unwrap().len();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(ticks.lock().unwrap().len(), settled);
    system.terminate();
}

#[test]
fn test_schedule_at_instant() {
    let system = ActorSystem::new(SystemConfig::named("at"));
    let ticks = Arc::new(Mutex::new(Vec::new()));
    let probe = system.actor_of(probe_props(&ticks), "probe").unwrap();

    system.scheduler().schedule_at(
        Instant::now() + Duration::from_millis(150),
        &probe,
        Tick(3),
        None,
    );
    assert!(eventually(Duration::from_secs(2), || {
        ticks.lock().unwrap().len() == 1
    }));
    assert_eq!(ticks.lock().unwrap()[0].0, 3);
    system.terminate();
}

// Starts timers in pre_start: the second registration under the same key
// replaces the first.
struct TimerUser {
    ticks: Arc<Mutex<Vec<(usize, Instant)>>>,
}

impl Actor for TimerUser {
    fn pre_start(&mut self, ctx: &mut ActorContext<'_>) -> Result<(), Error> {
        let timers = ctx.timers();
        timers.start_single_timer(
            "tick",
            Duration::from_millis(150),
            Tick(1),
        );
        // Same key: the previous timer is cancelled.
        timers.start_single_timer(
            "tick",
            Duration::from_millis(80),
            Tick(2),
        );
        Ok(())
    }

    fn receive(
        &mut self,
        message: DynMessage,
        _ctx: &mut ActorContext<'_>,
    ) -> Result<(), Error> {
        if let Some(tick) = message.downcast_ref::<Tick>() {
            self.ticks
                .lock()
                .unwrap()
                .push((tick.0, Instant::now()));
        }
        Ok(())
    }
}

#[test]
fn test_single_timer_key_replacement() {
    let system = ActorSystem::new(SystemConfig::named("timers"));
    let ticks = Arc::new(Mutex::new(Vec::new()));
    let ticks_factory = Arc::clone(&ticks);
    system
        .actor_of(
            Props::new(move || TimerUser {
                ticks: Arc::clone(&ticks_factory),
            }),
            "user",
        )
        .unwrap();

    std::thread::sleep(Duration::from_millis(400));
    let observed = ticks.lock().unwrap().clone();
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].0, 2);
    system.terminate();
}

// Ticks itself periodically from pre_start.
struct SelfTicker {
    ticks: Arc<Mutex<Vec<(usize, Instant)>>>,
}

impl Actor for SelfTicker {
    fn pre_start(&mut self, ctx: &mut ActorContext<'_>) -> Result<(), Error> {
        ctx.timers().start_periodic_timer(
            "heartbeat",
            Duration::from_millis(40),
            Duration::from_millis(40),
            Tick(0),
        );
        Ok(())
    }

    fn receive(
        &mut self,
        message: DynMessage,
        _ctx: &mut ActorContext<'_>,
    ) -> Result<(), Error> {
        if let Some(tick) = message.downcast_ref::<Tick>() {
            self.ticks
                .lock()
                .unwrap()
                .push((tick.0, Instant::now()));
        }
        Ok(())
    }
}

#[test]
fn test_timers_are_cancelled_when_the_actor_stops() {
    let system = ActorSystem::new(SystemConfig::named("autocancel"));
    let ticks = Arc::new(Mutex::new(Vec::new()));
    let ticks_factory = Arc::clone(&ticks);
    let ticker = system
        .actor_of(
            Props::new(move || SelfTicker {
                ticks: Arc::clone(&ticks_factory),
            }),
            "ticker",
        )
        .unwrap();

    assert!(eventually(Duration::from_secs(2), || {
        ticks.lock().unwrap().len() >= 3
    }));
    assert!(system.stop_actor(&ticker));
    std::thread::sleep(Duration::from_millis(80));
    let settled = ticks.lock().unwrap().len();
    std::thread::sleep(Duration::from_millis(250));
    // The periodic timer died with its actor.
    assert_eq!(ticks.lock().unwrap().len(), settled);
    system.terminate();
}
