use chrono::{DateTime, Datelike, Utc};
use signalclock::error::{ConnectivityError, FetchError, MalformedConfigError, StartupError};
use signalclock::pins::OutputPins;
use signalclock::prelude::*;
use signalclock::remote::link::LinkKind;
use signalclock::remote::sim::{FixedClock, SimulatedLink, SimulatedTimings};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

const SELECTOR: PinId = PinId(4);

fn bench_config() -> ControllerConfig {
    ControllerConfig::from_toml_str(
        r#"
        [refresh]
        interval_secs = 20

        [timing_service]
        url = "sim://timing"

        [pins]
        backend = { kind = "simulated" }

        [gate]
        debounce_samples = 1
        "#,
    )
    .unwrap()
}

fn records(green: f64) -> Vec<RawApproachTiming> {
    vec![
        RawApproachTiming::new(1, green, 2.0, 3.0),
        RawApproachTiming::new(2, 4.0, 1.0, 2.0),
    ]
}

struct Bench {
    controller: SignalController,
    pins: SimulatedPins,
    timings: SimulatedTimings,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

async fn start(selector_on: bool) -> Bench {
    let controller = SignalController::new(bench_config());
    let timings = SimulatedTimings::new(records(5.0));
    let initial = controller.initial_configuration(&timings).await.unwrap();

    let pins = SimulatedPins::new();
    pins.drive_input(SELECTOR, selector_on);

    let (shutdown, shutdown_rx) = oneshot::channel::<()>();
    let runner = controller.clone();
    let (outputs, input, fetcher) = (pins.clone(), pins.clone(), timings.clone());
    let task = tokio::spawn(async move {
        let stop = async {
            let _ = shutdown_rx.await;
        };
        runner.run(initial, outputs, input, fetcher, stop).await
    });

    Bench {
        controller,
        pins,
        timings,
        shutdown,
        task,
    }
}

async fn next_phase_event(rx: &mut broadcast::Receiver<PhaseEvent>) -> PhaseEvent {
    rx.recv().await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn refreshed_table_takes_effect_only_at_the_next_cycle_boundary() {
    let bench = start(true).await;
    let mut phases = bench.controller.subscribe_phase_events();
    let mut system = bench.controller.subscribe_system_events();
    bench.timings.set_timings(records(9.0));

    // Cycle 1 (0s..17s) and cycle 2 (17s..34s) run the initial table; the
    // refresh at 20s lands in the middle of cycle 2.
    let mut first_greens = Vec::new();
    loop {
        match next_phase_event(&mut phases).await {
            PhaseEvent::PhaseAsserted {
                cycle,
                approach: ApproachId(1),
                phase: PhaseKind::GreenEffective,
                hold,
                ..
            } => first_greens.push((cycle, hold)),
            PhaseEvent::ConfigAdopted { cycle, approaches } => {
                assert_eq!((cycle, approaches), (2, 2));
                break;
            }
            _ => {}
        }
    }
    assert_eq!(
        first_greens,
        vec![(1, Duration::from_secs(5)), (2, Duration::from_secs(5))]
    );
    assert_eq!(bench.timings.calls(), 2);

    // The very next phase is driven from the new table.
    loop {
        if let PhaseEvent::PhaseAsserted { cycle, hold, vector, .. } =
            next_phase_event(&mut phases).await
        {
            assert_eq!(cycle, 3);
            assert_eq!(hold, Duration::from_secs(9));
            assert_eq!(vector.to_string(), "00010");
            break;
        }
    }

    bench.shutdown.send(()).unwrap();
    bench.task.await.unwrap().unwrap();

    assert_eq!(bench.pins.vector(&OutputPins::default()), OutputVector::ALL_OFF);
    let mut saw_shutdown = false;
    while let Ok(event) = system.try_recv() {
        saw_shutdown |= matches!(event, SystemEvent::ControllerShutdown);
    }
    assert!(saw_shutdown);
}

#[tokio::test(start_paused = true)]
async fn manual_mode_holds_everything_until_the_selector_switches() {
    let bench = start(false).await;
    let mut phases = bench.controller.subscribe_phase_events();

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(phases.try_recv().is_err());
    assert_eq!(bench.timings.calls(), 1);
    assert_eq!(bench.pins.vector(&OutputPins::default()), OutputVector::ALL_OFF);

    bench.pins.drive_input(SELECTOR, true);
    assert!(matches!(
        next_phase_event(&mut phases).await,
        PhaseEvent::CycleStarted { cycle: 1 }
    ));
    match next_phase_event(&mut phases).await {
        PhaseEvent::PhaseAsserted { vector, .. } => {
            assert_eq!(bench.pins.vector(&OutputPins::default()), vector)
        }
        other => panic!("unexpected {other:?}"),
    }

    bench.shutdown.send(()).unwrap();
    bench.task.await.unwrap().unwrap();
    assert_eq!(bench.pins.vector(&OutputPins::default()), OutputVector::ALL_OFF);
}

#[tokio::test]
async fn link_selection_prefers_the_modem_and_falls_back_to_wifi() {
    let controller = SignalController::new(bench_config());
    let modem = SimulatedLink::new("cellular", true);
    let wifi = SimulatedLink::new("wifi", true);

    assert_eq!(
        controller.establish_link(Some(&modem), Some(&wifi)).await.unwrap(),
        LinkKind::Cellular
    );
    assert_eq!(wifi.connect_calls(), 0);

    let dead_modem = SimulatedLink::new("cellular", false);
    assert_eq!(
        controller
            .establish_link(Some(&dead_modem), Some(&wifi))
            .await
            .unwrap(),
        LinkKind::Wifi
    );
    assert_eq!(dead_modem.connect_calls(), 0);

    assert!(matches!(
        controller
            .establish_link(Some(&dead_modem), None::<&SimulatedLink>)
            .await,
        Err(StartupError::Connectivity(ConnectivityError::NoLink))
    ));
}

#[tokio::test]
async fn clock_is_set_from_network_time() {
    let controller = SignalController::new(bench_config());
    let network_now = DateTime::parse_from_rfc3339("2024-03-01T08:30:00-06:00").unwrap();
    let rtc = controller
        .sync_clock(&FixedClock::at(network_now))
        .await
        .unwrap();
    assert_eq!(rtc.now().year(), 2024);
    assert!((rtc.now() - network_now.with_timezone(&Utc)).num_seconds().abs() < 5);
}

#[tokio::test]
async fn startup_fails_without_a_usable_first_table() {
    let controller = SignalController::new(bench_config());

    let timings = SimulatedTimings::new(records(5.0));
    timings.fail("502 from upstream");
    assert!(matches!(
        controller.initial_configuration(&timings).await,
        Err(StartupError::InitialFetch(FetchError::Unavailable(_)))
    ));

    timings.set_timings(vec![RawApproachTiming::new(1, 0.0, 2.0, 3.0)]);
    assert!(matches!(
        controller.initial_configuration(&timings).await,
        Err(StartupError::InitialConfig(
            MalformedConfigError::InvalidDuration { .. }
        ))
    ));
}
