use anyhow::{Context, Result};
use signalclock::pins::{Direction, SysfsGpio};
use signalclock::prelude::*;
use signalclock::remote::clock::WorldTimeService;
use signalclock::remote::link::{ModemLink, WifiLink};
use signalclock::remote::timing::HttpTimingService;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    // 2. Load settings.
    let path = env::args()
        .nth(1)
        .or_else(|| env::var("SIGNALCLOCK_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("signalclock.toml"));
    let config = ControllerConfig::load(&path)
        .with_context(|| format!("loading settings from {}", path.display()))?;

    let controller = SignalController::new(config.clone());
    spawn_event_listeners(&controller);

    // 3. Startup sequence; every step is fatal on failure.
    let modem = config
        .link
        .modem_device
        .as_ref()
        .map(|device| {
            ModemLink::new(
                device,
                config.link.baud_rate,
                Duration::from_millis(config.link.response_wait_ms),
            )
        });
    let wifi = config.link.wifi.as_ref().map(|wifi| {
        WifiLink::new(
            &wifi.ssid,
            &wifi.password,
            Duration::from_secs(wifi.connect_timeout_secs),
        )
    });
    controller
        .establish_link(modem.as_ref(), wifi.as_ref())
        .await
        .inspect_err(|e| error!("Startup failed: {}", e))?;

    let time_service = WorldTimeService::new(
        &config.time_service.url,
        config.time_service.timezone,
        Duration::from_secs(config.time_service.timeout_secs),
    )?;
    controller
        .sync_clock(&time_service)
        .await
        .inspect_err(|e| error!("Startup failed: {}", e))?;

    let fetcher = HttpTimingService::new(
        config.timing_service.url.clone(),
        config.timing_credentials(),
        Duration::from_secs(config.timing_service.timeout_secs),
    )?;
    let initial = controller
        .initial_configuration(&fetcher)
        .await
        .inspect_err(|e| error!("Startup failed: {}", e))?;

    // 4. Run until Ctrl+C.
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };
    match &config.pins.backend {
        PinBackend::Sysfs { root } => {
            let gpio = SysfsGpio::new(root);
            for signal in Signal::ALL {
                gpio.export(config.pins.outputs.pin(signal), Direction::Out)?;
            }
            gpio.export(config.pins.selector, Direction::In)?;
            controller.run(initial, gpio.clone(), gpio, fetcher, shutdown).await
        }
        PinBackend::Simulated => {
            warn!("Running against simulated pins; no lamp will light.");
            let pins = SimulatedPins::new();
            pins.drive_input(config.pins.selector, true);
            controller.run(initial, pins.clone(), pins, fetcher, shutdown).await
        }
    }
}

/// Spawns one logging task per event stream.
fn spawn_event_listeners(controller: &SignalController) {
    let mut system_rx = controller.subscribe_system_events();
    tokio::spawn(async move {
        while let Ok(event) = system_rx.recv().await {
            info!("[SYSTEM] => {:?}", event);
        }
    });

    let mut phase_rx = controller.subscribe_phase_events();
    tokio::spawn(async move {
        while let Ok(event) = phase_rx.recv().await {
            match event {
                PhaseEvent::ConfigAdopted { cycle, approaches } => {
                    info!("[PHASE] => Cycle {} ended on a new table ({} approaches).", cycle, approaches)
                }
                PhaseEvent::OutputsForcedSafe => info!("[PHASE] => Outputs forced off."),
                _ => {}
            }
        }
    });

    let mut refresh_rx = controller.subscribe_refresh_events();
    tokio::spawn(async move {
        while let Ok(event) = refresh_rx.recv().await {
            info!("[REFRESH] => {:?}", event);
        }
    });
}
