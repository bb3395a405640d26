use anyhow::{Context, Result};
use colored::Colorize;
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use signalclock::prelude::*;
use signalclock::remote::sim::{FixedClock, SimulatedLink, SimulatedTimings};
use signalclock::{ENGINE_NAME, VERSION as LIB_VERSION};
use std::borrow::Cow;
use std::env;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_REFRESH_SECS: u64 = 20;

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct CommandHighlighter;

impl Highlighter for CommandHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            Cow::Owned(format!("{} {}", command.yellow().bold(), rest.yellow()))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    println!("{}", format!("  {} bench shell", ENGINE_NAME).cyan().bold());
    println!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    println!("{}", "-".repeat(64).dimmed());
}

/// Counters fed by the event listeners and read by `status`.
#[derive(Default)]
struct ShellState {
    watching: AtomicBool,
    cycles: AtomicU64,
    adoptions: AtomicU64,
}

fn spawn_event_listeners(controller: &SignalController, state: Arc<ShellState>) {
    let mut system_rx = controller.subscribe_system_events();
    tokio::spawn(async move {
        while let Ok(event) = system_rx.recv().await {
            println!("\n<-- [SYSTEM EVENT] {:?}", event);
        }
    });

    let mut refresh_rx = controller.subscribe_refresh_events();
    tokio::spawn(async move {
        while let Ok(event) = refresh_rx.recv().await {
            println!("\n<-- [REFRESH] {:?}", event);
        }
    });

    // Phase events are chatty; they are only printed while watching.
    let mut phase_rx = controller.subscribe_phase_events();
    tokio::spawn(async move {
        while let Ok(event) = phase_rx.recv().await {
            match &event {
                PhaseEvent::CycleCompleted { .. } => {
                    state.cycles.fetch_add(1, Ordering::Relaxed);
                }
                PhaseEvent::ConfigAdopted { .. } => {
                    state.adoptions.fetch_add(1, Ordering::Relaxed);
                    println!("\n<-- [PHASE] {:?}", event);
                    continue;
                }
                _ => {}
            }
            if state.watching.load(Ordering::Relaxed) {
                match event {
                    PhaseEvent::PhaseAsserted {
                        approach,
                        phase,
                        vector,
                        hold,
                        ..
                    } => println!(
                        "<-- [PHASE] {} {:?} {} for {:?}",
                        approach,
                        phase,
                        vector.to_string().green(),
                        hold
                    ),
                    other => println!("<-- [PHASE] {:?}", other),
                }
            }
        }
    });
}

/// Parses `g,f,a` triples into records numbered from 1.
fn parse_timings(args: &[&str]) -> Result<Vec<RawApproachTiming>, String> {
    args.iter()
        .zip(1u32..)
        .map(|(arg, id)| {
            let parts = arg
                .split(',')
                .map(|p| p.trim().parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| format!("'{}': {}", arg, e))?;
            match parts[..] {
                [g, f, a] => Ok(RawApproachTiming::new(id, g, f, a)),
                _ => Err(format!("'{}' must be three numbers: green,flash,amber", arg)),
            }
        })
        .collect()
}

fn shell_config(refresh_secs: u64) -> Result<ControllerConfig> {
    let text = format!(
        r#"
        [refresh]
        interval_secs = {refresh_secs}

        [timing_service]
        url = "sim://timing"

        [pins]
        backend = {{ kind = "simulated" }}
        "#
    );
    Ok(ControllerConfig::from_toml_str(&text)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let refresh_secs = match env::var("SIGNALSHELL_REFRESH_SECS") {
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("SIGNALSHELL_REFRESH_SECS='{}' is not a number", raw))?,
        Err(_) => DEFAULT_REFRESH_SECS,
    };
    let config = shell_config(refresh_secs)?;
    let selector = config.pins.selector;
    let outputs = config.pins.outputs;

    let controller = SignalController::new(config);
    let state = Arc::new(ShellState::default());
    spawn_event_listeners(&controller, state.clone());

    let mut last_good = vec![
        RawApproachTiming::new(1, 5.0, 2.0, 3.0),
        RawApproachTiming::new(2, 4.0, 1.0, 2.0),
    ];
    let timings = SimulatedTimings::new(last_good.clone());
    let pins = SimulatedPins::new();
    pins.drive_input(selector, true);

    let wifi = SimulatedLink::new("wifi", true);
    controller
        .establish_link(None::<&SimulatedLink>, Some(&wifi))
        .await?;
    controller.sync_clock(&FixedClock::default()).await?;
    let initial = controller.initial_configuration(&timings).await?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let runner = controller.clone();
    let (out, input, fetcher) = (pins.clone(), pins.clone(), timings.clone());
    info!("Spawning {} in the background...", ENGINE_NAME.cyan());
    let controller_task = tokio::spawn(async move {
        let shutdown = async {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = runner.run(initial, out, input, fetcher, shutdown).await {
            eprintln!("\nController stopped with an error: {}", e);
        }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut rl = Editor::new()?;
    rl.set_helper(Some(CommandHighlighter));

    println!("{} is running. Type 'help' for commands or 'exit' to quit.", ENGINE_NAME.cyan());

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        match rl.readline(&prompt) {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let args = line.split_whitespace().collect::<Vec<_>>();
                let Some(command) = args.first() else {
                    continue;
                };
                match *command {
                    "gate" => match args.get(1) {
                        Some(&"on") => {
                            pins.drive_input(selector, true);
                            println!("--> Selector switched to automatic.");
                        }
                        Some(&"off") => {
                            pins.drive_input(selector, false);
                            println!("--> Selector switched to manual; execution freezes.");
                        }
                        _ => println!("Usage: gate on|off"),
                    },
                    "timings" => {
                        if args.len() < 2 {
                            println!("Usage: timings <G,F,A> [<G,F,A> ...]");
                            continue;
                        }
                        match parse_timings(&args[1..]) {
                            Ok(records) => {
                                timings.set_timings(records.clone());
                                println!(
                                    "--> Timing service now serves {} approaches; picked up within {}s.",
                                    records.len(),
                                    refresh_secs
                                );
                                last_good = records;
                            }
                            Err(e) => println!("Error: {}", e),
                        }
                    }
                    "fail" => {
                        let reason = if args.len() > 1 {
                            args[1..].join(" ")
                        } else {
                            "service unreachable".to_string()
                        };
                        timings.fail(reason.clone());
                        println!("--> Timing service now fails with '{}'.", reason);
                    }
                    "recover" => {
                        timings.set_timings(last_good.clone());
                        println!("--> Timing service recovered.");
                    }
                    "pins" => {
                        println!(
                            "Outputs: {} (red amber flash green aux)",
                            pins.vector(&outputs).to_string().green()
                        );
                        for (pin, level) in pins.snapshot() {
                            println!("  {:<8} {}", pin.to_string(), if level { "1" } else { "0" });
                        }
                    }
                    "watch" => match args.get(1) {
                        Some(&"on") => {
                            state.watching.store(true, Ordering::Relaxed);
                            println!("--> Started printing phase events.");
                        }
                        Some(&"off") => {
                            state.watching.store(false, Ordering::Relaxed);
                            println!("--> Stopped printing phase events.");
                        }
                        _ => println!("Usage: watch on|off"),
                    },
                    "status" => {
                        println!("Selector:        {}", if pins.level(selector) { "automatic" } else { "manual" });
                        println!("Outputs:         {}", pins.vector(&outputs));
                        println!("Cycles done:     {}", state.cycles.load(Ordering::Relaxed));
                        println!("Tables adopted:  {}", state.adoptions.load(Ordering::Relaxed));
                        println!("Fetches served:  {}", timings.calls());
                        println!("Refresh every:   {}s", refresh_secs);
                    }
                    "help" => {
                        println!("Available commands:");
                        println!("  gate on|off              - Flips the simulated automatic-mode selector.");
                        println!("  timings <G,F,A> ...      - Sets the table the timing service serves.");
                        println!("  fail [REASON]            - Makes every fetch fail.");
                        println!("  recover                  - Serves the last good table again.");
                        println!("  pins                     - Shows the simulated line levels.");
                        println!("  watch on|off             - Prints phase events as they happen.");
                        println!("  status                   - Shows a controller summary.");
                        println!("  exit                     - Stops the controller and quits.");
                    }
                    "exit" => break,
                    _ => println!("Unknown command: '{}'. Type 'help'.", line),
                }
            }
            Err(_) => break,
        }
    }

    println!("Exiting signalshell...");
    let _ = shutdown_tx.send(());
    controller_task.await?;
    println!("Outputs left at {}.", pins.vector(&outputs));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_timing_triples_in_order() {
        let records = parse_timings(&["5,2,3", "4, 1, 2"]).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], RawApproachTiming::new(2, 4.0, 1.0, 2.0));
    }

    #[test]
    fn rejects_incomplete_triples() {
        assert!(parse_timings(&["5,2"]).is_err());
        assert!(parse_timings(&["5,x,2"]).is_err());
    }

    #[test]
    fn shell_config_uses_simulated_pins() {
        let config = shell_config(7).unwrap();
        assert_eq!(config.pins.backend, PinBackend::Simulated);
        assert_eq!(config.refresh_interval(), Duration::from_secs(7));
    }
}
