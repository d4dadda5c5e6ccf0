use std::path::Path;
use std::sync::Arc;

use colored::Colorize;
use robokit_hal::{DeviceHandle, HardwareRegistry};
use robokit_middleware::EventBus;
use robokit_runtime::{Robot, RobotConfig, ScopedTask, Work, WorkOutcome, config, work_fn};
use robokit_types::RobotError;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::Command;

pub async fn execute(command: Command, shutdown: watch::Receiver<bool>) -> Result<(), RobotError> {
    match command {
        Command::Run(path) => run(&path, shutdown).await,
        Command::Snapshot(path) => snapshot(&path).await,
        Command::Check(path) => check(&path),
        Command::Help => Ok(()),
    }
}

fn assemble(cfg: &RobotConfig) -> Result<Robot, RobotError> {
    Robot::new(cfg, &HardwareRegistry::with_builtins(), EventBus::default())
}

// ─────────────────────────────────────────────────────────────────────────────
// run
// ─────────────────────────────────────────────────────────────────────────────

async fn run(path: &Path, mut shutdown: watch::Receiver<bool>) -> Result<(), RobotError> {
    let cfg = config::load_from(path)?;
    let robot = Arc::new(assemble(&cfg)?.with_work(blink_work()));
    println!("  Starting {} …", robot.name().bold());

    let mut work = Arc::clone(&robot).work();
    let outcome = tokio::select! {
        joined = &mut work => Some(joined),
        Ok(_) = shutdown.wait_for(|stop| *stop) => None,
    };
    work.abort();
    robot.disconnect();
    let outcome = outcome
        .transpose()
        .map_err(|e| RobotError::UnitTerminated(e.to_string()))?;

    match outcome {
        Some(WorkOutcome::StartFailed) => {
            println!("  {} robot failed to start, see the log", "✗".red().bold());
        }
        Some(WorkOutcome::WorkFailed) => {
            println!("  {} work failed, see the log", "✗".red().bold());
        }
        Some(WorkOutcome::Completed) | None => {
            println!("  {} {} disconnected", "✓".green().bold(), robot.name());
        }
    }
    Ok(())
}

/// Toggle every led at its own interval and report button presses.  Every
/// task is scoped to the work, so aborting the work stops them all.
fn blink_work() -> Work {
    work_fn(|robot: Arc<Robot>| async move {
        let mut tasks = Vec::new();

        for device in robot.devices().filter(|d| d.driver() == "button") {
            let mut pushes = robot.subscribe(device.name(), "push");
            let name = device.name().to_string();
            tasks.push(ScopedTask::from(tokio::spawn(async move {
                while pushes.recv().await.is_some() {
                    println!("  {} {name} pushed", "●".cyan());
                }
            })));
        }

        let leds: Vec<DeviceHandle> = robot.devices().filter(|d| d.driver() == "led").cloned().collect();
        for led in leds {
            tasks.push(robot.every(led.interval(), move || {
                let led = led.clone();
                async move {
                    if let Ok(state) = led.command("toggle", vec![]).await {
                        debug!(device = %led.name(), on = %state, "toggled");
                    }
                }
            }));
        }

        if tasks.is_empty() {
            info!(robot = %robot.name(), "nothing to drive");
            return Ok(());
        }
        for task in tasks {
            task.await?;
        }
        Ok(())
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// snapshot / check
// ─────────────────────────────────────────────────────────────────────────────

async fn snapshot(path: &Path) -> Result<(), RobotError> {
    let cfg = config::load_from(path)?;
    let robot = assemble(&cfg)?;
    let started = robot.start().await;
    let view = serde_json::to_string_pretty(&robot.to_hash())
        .map_err(|e| RobotError::Serialization(e.to_string()))?;
    robot.disconnect();

    println!("{view}");
    started
}

fn check(path: &Path) -> Result<(), RobotError> {
    let cfg = config::load_from(path)?;
    let robot = assemble(&cfg)?;
    let snapshot = robot.to_hash();

    println!("  {} {}", "✓".green().bold(), snapshot.name.bold());
    for c in &snapshot.connections {
        println!("    connection {:<12} adaptor={}", c.name, c.adaptor);
    }
    for d in &snapshot.devices {
        let pin = d.pin.map_or_else(|| "-".to_string(), |p| p.to_string());
        println!(
            "    device     {:<12} driver={} connection={} pin={}",
            d.name, d.driver, d.connection, pin
        );
    }
    match cfg.start_timeout() {
        Some(t) => println!("    start timeout {} ms", t.as_millis()),
        None => println!("    start timeout disabled"),
    }
    Ok(())
}
