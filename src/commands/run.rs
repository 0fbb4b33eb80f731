use anyhow::Result;
use colored::Colorize;
use netgen::{ComponentId, DeploymentState, Engine};
use reconcile::{ApplyOutcome, ComponentEvent, ConnectionChange, ConnectionManager, CycleObserver, CycleReport, TickReport};
use std::collections::BTreeSet;

use crate::Context;
use crate::cli::RunArgs;
use crate::paths;
use crate::simulation;
use crate::state::RunSnapshot;
use crate::ui;

/// Prints what each cycle does to the live connections
struct ConsoleObserver {
    verbose: bool,
}

impl CycleObserver for ConsoleObserver {
    fn on_cycle_start(&mut self, _dirty: &BTreeSet<ComponentId>) {}

    fn on_change(&mut self, change: &ConnectionChange, outcome: &ApplyOutcome) {
        if !self.verbose && !matches!(outcome, ApplyOutcome::Failed { .. }) {
            return;
        }
        ui::change(change);
        match outcome {
            ApplyOutcome::Connected | ApplyOutcome::Disconnected => {}
            ApplyOutcome::NoChange => ui::dim("already in place"),
            ApplyOutcome::AssumedEffective { reason } => ui::dim(&format!("assumed effective: {reason}")),
            ApplyOutcome::Swallowed { reason } => ui::dim(&format!("ignored: {reason}")),
            ApplyOutcome::Failed { error } => ui::dim(&format!("failed: {error}")),
        }
    }

    fn on_event(&mut self, event: &ComponentEvent) {
        match event {
            ComponentEvent::PortNotFound { .. } | ComponentEvent::NeedsReconfiguration { .. } => {
                ui::warn(&event.to_string());
            }
            ComponentEvent::HeldOff { .. } | ComponentEvent::Executable { .. } if self.verbose => {
                ui::dim(&event.to_string());
            }
            _ => {}
        }
    }

    fn on_cycle_complete(&mut self, _report: &CycleReport) {}
}

/// Nothing left to do: processes are up and the connections converged
fn settled(engine: &Engine, report: &TickReport) -> bool {
    report.is_idle()
        && report.cycle.is_converged()
        && engine
            .plan()
            .deployments()
            .all(|d| !matches!(d.state, DeploymentState::Pending | DeploymentState::Starting))
}

fn print_tick(tick: u32, report: &TickReport) {
    let cycle = &report.cycle;
    let mut parts = Vec::new();
    for (count, what) in [
        (report.started_deployments.len(), "processes started"),
        (report.ready_deployments.len(), "processes ready"),
        (report.configured.len(), "configured"),
        (report.started.len(), "started"),
        (report.stopped.len(), "stopped"),
        (report.removed.len(), "removed"),
        (cycle.added, "connected"),
        (cycle.removed + cycle.assumed, "disconnected"),
        (cycle.held, "held"),
        (cycle.failed, "failed"),
    ] {
        if count > 0 {
            parts.push(format!("{count} {what}"));
        }
    }
    let summary = if parts.is_empty() {
        "idle".dimmed().to_string()
    } else {
        parts.join(", ")
    };
    println!("{} {summary}", format!("[tick {tick}]").blue().bold());
    for error in &report.errors {
        ui::warn(error);
    }
}

pub fn run(ctx: &Context, args: &RunArgs) -> Result<()> {
    let (mut system, report) = super::resolve(&args.system)?;
    super::report_problems(&report);

    let faults = simulation::collect_faults(&system.config, &args.fail_ports)?;
    let mut runtime = simulation::runtime(&system.config, &faults);
    let mut manager = ConnectionManager::new();
    let mut observer = ConsoleObserver {
        verbose: ctx.verbose > 0 && !ctx.quiet,
    };

    let ticks = args.ticks.unwrap_or(system.config.simulation.ticks);
    if !ctx.quiet {
        ui::header(&format!("Running {} for up to {ticks} ticks", system.path.display()));
    }

    let mut ran = 0;
    let mut converged = false;
    for tick in 1..=ticks {
        let report = runtime.tick_with(&mut system.engine, &mut manager, &mut observer);
        ran = tick;
        if !ctx.quiet {
            print_tick(tick, &report);
        }
        if settled(&system.engine, &report) {
            converged = true;
            break;
        }
    }

    println!();
    if converged {
        ui::success(&format!(
            "Converged after {ran} ticks with {} connections",
            manager.actual().connection_count()
        ));
    } else {
        ui::warn(&format!("Not converged after {ran} ticks"));
        if let Some(pending) = manager.pending_changes() {
            ui::kv(
                "Pending",
                &format!("{} additions, {} removals", pending.addition_count(), pending.removal_count()),
            );
        }
    }

    if !args.no_save {
        let snapshot = RunSnapshot::capture(&system.path, &system.digest, ran, converged, &system.engine, &manager);
        let path = snapshot.save_to(&paths::state_dir()?)?;
        ui::dim(&format!("Snapshot saved to {}", path.display()));
    }
    Ok(())
}
