use anyhow::Result;
use colored::Colorize;
use std::fs;

use crate::Context;
use crate::paths;
use crate::state::RunSnapshot;
use crate::ui;

/// Digest of the system file as it is now, if it can still be read
fn current_digest(snapshot: &RunSnapshot) -> Option<String> {
    let content = fs::read(&snapshot.system).ok()?;
    Some(blake3::hash(&content).to_hex().to_string())
}

pub fn run(ctx: &Context) -> Result<()> {
    let dir = paths::state_dir()?;
    let Some(snapshot) = RunSnapshot::load_from(&dir)? else {
        ui::info("No run recorded yet");
        ui::dim("Run `flownet run` to reconcile a system");
        return Ok(());
    };

    ui::header("Last run");
    ui::kv("System", &snapshot.system.display().to_string());
    ui::kv(
        "Saved",
        &snapshot
            .saved_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
    );
    ui::kv("Ticks", &snapshot.ticks.to_string());
    let converged = if snapshot.converged {
        "yes".green()
    } else {
        "no".yellow()
    };
    ui::kv("Converged", &converged.to_string());

    match current_digest(&snapshot) {
        Some(digest) if snapshot.is_stale(&digest) => {
            ui::warn("System file changed since this run");
        }
        Some(_) => {}
        None => ui::warn("System file is gone"),
    }

    if ctx.quiet {
        return Ok(());
    }

    ui::section(&format!(
        "Components ({}/{} running)",
        snapshot.running_count(),
        snapshot.components.len()
    ));
    for component in &snapshot.components {
        let mut line = format!("{:>4}  {:<16} {}", format!("#{}", component.id), component.model, ui::state(component.state));
        if let Some(task) = &component.task {
            line.push_str(&format!(" {}", task.cyan()));
        }
        if !component.executable {
            line.push_str(&format!(" {}", "(held)".dimmed()));
        }
        println!("  {line}");
    }

    ui::section("Connections");
    if snapshot.connections.is_empty() {
        ui::dim("none");
    }
    for c in &snapshot.connections {
        let marker = if c.static_port { " static" } else { "" };
        println!(
            "  {}.{} -> {}.{} {}",
            c.source,
            c.source_port,
            c.sink,
            c.sink_port,
            format!("({}{marker})", c.policy).dimmed()
        );
    }

    let pending = &snapshot.pending;
    if pending.additions + pending.removals > 0 {
        println!();
        ui::warn(&format!(
            "{} additions and {} removals pending on {} components",
            pending.additions, pending.removals, pending.components
        ));
    }
    Ok(())
}
