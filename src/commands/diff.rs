use anyhow::Result;
use colored::Colorize;
use netgen::{ComponentId, Plan};
use reconcile::{ConnectionManager, PendingChangeSet};

use crate::Context;
use crate::cli::SystemArgs;
use crate::ui;

fn label(plan: &Plan, id: ComponentId) -> String {
    match plan.component(id) {
        Some(component) => match component.remote_key() {
            Some(key) => key.to_string(),
            None => component.to_string(),
        },
        None => id.to_string(),
    }
}

/// Lines describing the changes, additions first
pub fn describe(plan: &Plan, changes: &PendingChangeSet) -> Vec<String> {
    let mut lines = Vec::new();
    for ((source, sink), info) in &changes.additions {
        let waiting = plan.remote(*source).is_none() || plan.remote(*sink).is_none();
        for ((source_port, sink_port), policy) in info {
            let mut line = format!(
                "+ {}.{source_port} -> {}.{sink_port} ({policy})",
                label(plan, *source),
                label(plan, *sink)
            );
            if waiting {
                line.push_str(", held until deployed");
            }
            lines.push(line);
        }
    }
    for ((source, sink), pairs) in &changes.removals {
        for (source_port, sink_port) in pairs {
            lines.push(format!("- {source}.{source_port} -> {sink}.{sink_port}"));
        }
    }
    lines
}

pub fn run(ctx: &Context, args: &SystemArgs) -> Result<()> {
    let (system, report) = super::resolve(args)?;
    let changes = ConnectionManager::new().preview(&system.engine);

    if !ctx.quiet {
        ui::header("Connection changes");
    }
    super::report_problems(&report);

    let lines = describe(system.engine.plan(), &changes);
    if lines.is_empty() {
        ui::success("Nothing to change");
        return Ok(());
    }
    for line in &lines {
        if line.starts_with('+') {
            println!("  {}", line.green());
        } else {
            println!("  {}", line.red());
        }
    }
    println!();
    ui::info(&format!(
        "{} to add, {} to remove across {} components",
        changes.addition_count(),
        changes.removal_count(),
        changes.tasks.len()
    ));
    Ok(())
}
