use anyhow::{Context as _, Result};
use colored::Colorize;
use netgen::{DeploymentState, Engine, ResolutionReport};
use netmodel::ModelKind;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::Context;
use crate::cli::ResolveArgs;
use crate::ui;

/// Printable view of a resolved network
#[derive(Debug, Serialize)]
pub struct NetworkView {
    pub components: Vec<ComponentView>,
    pub connections: Vec<ConnectionView>,
    pub deployments: Vec<DeploymentView>,
    pub missing: Vec<String>,
    pub failed: BTreeMap<String, String>,
    pub merged: usize,
}

#[derive(Debug, Serialize)]
pub struct ComponentView {
    pub id: u64,
    pub model: String,
    pub kind: ModelKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionView {
    pub source: u64,
    pub source_port: String,
    pub sink: u64,
    pub sink_port: String,
    pub policy: String,
}

#[derive(Debug, Serialize)]
pub struct DeploymentView {
    pub id: u64,
    pub host: String,
    pub model: String,
    pub process_name: String,
    pub state: DeploymentState,
}

impl NetworkView {
    pub fn capture(engine: &Engine, report: &ResolutionReport) -> Self {
        let plan = engine.plan();
        let mut requirements: BTreeMap<u64, Vec<String>> = BTreeMap::new();
        for (name, id) in engine.required_instances() {
            requirements.entry(id.0).or_default().push(name.clone());
        }

        let components = plan
            .components()
            .filter(|c| !plan.is_garbage(c.id))
            .map(|c| ComponentView {
                id: c.id.0,
                model: c.model.clone(),
                kind: c.kind,
                requirements: requirements.remove(&c.id.0).unwrap_or_default(),
                children: plan
                    .children_of(c.id)
                    .map(|(role, link)| (role.to_string(), link.child.0))
                    .collect(),
                deployment: c.slot.as_ref().map(|s| s.deployment.0),
                task: c.slot.as_ref().map(|s| s.task.clone()),
                device: c.device.clone(),
            })
            .collect();

        let connections = plan
            .components()
            .filter(|c| c.is_deployable() && !plan.is_garbage(c.id))
            .flat_map(|c| {
                plan.concrete_output_connections(c.id)
                    .into_iter()
                    .map(move |((source_port, sink_port), sink, policy)| ConnectionView {
                        source: c.id.0,
                        source_port,
                        sink: sink.0,
                        sink_port,
                        policy: policy.to_string(),
                    })
            })
            .collect();

        let deployments = plan
            .deployments()
            .map(|d| DeploymentView {
                id: d.id.0,
                host: d.host.clone(),
                model: d.model.clone(),
                process_name: d.process_name.clone(),
                state: d.state,
            })
            .collect();

        Self {
            components,
            connections,
            deployments,
            missing: report.missing.iter().map(ToString::to_string).collect(),
            failed: report
                .failed
                .iter()
                .map(|(name, err)| (name.clone(), err.to_string()))
                .collect(),
            merged: report.merged.len(),
        }
    }

    fn label(&self, id: u64) -> String {
        self.components
            .iter()
            .find(|c| c.id == id)
            .map_or_else(|| format!("#{id}"), |c| format!("{}#{id}", c.model))
    }

    pub fn print(&self) {
        ui::section("Components");
        for component in &self.components {
            let mut line = format!("{:>4}  {} ({})", format!("#{}", component.id), component.model.bold(), component.kind);
            if let Some(task) = &component.task {
                line.push_str(&format!(" on {}", task.cyan()));
            }
            if let Some(device) = &component.device {
                line.push_str(&format!(" driving {device}"));
            }
            if !component.requirements.is_empty() {
                line.push_str(&format!(" [{}]", component.requirements.join(", ")).dimmed().to_string());
            }
            println!("  {line}");
            for (role, child) in &component.children {
                ui::dim(&format!("      {role}: {}", self.label(*child)));
            }
        }

        ui::section("Connections");
        if self.connections.is_empty() {
            ui::dim("none");
        }
        for c in &self.connections {
            println!(
                "  {}.{} -> {}.{} {}",
                self.label(c.source),
                c.source_port,
                self.label(c.sink),
                c.sink_port,
                format!("({})", c.policy).dimmed()
            );
        }

        ui::section("Deployments");
        if self.deployments.is_empty() {
            ui::dim("none");
        }
        for d in &self.deployments {
            ui::kv(&format!("D{}", d.id), &format!("{} on {} as {}", d.model, d.host, d.process_name));
        }

        if self.merged > 0 {
            println!();
            ui::info(&format!("{} duplicate components merged", self.merged));
        }
    }
}

pub fn run(ctx: &Context, args: &ResolveArgs) -> Result<()> {
    let (system, report) = super::resolve(&args.system)?;
    let view = NetworkView::capture(&system.engine, &report);

    if args.json {
        let json = serde_json::to_string_pretty(&view).context("Failed to serialize network")?;
        println!("{json}");
        return Ok(());
    }

    if !ctx.quiet {
        ui::header(&format!("Network of {}", system.path.display()));
        view.print();
        println!();
    }
    super::report_problems(&report);
    if report.is_complete() {
        ui::success(&format!(
            "{} components, {} connections",
            view.components.len(),
            view.connections.len()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SystemConfig;
    use crate::schema::tests::ROVER;

    #[test]
    fn test_capture_rover() {
        let config = SystemConfig::parse(ROVER).unwrap();
        let mut engine = config.build_engine().unwrap();
        let report = engine.compute_system_network(&config.requirements).unwrap();
        let view = NetworkView::capture(&engine, &report);

        assert_eq!(view.components.len(), 3);
        assert_eq!(view.deployments.len(), 1);
        assert!(view.missing.is_empty());

        let vision = view.components.iter().find(|c| c.model == "Vision").unwrap();
        assert_eq!(vision.requirements, vec!["vision"]);
        assert_eq!(vision.children.len(), 2);

        assert_eq!(view.connections.len(), 1);
        let connection = &view.connections[0];
        assert_eq!(connection.source_port, "frame");
        assert_eq!(connection.sink_port, "image");
        assert_eq!(connection.policy, "buffer(4)");
        assert_eq!(view.label(connection.source), format!("Camera#{}", connection.source));
    }

    #[test]
    fn test_json_view() {
        let config = SystemConfig::parse(ROVER).unwrap();
        let mut engine = config.build_engine().unwrap();
        let report = engine.compute_system_network(&config.requirements).unwrap();
        let json = serde_json::to_value(NetworkView::capture(&engine, &report)).unwrap();

        assert_eq!(json["deployments"][0]["host"], "rover");
        assert_eq!(json["deployments"][0]["state"], "pending");
        assert!(json["failed"].as_object().unwrap().is_empty());
    }
}
