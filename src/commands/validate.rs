use anyhow::Result;

use crate::Context;
use crate::cli::SystemArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &SystemArgs) -> Result<()> {
    let system = super::load(args)?;
    let config = &system.config;

    if !ctx.quiet {
        ui::header("System");
        ui::kv("File", &system.path.display().to_string());
        ui::kv("Models", &config.models.len().to_string());
        ui::kv(
            "Robot",
            &format!(
                "{} devices, {} com busses",
                config.robot.devices.len(),
                config.robot.com_busses.len()
            ),
        );
        ui::kv(
            "Deployments",
            &format!(
                "{} processes on {} hosts",
                system.engine.deployments().len(),
                config.deployments.len()
            ),
        );
        ui::kv("Requirements", &config.requirements.len().to_string());
        println!();
    }

    ui::success("System description is valid");
    Ok(())
}
