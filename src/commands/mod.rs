pub mod diff;
pub mod resolve;
pub mod run;
pub mod status;
pub mod validate;

use crate::cli::SystemArgs;
use crate::paths;
use crate::schema::LoadedSystem;
use anyhow::Result;
use netgen::ResolutionReport;

use crate::ui;

/// Load the system named on the command line, or the default one
fn load(args: &SystemArgs) -> Result<LoadedSystem> {
    let path = paths::system_file(args.system.as_deref())?;
    LoadedSystem::load(&path)
}

/// Load and resolve the system's requirements
fn resolve(args: &SystemArgs) -> Result<(LoadedSystem, ResolutionReport)> {
    let mut system = load(args)?;
    let requirements = system.config.requirements.clone();
    let report = system
        .engine
        .compute_system_network(&requirements)
        .map_err(explain)?;
    Ok((system, report))
}

/// Put the category of a resolution error, and what to do about it, in
/// front of the error itself
fn explain(err: netgen::Error) -> anyhow::Error {
    let category = err.category();
    anyhow::Error::new(err).context(format!("{}: {}", category.description(), category.advice()))
}

/// Warn about requirements and components the resolution left behind
fn report_problems(report: &ResolutionReport) {
    for (requirement, err) in &report.failed {
        let category = err.category();
        ui::error(&format!("{requirement}: {err}"));
        ui::dim(&format!("{}: {}", category.description(), category.advice()));
    }
    for missing in &report.missing {
        ui::warn(&format!("not deployed: {missing}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explain_leads_with_category() {
        let err = explain(netgen::Error::AmbiguousSelection {
            required: "ImageSource".into(),
            candidates: vec!["Camera".into(), "Stereo".into()],
        });
        assert_eq!(
            err.to_string(),
            "Ambiguous selection: Add an explicit selection for the ambiguous model"
        );
        assert_eq!(
            format!("{err:#}"),
            "Ambiguous selection: Add an explicit selection for the ambiguous model: \
             ambiguous selection for ImageSource: Camera, Stereo"
        );
    }
}
