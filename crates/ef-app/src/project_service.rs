//! Scenario loading, saving and validation.

use std::path::Path;

use ef_project::Scenario;

use crate::error::AppResult;

/// Load a scenario (YAML, or JSON by extension), migrated and validated.
pub fn load_scenario(path: &Path) -> AppResult<Scenario> {
    Ok(ef_project::load(path)?)
}

/// Save a scenario as YAML or JSON depending on the extension.
pub fn save_scenario(path: &Path, scenario: &Scenario) -> AppResult<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => ef_project::save_json(path, scenario)?,
        _ => ef_project::save_yaml(path, scenario)?,
    }
    Ok(())
}

pub fn validate_scenario(scenario: &Scenario) -> AppResult<()> {
    ef_project::validate_scenario(scenario)
        .map_err(|e| crate::AppError::Scenario(format!("Validation failed: {e}")))
}

/// One-line description of a scenario for listings.
#[derive(Debug, Clone)]
pub struct ScenarioSummary {
    pub name: String,
    pub system: &'static str,
    pub dimension: usize,
    pub run: &'static str,
    pub t_start: f64,
    pub t_end: f64,
}

pub fn summarize(scenario: &Scenario) -> ScenarioSummary {
    use ef_project::{RunDef, SystemDef};

    ScenarioSummary {
        name: scenario.name.clone(),
        system: match scenario.system {
            SystemDef::VanDerPol { .. } => "van_der_pol",
            SystemDef::LinearDecay { .. } => "linear_decay",
            SystemDef::HarmonicOscillator { .. } => "harmonic_oscillator",
        },
        dimension: scenario.system.dimension(),
        run: match scenario.run {
            RunDef::Direct { .. } => "direct",
            RunDef::Envelope { .. } => "envelope",
        },
        t_start: scenario.t_start,
        t_end: scenario.t_end,
    }
}
