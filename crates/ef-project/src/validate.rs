//! Scenario validation logic.

use crate::schema::{IntegratorDef, MacroSteppingDef, PeriodDef, RunDef, Scenario, SystemDef};
use ef_core::Tolerance;
use ef_sim::{MAX_FIXED_ORDER, MAX_VARIABLE_ORDER};

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("Invalid value: {field} = {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Dimension mismatch: {field} has {found} entries, expected {expected}")]
    DimensionMismatch {
        field: String,
        expected: usize,
        found: usize,
    },

    #[error("Unsupported feature: {feature} - {reason}")]
    Unsupported { feature: String, reason: String },

    #[error("Unsupported version: {version}")]
    UnsupportedVersion { version: u32 },
}

pub fn validate_scenario(scenario: &Scenario) -> Result<(), ValidationError> {
    if scenario.version > crate::migrate::LATEST_VERSION {
        return Err(ValidationError::UnsupportedVersion {
            version: scenario.version,
        });
    }

    validate_system(&scenario.system)?;

    let dim = scenario.system.dimension();
    if scenario.initial_state.len() != dim {
        return Err(ValidationError::DimensionMismatch {
            field: "initial_state".to_string(),
            expected: dim,
            found: scenario.initial_state.len(),
        });
    }
    for (i, value) in scenario.initial_state.iter().enumerate() {
        finite(&format!("initial_state[{i}]"), *value)?;
    }

    finite("t_start", scenario.t_start)?;
    finite("t_end", scenario.t_end)?;
    if scenario.t_end <= scenario.t_start {
        return Err(invalid(
            "t_end",
            scenario.t_end,
            "must be greater than t_start",
        ));
    }

    match &scenario.run {
        RunDef::Direct {
            integrator,
            record_every,
        } => {
            validate_integrator("run.integrator", integrator, dim)?;
            if *record_every == 0 {
                return Err(invalid("run.record_every", 0, "must be at least 1"));
            }
        }
        RunDef::Envelope {
            period,
            macro_stepping,
            inner,
            reconstruct_periods,
            max_fallbacks: _,
        } => {
            validate_period(period, &scenario.system)?;
            validate_macro_stepping(macro_stepping)?;
            validate_integrator("run.inner", inner, dim)?;
            if *reconstruct_periods == Some(0) {
                return Err(invalid(
                    "run.reconstruct_periods",
                    0,
                    "must span at least one period",
                ));
            }
        }
    }
    Ok(())
}

fn validate_system(system: &SystemDef) -> Result<(), ValidationError> {
    match system {
        SystemDef::VanDerPol {
            epsilon,
            amplitudes,
            periods,
            natural_period,
        } => {
            finite("system.epsilon", *epsilon)?;
            positive("system.natural_period", *natural_period)?;
            if amplitudes.len() != periods.len() {
                return Err(ValidationError::DimensionMismatch {
                    field: "system.amplitudes".to_string(),
                    expected: periods.len(),
                    found: amplitudes.len(),
                });
            }
            for (i, a) in amplitudes.iter().enumerate() {
                finite(&format!("system.amplitudes[{i}]"), *a)?;
            }
            for (i, p) in periods.iter().enumerate() {
                positive(&format!("system.periods[{i}]"), *p)?;
            }
        }
        SystemDef::LinearDecay { rates } => {
            if rates.is_empty() {
                return Err(invalid("system.rates", "[]", "must not be empty"));
            }
            for (i, k) in rates.iter().enumerate() {
                finite(&format!("system.rates[{i}]"), *k)?;
            }
        }
        SystemDef::HarmonicOscillator { omega } => positive("system.omega", *omega)?,
    }
    Ok(())
}

fn validate_integrator(
    field: &str,
    integrator: &IntegratorDef,
    dim: usize,
) -> Result<(), ValidationError> {
    match integrator {
        IntegratorDef::ExplicitEuler { step } => positive(&format!("{field}.step"), *step),
        IntegratorDef::BdfFixed { step, order, .. } => {
            positive(&format!("{field}.step"), *step)?;
            order_in_range(&format!("{field}.order"), *order, MAX_FIXED_ORDER)
        }
        IntegratorDef::BdfVariable {
            rtol,
            atol,
            max_order,
            period,
            max_step,
        } => {
            tolerance(&format!("{field}.rtol"), rtol, dim)?;
            tolerance(&format!("{field}.atol"), atol, dim)?;
            if let Some(order) = max_order {
                order_in_range(&format!("{field}.max_order"), *order, MAX_VARIABLE_ORDER)?;
            }
            if let Some(p) = period {
                positive(&format!("{field}.period"), *p)?;
            }
            if let Some(h) = max_step {
                positive(&format!("{field}.max_step"), *h)?;
            }
            Ok(())
        }
    }
}

fn validate_period(period: &PeriodDef, system: &SystemDef) -> Result<(), ValidationError> {
    match period {
        PeriodDef::Known { value } => positive("run.period.value", *value),
        PeriodDef::Estimate {
            guess,
            tolerance: period_tol,
        } => {
            positive("run.period.guess", *guess)?;
            if let Some(tol) = period_tol {
                positive("run.period.tolerance", *tol)?;
            }
            Ok(())
        }
        PeriodDef::ShortestForcing => match system {
            SystemDef::VanDerPol { periods, .. } if !periods.is_empty() => Ok(()),
            _ => Err(ValidationError::Unsupported {
                feature: "shortest_forcing period".to_string(),
                reason: "the system has no forcing periods".to_string(),
            }),
        },
    }
}

fn validate_macro_stepping(stepping: &MacroSteppingDef) -> Result<(), ValidationError> {
    match stepping {
        MacroSteppingDef::Fixed { step, order } => {
            positive("run.macro_stepping.step", *step)?;
            order_in_range("run.macro_stepping.order", *order, MAX_FIXED_ORDER)
        }
        MacroSteppingDef::Variable {
            rtol,
            atol,
            max_order,
            first_step,
            max_step,
        } => {
            positive("run.macro_stepping.rtol", *rtol)?;
            non_negative("run.macro_stepping.atol", *atol)?;
            if let Some(order) = max_order {
                order_in_range("run.macro_stepping.max_order", *order, MAX_VARIABLE_ORDER)?;
            }
            if let Some(h) = first_step {
                positive("run.macro_stepping.first_step", *h)?;
            }
            if let Some(h) = max_step {
                positive("run.macro_stepping.max_step", *h)?;
            }
            Ok(())
        }
        MacroSteppingDef::Trapezoidal {
            rtol,
            atol,
            max_step_periods,
        } => {
            positive("run.macro_stepping.rtol", *rtol)?;
            non_negative("run.macro_stepping.atol", *atol)?;
            if *max_step_periods == 0 {
                return Err(invalid(
                    "run.macro_stepping.max_step_periods",
                    max_step_periods,
                    "must be at least 1",
                ));
            }
            Ok(())
        }
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn finite(field: &str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(invalid(field, value, "must be finite"))
    }
}

fn positive(field: &str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, value, "must be positive"))
    }
}

fn tolerance(field: &str, tol: &Tolerance, dim: usize) -> Result<(), ValidationError> {
    if let Tolerance::PerComponent(values) = tol {
        if values.len() != dim {
            return Err(ValidationError::DimensionMismatch {
                field: field.to_string(),
                expected: dim,
                found: values.len(),
            });
        }
    }
    tol.validate(dim, "tolerance")
        .map_err(|e| invalid(field, format!("{tol:?}"), &e.to_string()))
}

fn non_negative(field: &str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(field, value, "must be non-negative"))
    }
}

fn order_in_range(field: &str, order: usize, max: usize) -> Result<(), ValidationError> {
    if (1..=max).contains(&order) {
        Ok(())
    } else {
        Err(invalid(field, order, &format!("must be in 1..={max}")))
    }
}
