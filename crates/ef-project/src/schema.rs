//! Scenario schema definitions.

use ef_core::Tolerance;
use serde::{Deserialize, Serialize};

/// One runnable problem: a payload system, its initial value problem and
/// the way it is integrated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scenario {
    pub version: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub system: SystemDef,
    pub initial_state: Vec<f64>,
    #[serde(default)]
    pub t_start: f64,
    pub t_end: f64,
    pub run: RunDef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SystemDef {
    /// Time-scaled Van der Pol oscillator with a sum of cosine forcings.
    VanDerPol {
        epsilon: f64,
        #[serde(default)]
        amplitudes: Vec<f64>,
        #[serde(default)]
        periods: Vec<f64>,
        #[serde(default = "default_natural_period")]
        natural_period: f64,
    },
    LinearDecay {
        rates: Vec<f64>,
    },
    HarmonicOscillator {
        omega: f64,
    },
}

fn default_natural_period() -> f64 {
    std::f64::consts::TAU
}

impl SystemDef {
    /// State dimension of the payload.
    pub fn dimension(&self) -> usize {
        match self {
            SystemDef::VanDerPol { .. } | SystemDef::HarmonicOscillator { .. } => 2,
            SystemDef::LinearDecay { rates } => rates.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunDef {
    /// Plain integration of the fast system.
    Direct {
        integrator: IntegratorDef,
        #[serde(default = "default_record_every")]
        record_every: usize,
    },
    /// Envelope following.
    Envelope {
        period: PeriodDef,
        macro_stepping: MacroSteppingDef,
        #[serde(default = "default_inner")]
        inner: IntegratorDef,
        /// Fine windows of this many periods after every macro sample
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reconstruct_periods: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_fallbacks: Option<usize>,
    },
}

fn default_record_every() -> usize {
    1
}

fn default_inner() -> IntegratorDef {
    IntegratorDef::BdfVariable {
        rtol: Tolerance::Scalar(1e-10),
        atol: Tolerance::Scalar(1e-12),
        max_order: None,
        period: None,
        max_step: None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum IntegratorDef {
    ExplicitEuler {
        step: f64,
    },
    BdfFixed {
        step: f64,
        order: usize,
        #[serde(default)]
        nonlinear: NonlinearDef,
    },
    /// Tolerances are a single value or one value per state component.
    BdfVariable {
        rtol: Tolerance,
        atol: Tolerance,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_order: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        period: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_step: Option<f64>,
    },
}

fn default_max_step_periods() -> usize {
    1000
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NonlinearDef {
    #[default]
    Auto,
    Newton,
    FixedPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeriodDef {
    Known { value: f64 },
    /// Measured from the fast dynamics along the solve
    Estimate {
        guess: f64,
        /// Largest change of the period over one macro step
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tolerance: Option<f64>,
    },
    /// Shortest forcing period of the system
    ShortestForcing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum MacroSteppingDef {
    Fixed {
        step: f64,
        order: usize,
    },
    Variable {
        rtol: f64,
        atol: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_order: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        first_step: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_step: Option<f64>,
    },
    /// Trapezoidal rule; steps are the most whole periods the error
    /// estimate admits, up to `max_step_periods`.
    Trapezoidal {
        rtol: f64,
        atol: f64,
        #[serde(default = "default_max_step_periods")]
        max_step_periods: usize,
    },
}
