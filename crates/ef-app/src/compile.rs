//! Scenario compilation: payload system and solver options.

use ef_core::{OdeSystem, Real, State};
use ef_envelope::{EnvelopeOptions, MacroStepping, Period, Reconstruction};
use ef_project::{
    IntegratorDef, MacroSteppingDef, NonlinearDef, PeriodDef, RunDef, Scenario, SystemDef,
};
use ef_sim::{IntegrateOptions, MAX_VARIABLE_ORDER, NonlinearMethod};
use ef_systems::{
    HarmonicParams, LinearDecayParams, VanDerPolParams, harmonic_oscillator, linear_decay,
    van_der_pol,
};

use crate::error::{AppError, AppResult};

/// How a compiled scenario is integrated.
#[derive(Debug, Clone)]
pub enum RunPlan {
    Direct(IntegrateOptions),
    Envelope(EnvelopeOptions),
}

/// A scenario ready to run.
pub struct CompiledScenario {
    pub name: String,
    pub system: Box<dyn OdeSystem>,
    pub span: (Real, Real),
    pub y0: State,
    pub plan: RunPlan,
}

impl std::fmt::Debug for CompiledScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScenario")
            .field("name", &self.name)
            .field("dimension", &self.system.dimension())
            .field("span", &self.span)
            .field("plan", &self.plan)
            .finish()
    }
}

pub fn compile_scenario(scenario: &Scenario) -> AppResult<CompiledScenario> {
    let system = compile_system(&scenario.system)?;
    let plan = match &scenario.run {
        RunDef::Direct {
            integrator,
            record_every,
        } => RunPlan::Direct(IntegrateOptions {
            record_every: *record_every,
            ..compile_integrator(integrator)
        }),
        RunDef::Envelope { .. } => RunPlan::Envelope(compile_envelope(scenario)?),
    };
    Ok(CompiledScenario {
        name: scenario.name.clone(),
        system,
        span: (scenario.t_start, scenario.t_end),
        y0: State::from_column_slice(&scenario.initial_state),
        plan,
    })
}

pub fn compile_system(def: &SystemDef) -> AppResult<Box<dyn OdeSystem>> {
    let system: Box<dyn OdeSystem> = match def {
        SystemDef::VanDerPol {
            epsilon,
            amplitudes,
            periods,
            natural_period,
        } => {
            let params = VanDerPolParams::with_natural_period(
                *epsilon,
                amplitudes.clone(),
                periods.clone(),
                *natural_period,
            )?;
            Box::new(van_der_pol(params)?)
        }
        SystemDef::LinearDecay { rates } => {
            Box::new(linear_decay(LinearDecayParams::new(rates.clone())?)?)
        }
        SystemDef::HarmonicOscillator { omega } => {
            Box::new(harmonic_oscillator(HarmonicParams::new(*omega)?)?)
        }
    };
    Ok(system)
}

pub fn compile_integrator(def: &IntegratorDef) -> IntegrateOptions {
    match def {
        IntegratorDef::ExplicitEuler { step } => IntegrateOptions::explicit_euler(*step),
        IntegratorDef::BdfFixed {
            step,
            order,
            nonlinear,
        } => IntegrateOptions::bdf_fixed(*step, *order).with_nonlinear(compile_nonlinear(*nonlinear)),
        IntegratorDef::BdfVariable {
            rtol,
            atol,
            max_order,
            period,
            max_step,
        } => IntegrateOptions {
            order: *max_order,
            period: *period,
            max_step: *max_step,
            ..IntegrateOptions::bdf_variable(rtol.clone(), atol.clone())
        },
    }
}

fn compile_nonlinear(def: NonlinearDef) -> NonlinearMethod {
    match def {
        NonlinearDef::Auto => NonlinearMethod::Auto,
        NonlinearDef::Newton => NonlinearMethod::Newton,
        NonlinearDef::FixedPoint => NonlinearMethod::FixedPoint,
    }
}

pub fn compile_envelope(scenario: &Scenario) -> AppResult<EnvelopeOptions> {
    let RunDef::Envelope {
        period,
        macro_stepping,
        inner,
        reconstruct_periods,
        max_fallbacks,
    } = &scenario.run
    else {
        return Err(AppError::InvalidInput(format!(
            "scenario '{}' is not an envelope run",
            scenario.name
        )));
    };

    let mut period_tol = None;
    let period = match period {
        PeriodDef::Known { value } => Period::Known(*value),
        PeriodDef::Estimate { guess, tolerance } => {
            period_tol = *tolerance;
            Period::Estimate { guess: *guess }
        }
        PeriodDef::ShortestForcing => match &scenario.system {
            SystemDef::VanDerPol { periods, .. } => Period::from_candidates(periods)?,
            _ => {
                return Err(AppError::Compile(
                    "shortest_forcing period needs a forced system".to_string(),
                ));
            }
        },
    };

    let mut opts = match macro_stepping {
        MacroSteppingDef::Fixed { step, order } => EnvelopeOptions::fixed(period, *step, *order),
        MacroSteppingDef::Variable {
            rtol,
            atol,
            max_order,
            first_step,
            max_step,
        } => EnvelopeOptions {
            macro_stepping: MacroStepping::Variable {
                rtol: *rtol,
                atol: *atol,
                max_order: max_order.unwrap_or(MAX_VARIABLE_ORDER),
                first_step: *first_step,
                max_step: *max_step,
            },
            ..EnvelopeOptions::variable(period, *rtol, *atol)
        },
        MacroSteppingDef::Trapezoidal {
            rtol,
            atol,
            max_step_periods,
        } => EnvelopeOptions {
            macro_stepping: MacroStepping::Trapezoidal {
                rtol: *rtol,
                atol: *atol,
                max_step_periods: *max_step_periods,
            },
            ..EnvelopeOptions::trapezoidal(period, *rtol, *atol)
        },
    }
    .with_inner(compile_integrator(inner));

    if let Some(tol) = period_tol {
        opts = opts.with_period_tol(tol);
    }
    if let Some(periods) = reconstruct_periods {
        opts = opts.with_reconstruction(Reconstruction::Window { periods: *periods });
    }
    if let Some(max) = max_fallbacks {
        opts = opts.with_max_fallbacks(*max);
    }
    Ok(opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ef_core::Tolerance;

    fn forced_vdp() -> SystemDef {
        SystemDef::VanDerPol {
            epsilon: 0.001,
            amplitudes: vec![0.001, 0.0001],
            periods: vec![10.0, 100.0],
            natural_period: 10.0,
        }
    }

    fn envelope_scenario(period: PeriodDef) -> Scenario {
        Scenario {
            version: 1,
            name: "env".to_string(),
            description: None,
            system: forced_vdp(),
            initial_state: vec![2.0, -3.0],
            t_start: 0.0,
            t_end: 30.0,
            run: RunDef::Envelope {
                period,
                macro_stepping: MacroSteppingDef::Variable {
                    rtol: 1e-4,
                    atol: 1e-6,
                    max_order: Some(3),
                    first_step: None,
                    max_step: Some(40.0),
                },
                inner: IntegratorDef::BdfFixed {
                    step: 0.01,
                    order: 2,
                    nonlinear: NonlinearDef::Newton,
                },
                reconstruct_periods: Some(2),
                max_fallbacks: Some(1),
            },
        }
    }

    #[test]
    fn shortest_forcing_period_is_selected() {
        let opts = compile_envelope(&envelope_scenario(PeriodDef::ShortestForcing)).unwrap();
        assert_eq!(opts.period, Period::Known(10.0));
        assert_eq!(
            opts.macro_stepping,
            MacroStepping::Variable {
                rtol: 1e-4,
                atol: 1e-6,
                max_order: 3,
                first_step: None,
                max_step: Some(40.0),
            }
        );
        assert_eq!(opts.reconstruct, Reconstruction::Window { periods: 2 });
        assert_eq!(opts.max_fallbacks, Some(1));
        assert_eq!(opts.inner.step, Some(0.01));
        assert_eq!(opts.inner.nonlinear, NonlinearMethod::Newton);
    }

    #[test]
    fn estimated_period_carries_its_tolerance() {
        let mut scenario = envelope_scenario(PeriodDef::Estimate {
            guess: 9.0,
            tolerance: Some(0.2),
        });
        if let RunDef::Envelope { macro_stepping, .. } = &mut scenario.run {
            *macro_stepping = MacroSteppingDef::Trapezoidal {
                rtol: 1e-5,
                atol: 1e-7,
                max_step_periods: 20,
            };
        }
        let opts = compile_envelope(&scenario).unwrap();
        assert_eq!(opts.period, Period::Estimate { guess: 9.0 });
        assert_eq!(opts.period_tol, 0.2);
        assert_eq!(
            opts.macro_stepping,
            MacroStepping::Trapezoidal {
                rtol: 1e-5,
                atol: 1e-7,
                max_step_periods: 20,
            }
        );
    }

    #[test]
    fn direct_run_keeps_decimation() {
        let scenario = Scenario {
            run: RunDef::Direct {
                integrator: IntegratorDef::BdfVariable {
                    rtol: Tolerance::Scalar(1e-6),
                    atol: Tolerance::PerComponent(vec![1e-8, 1e-9]),
                    max_order: None,
                    period: Some(10.0),
                    max_step: None,
                },
                record_every: 7,
            },
            ..envelope_scenario(PeriodDef::Known { value: 10.0 })
        };
        let compiled = compile_scenario(&scenario).unwrap();
        assert_eq!(compiled.system.dimension(), 2);
        assert_eq!(compiled.span, (0.0, 30.0));
        match compiled.plan {
            RunPlan::Direct(opts) => {
                assert_eq!(opts.record_every, 7);
                assert_eq!(opts.period, Some(10.0));
                assert_eq!(opts.atol, Tolerance::PerComponent(vec![1e-8, 1e-9]));
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn invalid_payload_parameters_fail_to_compile() {
        let def = SystemDef::HarmonicOscillator { omega: -1.0 };
        assert!(matches!(compile_system(&def), Err(AppError::Compile(_))));
    }
}
