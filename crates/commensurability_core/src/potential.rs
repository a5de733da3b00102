//! Potential objects built from [`PotentialRecipe`]s.
//!
//! Every potential is written once, generically over [`Scalar`], and its
//! gradient is taken with dual numbers. Values are in (km/s)^2 for positions
//! in kpc.

use crate::autodiff::{gradient, Dual};
use crate::equation_engine::{compile_expression, Bytecode, Compiler, VM};
use crate::recipe::{PotentialRecipe, HELPER_CONSTANTS};
use crate::traits::Scalar;
use crate::units::G;
use anyhow::{bail, Context, Result};
use nalgebra::Vector3;

/// Capability class of a potential, used to pick an integration backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PotentialFamily {
    /// Built only from closed-form components.
    Analytic,
    /// Contains at least one user expression evaluated by the VM.
    Symbolic,
}

/// Closed-form mass models. `gm` is G * M in kpc (km/s)^2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnalyticComponent {
    Kepler { gm: f64 },
    Plummer { gm: f64, b: f64 },
    Hernquist { gm: f64, a: f64 },
    Isochrone { gm: f64, b: f64 },
    MiyamotoNagai { gm: f64, a: f64, b: f64 },
    Nfw { gm: f64, rs: f64 },
    Logarithmic { v0: f64, rc: f64, q: f64 },
}

impl AnalyticComponent {
    fn value<T: Scalar>(&self, r: &[T; 3]) -> T {
        let c = T::constant;
        let r2 = r[0] * r[0] + r[1] * r[1] + r[2] * r[2];
        match *self {
            AnalyticComponent::Kepler { gm } => -c(gm) / r2.sqrt(),
            AnalyticComponent::Plummer { gm, b } => -c(gm) / (r2 + c(b * b)).sqrt(),
            AnalyticComponent::Hernquist { gm, a } => -c(gm) / (r2.sqrt() + c(a)),
            AnalyticComponent::Isochrone { gm, b } => {
                -c(gm) / (c(b) + (r2 + c(b * b)).sqrt())
            }
            AnalyticComponent::MiyamotoNagai { gm, a, b } => {
                let rho2 = r[0] * r[0] + r[1] * r[1];
                let zeta = c(a) + (r[2] * r[2] + c(b * b)).sqrt();
                -c(gm) / (rho2 + zeta * zeta).sqrt()
            }
            AnalyticComponent::Nfw { gm, rs } => {
                if r2.value() == 0.0 {
                    // limit of ln(1 + r/rs) / r as r -> 0
                    return c(-gm / rs);
                }
                let radius = r2.sqrt();
                -c(gm) * (radius / c(rs)).ln_1p() / radius
            }
            AnalyticComponent::Logarithmic { v0, rc, q } => {
                let m2 = r[0] * r[0] + r[1] * r[1] + r[2] * r[2] / c(q * q);
                c(0.5 * v0 * v0) * (c(rc * rc) + m2).ln()
            }
        }
    }
}

/// A potential defined by an expression in `x`, `y`, `z`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionPotential {
    source: String,
    code: Bytecode,
}

impl ExpressionPotential {
    pub fn compile(source: &str) -> Result<Self> {
        let vars = ["x".to_string(), "y".to_string(), "z".to_string()];
        let compiler = Compiler::new(&vars, &[]).with_constants(HELPER_CONSTANTS);
        let code = compile_expression(source, &compiler)
            .with_context(|| format!("Invalid potential expression \"{source}\""))?;
        Ok(Self {
            source: source.to_string(),
            code,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// The potential object an analysis integrates orbits in.
#[derive(Debug, Clone, PartialEq)]
pub enum Potential {
    /// Zero everywhere. Stands in for a missing potential constructor.
    Null,
    Analytic(AnalyticComponent),
    Expression(ExpressionPotential),
    Composite(Vec<Potential>),
}

impl Potential {
    pub fn from_recipe(recipe: &PotentialRecipe) -> Result<Self> {
        Ok(match recipe {
            PotentialRecipe::Null => Potential::Null,
            PotentialRecipe::Kepler { mass } => {
                Potential::Analytic(AnalyticComponent::Kepler { gm: gm(*mass)? })
            }
            PotentialRecipe::Plummer { mass, b } => Potential::Analytic(AnalyticComponent::Plummer {
                gm: gm(*mass)?,
                b: positive("b", *b)?,
            }),
            PotentialRecipe::Hernquist { mass, a } => {
                Potential::Analytic(AnalyticComponent::Hernquist {
                    gm: gm(*mass)?,
                    a: positive("a", *a)?,
                })
            }
            PotentialRecipe::Isochrone { mass, b } => {
                Potential::Analytic(AnalyticComponent::Isochrone {
                    gm: gm(*mass)?,
                    b: positive("b", *b)?,
                })
            }
            PotentialRecipe::MiyamotoNagai { mass, a, b } => {
                Potential::Analytic(AnalyticComponent::MiyamotoNagai {
                    gm: gm(*mass)?,
                    a: non_negative("a", *a)?,
                    b: positive("b", *b)?,
                })
            }
            PotentialRecipe::Nfw { mass, rs } => Potential::Analytic(AnalyticComponent::Nfw {
                gm: gm(*mass)?,
                rs: positive("rs", *rs)?,
            }),
            PotentialRecipe::Logarithmic { v0, rc, q } => {
                Potential::Analytic(AnalyticComponent::Logarithmic {
                    v0: finite("v0", *v0)?,
                    rc: non_negative("rc", *rc)?,
                    q: positive("q", *q)?,
                })
            }
            PotentialRecipe::Expression { expression } => {
                Potential::Expression(ExpressionPotential::compile(expression)?)
            }
            PotentialRecipe::Composite { components } => {
                if components.is_empty() {
                    bail!("Composite potential needs at least one component.");
                }
                Potential::Composite(
                    components
                        .iter()
                        .map(Potential::from_recipe)
                        .collect::<Result<_>>()?,
                )
            }
        })
    }

    pub fn family(&self) -> PotentialFamily {
        match self {
            Potential::Null | Potential::Analytic(_) => PotentialFamily::Analytic,
            Potential::Expression(_) => PotentialFamily::Symbolic,
            Potential::Composite(parts) => {
                if parts
                    .iter()
                    .any(|part| part.family() == PotentialFamily::Symbolic)
                {
                    PotentialFamily::Symbolic
                } else {
                    PotentialFamily::Analytic
                }
            }
        }
    }

    fn value_generic<T: Scalar>(&self, r: &[T; 3], stack: &mut Vec<T>) -> T {
        match self {
            Potential::Null => T::constant(0.0),
            Potential::Analytic(component) => component.value(r),
            Potential::Expression(expr) => VM::execute(&expr.code, r, &[], stack),
            Potential::Composite(parts) => parts
                .iter()
                .fold(T::constant(0.0), |acc, part| acc + part.value_generic(r, stack)),
        }
    }

    /// Potential at `position` (kpc), in (km/s)^2.
    pub fn value(&self, position: &Vector3<f64>) -> f64 {
        let mut stack = Vec::new();
        self.value_generic(&[position.x, position.y, position.z], &mut stack)
    }

    /// Gradient at `position`, in (km/s)^2 / kpc. `scratch` is reused between calls.
    pub fn gradient(&self, position: &Vector3<f64>, scratch: &mut Vec<Dual>) -> Vector3<f64> {
        let grad = gradient([position.x, position.y, position.z], |r| {
            self.value_generic(r, scratch)
        });
        Vector3::from(grad)
    }
}

fn gm(mass: f64) -> Result<f64> {
    Ok(G * finite("mass", mass)?)
}

fn finite(name: &str, value: f64) -> Result<f64> {
    if !value.is_finite() {
        bail!("Potential parameter {name} must be finite.");
    }
    Ok(value)
}

fn positive(name: &str, value: f64) -> Result<f64> {
    if finite(name, value)? <= 0.0 {
        bail!("Potential parameter {name} must be positive.");
    }
    Ok(value)
}

fn non_negative(name: &str, value: f64) -> Result<f64> {
    if finite(name, value)? < 0.0 {
        bail!("Potential parameter {name} must be non-negative.");
    }
    Ok(value)
}
