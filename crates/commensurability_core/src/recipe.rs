//! Serializable descriptions of the two generating functions of an analysis:
//! the initial-condition constructor and the potential constructor.
//!
//! A saved analysis stores these recipes (versioned JSON) instead of code.
//! On load they are recompiled by the expression engine against a fixed
//! symbol table, so nothing outside [`HELPER_CONSTANTS`] and the recipe's own
//! parameters is reachable.

use crate::coords::PhaseSpaceCoord;
use crate::equation_engine::{compile_expression, Bytecode, Compiler, VM};
use crate::potential::Potential;
use crate::units::G;
use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::f64::consts::PI;

/// Current recipe format version.
pub const RECIPE_VERSION: u32 = 1;

/// Unit and coordinate helper symbols visible to every recipe expression.
/// Values convert into the canonical units (kpc, km/s, Gyr, rad, Msun).
pub const HELPER_CONSTANTS: &[(&str, f64)] = &[
    ("pi", PI),
    ("deg", PI / 180.0),
    ("rad", 1.0),
    ("kpc", 1.0),
    ("pc", 1e-3),
    ("kms", 1.0),
    ("Gyr", 1.0),
    ("Myr", 1e-3),
    ("Msun", 1.0),
    ("G", G),
];

/// Coordinate frame the six component expressions are written in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frame {
    /// (x, y, z, vx, vy, vz)
    #[default]
    Cartesian,
    /// (R, phi, z, vR, vT, vz)
    Cylindrical,
}

/// Initial-condition constructor: named parameters mapped to a phase-space point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcRecipe {
    pub parameters: Vec<String>,
    #[serde(default)]
    pub frame: Frame,
    pub components: [String; 6],
}

impl IcRecipe {
    pub fn new(parameters: &[&str], frame: Frame, components: [&str; 6]) -> Self {
        Self {
            parameters: parameters.iter().map(|p| p.to_string()).collect(),
            frame,
            components: components.map(str::to_string),
        }
    }

    pub fn cartesian(parameters: &[&str], components: [&str; 6]) -> Self {
        Self::new(parameters, Frame::Cartesian, components)
    }

    pub fn cylindrical(parameters: &[&str], components: [&str; 6]) -> Self {
        Self::new(parameters, Frame::Cylindrical, components)
    }

    /// Takes no parameters and returns the origin at rest.
    pub fn noop() -> Self {
        Self::cartesian(&[], ["0", "0", "0", "0", "0", "0"])
    }

    pub fn compile(&self) -> Result<InitialConditions> {
        validate_parameter_names(&self.parameters)?;
        let compiler = Compiler::new(&[], &self.parameters).with_constants(HELPER_CONSTANTS);
        let mut code: [Bytecode; 6] = Default::default();
        for (slot, source) in code.iter_mut().zip(&self.components) {
            *slot = compile_expression(source, &compiler)
                .with_context(|| format!("Invalid initial-condition component \"{source}\""))?;
        }
        Ok(InitialConditions {
            recipe: self.clone(),
            code,
        })
    }
}

fn validate_parameter_names(names: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .map(|c| c.is_alphabetic() || c == '_')
            .unwrap_or(false);
        if !valid_start || !chars.all(|c| c.is_alphanumeric() || c == '_') {
            bail!("Invalid parameter name \"{name}\".");
        }
        if !seen.insert(name.as_str()) {
            bail!("Duplicate parameter name \"{name}\".");
        }
    }
    Ok(())
}

/// A compiled initial-condition constructor, callable positionally.
#[derive(Debug, Clone)]
pub struct InitialConditions {
    recipe: IcRecipe,
    code: [Bytecode; 6],
}

impl InitialConditions {
    /// Declared parameter names, in positional order.
    pub fn parameters(&self) -> &[String] {
        &self.recipe.parameters
    }

    pub fn recipe(&self) -> &IcRecipe {
        &self.recipe
    }

    pub fn call(&self, args: &[f64]) -> Result<PhaseSpaceCoord> {
        if args.len() != self.recipe.parameters.len() {
            bail!(
                "Initial-condition constructor expects {} arguments, got {}.",
                self.recipe.parameters.len(),
                args.len()
            );
        }
        let depth = self.code.iter().map(Bytecode::max_stack_depth).max();
        let mut stack = Vec::with_capacity(depth.unwrap_or(0));
        let c = self
            .code
            .each_ref()
            .map(|code| VM::execute(code, &[], args, &mut stack));
        Ok(match self.recipe.frame {
            Frame::Cartesian => PhaseSpaceCoord::new(
                [c[0], c[1], c[2]].into(),
                [c[3], c[4], c[5]].into(),
            ),
            Frame::Cylindrical => {
                PhaseSpaceCoord::from_cylindrical(c[0], c[1], c[2], c[3], c[4], c[5])
            }
        })
    }
}

/// Potential constructor. Masses in Msun, lengths in kpc, velocities in km/s;
/// expression potentials are functions of `x`, `y`, `z` returning (km/s)^2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PotentialRecipe {
    Null,
    Kepler {
        mass: f64,
    },
    Plummer {
        mass: f64,
        b: f64,
    },
    Hernquist {
        mass: f64,
        a: f64,
    },
    Isochrone {
        mass: f64,
        b: f64,
    },
    MiyamotoNagai {
        mass: f64,
        a: f64,
        b: f64,
    },
    Nfw {
        mass: f64,
        rs: f64,
    },
    Logarithmic {
        v0: f64,
        rc: f64,
        #[serde(default = "unit_flattening")]
        q: f64,
    },
    Expression {
        expression: String,
    },
    Composite {
        components: Vec<PotentialRecipe>,
    },
}

fn unit_flattening() -> f64 {
    1.0
}

impl PotentialRecipe {
    /// Runs the constructor.
    pub fn build(&self) -> Result<Potential> {
        Potential::from_recipe(self)
    }
}

#[derive(Serialize, Deserialize)]
struct RecipeEnvelope<T> {
    version: u32,
    recipe: T,
}

/// Encodes a recipe as versioned JSON bytes.
pub fn encode_recipe<T: Serialize>(recipe: &T) -> Result<Vec<u8>> {
    let envelope = RecipeEnvelope {
        version: RECIPE_VERSION,
        recipe,
    };
    serde_json::to_vec_pretty(&envelope).map_err(|err| anyhow!("Failed to encode recipe: {err}"))
}

/// Decodes bytes written by [`encode_recipe`], rejecting unknown versions.
pub fn decode_recipe<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let envelope: RecipeEnvelope<serde_json::Value> =
        serde_json::from_slice(bytes).context("Stored recipe is not valid JSON")?;
    if envelope.version != RECIPE_VERSION {
        bail!(
            "Unsupported recipe version {} (expected {}).",
            envelope.version,
            RECIPE_VERSION
        );
    }
    serde_json::from_value(envelope.recipe).context("Stored recipe has an unexpected shape")
}
