pub mod analysis;
pub mod autodiff;
pub mod backend;
pub mod coords;
pub mod equation_engine;
pub mod error;
pub mod evaluation;
pub mod grid;
pub mod persistence;
pub mod potential;
pub mod progress;
pub mod recipe;
pub mod solvers;
/// The `commensurability_core` crate computes commensurability images: grids of
/// orbital initial conditions integrated through a potential and scored orbit
/// by orbit.
///
/// Key components:
/// - **Analysis**: `Analysis`, the engine that expands the grid, integrates it in
///   batches and assembles the image; save/load lives in `persistence`.
/// - **Recipes**: serializable generating functions (initial conditions, potentials)
///   compiled by the bytecode `equation_engine`.
/// - **Backends**: `OrbitBackend` plus leapfrog, RK4 and Tsit5 built-ins, resolved by
///   name or by the potential's family.
/// - **Evaluators**: `Evaluator` strategies; `SpectralEvaluator` scores frequency
///   ratios in 2D or 3D.
pub mod traits;
pub mod units;

pub use analysis::{Analysis, AnalysisOptions};
pub use backend::{BackendChoice, BackendKind, OrbitBackend};
pub use coords::{CoordBatch, Orbit, PhaseSpaceCoord};
pub use error::{AnalysisError, AnalysisResult};
pub use evaluation::{Evaluation, Evaluator, Projection, SpectralEvaluator};
pub use grid::{AxisSet, GridExpander};
pub use recipe::{Frame, IcRecipe, PotentialRecipe};
pub use units::{AngularVelocity, AngularVelocityUnit, Time, TimeUnit};
