//! The analysis engine: expands the parameter grid, integrates it batch by
//! batch and writes one measure per pixel into the image.

use crate::backend::{resolve, BackendChoice, OrbitBackend};
use crate::coords::CoordBatch;
use crate::error::{AnalysisError, AnalysisResult};
use crate::evaluation::{Evaluation, Evaluator};
use crate::grid::{AxisSet, GridExpander};
use crate::potential::Potential;
use crate::progress::{ProgressEvent, ProgressObserver, TracingProgress};
use crate::recipe::{IcRecipe, PotentialRecipe};
use crate::units::{make_quantity, AngularVelocity, AngularVelocityUnit, Time, TimeUnit};
use ndarray::{indices, ArrayD, Dimension, IxDyn};
use tracing::{debug, info};

/// Optional construction settings.
#[derive(Debug)]
pub struct AnalysisOptions {
    /// Angular velocity of the rotating frame; zero for a static potential.
    pub pattern_speed: AngularVelocity,
    pub backend: BackendChoice,
    /// Orbits per backend call. Must satisfy `0 < chunksize < size`.
    pub chunksize: usize,
    /// Report progress through [`TracingProgress`] (or the observer passed
    /// to [`Analysis::new_with_progress`]).
    pub progressbar: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            pattern_speed: AngularVelocity::default(),
            backend: BackendChoice::Implicit,
            chunksize: 1,
            progressbar: true,
        }
    }
}

/// A commensurability image over a grid of initial conditions.
///
/// Built either eagerly ([`Analysis::new`]) or, by the persistence layer,
/// blank with an externally supplied image.
pub struct Analysis<E: Evaluator> {
    evaluator: E,
    grid: GridExpander,
    potential_recipe: PotentialRecipe,
    potential: Potential,
    backend: Box<dyn OrbitBackend>,
    dt: f64,
    steps: usize,
    pattern_speed: f64,
    image: ArrayD<f64>,
}

impl<E: Evaluator> Analysis<E> {
    /// Validates the configuration, resolves the backend and computes the image.
    pub fn new(
        evaluator: E,
        ic_recipe: IcRecipe,
        axes: AxisSet,
        potential_recipe: PotentialRecipe,
        dt: impl Into<Time>,
        steps: usize,
        options: AnalysisOptions,
    ) -> AnalysisResult<Self> {
        let mut progress = TracingProgress::new();
        Self::new_with_progress(
            evaluator,
            ic_recipe,
            axes,
            potential_recipe,
            dt,
            steps,
            options,
            &mut progress,
        )
    }

    /// Same as [`Analysis::new`], reporting to `progress` instead of the log.
    #[allow(clippy::too_many_arguments)]
    pub fn new_with_progress(
        evaluator: E,
        ic_recipe: IcRecipe,
        axes: AxisSet,
        potential_recipe: PotentialRecipe,
        dt: impl Into<Time>,
        steps: usize,
        options: AnalysisOptions,
        progress: &mut dyn ProgressObserver,
    ) -> AnalysisResult<Self> {
        let AnalysisOptions {
            pattern_speed,
            backend,
            chunksize,
            progressbar,
        } = options;

        let mut analysis = Self::blank(
            evaluator,
            ic_recipe,
            axes,
            potential_recipe,
            make_quantity::<TimeUnit>(dt),
            steps,
            make_quantity::<AngularVelocityUnit>(pattern_speed),
            backend,
            Some(chunksize),
        )?;
        analysis.compute(chunksize, progressbar.then_some(progress))?;
        Ok(analysis)
    }

    /// Builds a validated instance with a zero image and runs nothing.
    ///
    /// `chunksize` is only checked when given; loaded analyses don't store one.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn blank(
        evaluator: E,
        ic_recipe: IcRecipe,
        axes: AxisSet,
        potential_recipe: PotentialRecipe,
        dt: f64,
        steps: usize,
        pattern_speed: f64,
        backend: BackendChoice,
        chunksize: Option<usize>,
    ) -> AnalysisResult<Self> {
        if dt.is_nan() || dt <= 0.0 {
            return Err(AnalysisError::NonPositiveTimeStep(dt));
        }
        if steps == 0 {
            return Err(AnalysisError::NonPositiveSteps);
        }

        let constructor = ic_recipe
            .compile()
            .map_err(|source| AnalysisError::InvalidRecipe {
                what: "initial-condition",
                source,
            })?;
        let grid = GridExpander::new(constructor, axes)?;
        let size = grid.size();
        if let Some(chunksize) = chunksize {
            if chunksize == 0 || chunksize >= size {
                return Err(AnalysisError::InvalidChunksize { chunksize, size });
            }
        }

        let potential = potential_recipe
            .build()
            .map_err(|source| AnalysisError::InvalidRecipe {
                what: "potential",
                source,
            })?;
        let backend = resolve(backend, &potential)?;
        debug!(
            backend = backend.implementation_name(),
            family = ?potential.family(),
            "Resolved integration backend"
        );

        let image = ArrayD::zeros(IxDyn(grid.shape()));
        Ok(Self {
            evaluator,
            grid,
            potential_recipe,
            potential,
            backend,
            dt,
            steps,
            pattern_speed,
            image,
        })
    }

    /// Row-major traversal in consecutive batches of `chunksize` pixels.
    fn compute(
        &mut self,
        chunksize: usize,
        mut progress: Option<&mut dyn ProgressObserver>,
    ) -> AnalysisResult<()> {
        let size = self.grid.size();
        let total = size.div_ceil(chunksize);
        info!(
            evaluator = self.evaluator.name(),
            backend = self.backend.implementation_name(),
            shape = ?self.grid.shape(),
            batches = total,
            "Computing commensurability image"
        );

        let mut pixels = indices(IxDyn(self.grid.shape()))
            .into_iter()
            .map(|index| index.slice().to_vec());
        for batch in 0..total {
            let members: Vec<Vec<usize>> = pixels.by_ref().take(chunksize).collect();
            if let Some(progress) = progress.as_deref_mut() {
                progress.report(ProgressEvent::BatchStarted {
                    batch,
                    total,
                    len: members.len(),
                });
            }

            let coords = members
                .iter()
                .map(|pixel| {
                    self.grid
                        .expand(pixel)
                        .map_err(|source| AnalysisError::Expansion {
                            pixel: pixel.clone(),
                            source,
                        })
                })
                .collect::<AnalysisResult<Vec<_>>>()?;
            let orbits = self
                .backend
                .integrate(
                    &CoordBatch::collapse(coords),
                    &self.potential,
                    self.dt,
                    self.steps,
                    self.pattern_speed,
                )
                .map_err(|source| AnalysisError::Integration { batch, source })?;
            if orbits.len() != members.len() {
                return Err(AnalysisError::BackendOutputMismatch {
                    expected: members.len(),
                    found: orbits.len(),
                });
            }

            for (index, (pixel, orbit)) in members.iter().zip(&orbits).enumerate() {
                let evaluation =
                    self.evaluator
                        .evaluate(orbit)
                        .map_err(|source| AnalysisError::Evaluation {
                            pixel: pixel.clone(),
                            source,
                        })?;
                self.image[pixel.as_slice()] = evaluation.measure();
                if let Some(progress) = progress.as_deref_mut() {
                    progress.report(ProgressEvent::OrbitEvaluated {
                        batch,
                        index,
                        len: members.len(),
                    });
                }
            }
        }

        if let Some(progress) = progress.as_deref_mut() {
            progress.report(ProgressEvent::Finished { pixels: size });
        }
        Ok(())
    }

    pub fn image(&self) -> &ArrayD<f64> {
        &self.image
    }

    /// Replaces the image wholesale. Only the load path does this.
    pub(crate) fn set_image(&mut self, image: ArrayD<f64>) {
        self.image = image;
    }

    /// Grid shape, in constructor-parameter order.
    pub fn shape(&self) -> &[usize] {
        self.grid.shape()
    }

    pub fn size(&self) -> usize {
        self.grid.size()
    }

    /// Axes in constructor-parameter order.
    pub fn axes(&self) -> &AxisSet {
        self.grid.axes()
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn ic_recipe(&self) -> &IcRecipe {
        self.grid.constructor().recipe()
    }

    pub fn potential_recipe(&self) -> &PotentialRecipe {
        &self.potential_recipe
    }

    pub fn potential(&self) -> &Potential {
        &self.potential
    }

    pub fn backend(&self) -> &dyn OrbitBackend {
        self.backend.as_ref()
    }

    /// Time step in Gyr.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Pattern speed in km/s/kpc.
    pub fn pattern_speed(&self) -> f64 {
        self.pattern_speed
    }
}

impl<E: Evaluator + std::fmt::Debug> std::fmt::Debug for Analysis<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analysis")
            .field("evaluator", &self.evaluator)
            .field("shape", &self.grid.shape())
            .field("backend", &self.backend.implementation_name())
            .field("dt", &self.dt)
            .field("steps", &self.steps)
            .field("pattern_speed", &self.pattern_speed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::coords::Orbit;
    use anyhow::{bail, Result};

    fn assert_err_contains<T>(result: AnalysisResult<T>, needle: &str) {
        let err = match result {
            Ok(_) => panic!("expected error"),
            Err(err) => err,
        };
        let message = format!("{:#}", anyhow::Error::from(err));
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    /// Returns every input coordinate as a motionless orbit.
    pub(crate) struct EchoBackend;

    impl OrbitBackend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        fn implementation_name(&self) -> &str {
            "EchoBackend"
        }

        fn accepts(&self, _potential: &Potential) -> bool {
            true
        }

        fn integrate(
            &self,
            coords: &CoordBatch,
            _potential: &Potential,
            dt: f64,
            steps: usize,
            _pattern_speed: f64,
        ) -> Result<Vec<Orbit>> {
            Ok(coords
                .iter()
                .map(|coord| Orbit::stationary(coord, dt, steps + 1))
                .collect())
        }
    }

    /// Measures the initial x coordinate of the orbit.
    #[derive(Debug)]
    pub(crate) struct FirstCoordinate;

    impl Evaluator for FirstCoordinate {
        type Output = f64;

        fn name(&self) -> &str {
            "FirstCoordinate"
        }

        fn evaluate(&self, orbit: &Orbit) -> Result<f64> {
            match orbit.initial() {
                Some(coord) => Ok(coord.position.x),
                None => bail!("Empty orbit."),
            }
        }
    }

    /// Measures the final x coordinate, so results depend on the integration.
    #[derive(Debug)]
    struct FinalCoordinate;

    impl Evaluator for FinalCoordinate {
        type Output = f64;

        fn name(&self) -> &str {
            "FinalCoordinate"
        }

        fn evaluate(&self, orbit: &Orbit) -> Result<f64> {
            match orbit.positions.last() {
                Some(position) => Ok(position.x),
                None => bail!("Empty orbit."),
            }
        }
    }

    struct FailingEvaluator;

    impl Evaluator for FailingEvaluator {
        type Output = f64;

        fn name(&self) -> &str {
            "Failing"
        }

        fn evaluate(&self, orbit: &Orbit) -> Result<f64> {
            let x = FirstCoordinate.evaluate(orbit)?;
            if x == 3.0 {
                bail!("Degenerate orbit at x = {x}.");
            }
            Ok(x)
        }
    }

    struct FailingBackend;

    impl OrbitBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        fn implementation_name(&self) -> &str {
            "FailingBackend"
        }

        fn accepts(&self, _potential: &Potential) -> bool {
            true
        }

        fn integrate(
            &self,
            coords: &CoordBatch,
            potential: &Potential,
            dt: f64,
            steps: usize,
            pattern_speed: f64,
        ) -> Result<Vec<Orbit>> {
            if coords.iter().any(|coord| coord.position.x == 4.0) {
                bail!("Step size underflow.");
            }
            EchoBackend.integrate(coords, potential, dt, steps, pattern_speed)
        }
    }

    /// Drops the last orbit of every batch.
    struct ShortBackend;

    impl OrbitBackend for ShortBackend {
        fn name(&self) -> &str {
            "short"
        }

        fn implementation_name(&self) -> &str {
            "ShortBackend"
        }

        fn accepts(&self, _potential: &Potential) -> bool {
            true
        }

        fn integrate(
            &self,
            coords: &CoordBatch,
            potential: &Potential,
            dt: f64,
            steps: usize,
            pattern_speed: f64,
        ) -> Result<Vec<Orbit>> {
            let mut orbits = EchoBackend.integrate(coords, potential, dt, steps, pattern_speed)?;
            orbits.pop();
            Ok(orbits)
        }
    }

    pub(crate) fn line_recipe() -> IcRecipe {
        IcRecipe::cartesian(&["y", "x"], ["x", "y", "0", "0", "0", "0"])
    }

    pub(crate) fn line_axes() -> AxisSet {
        AxisSet::new()
            .with("x", vec![1.0, 2.0, 3.0, 4.0, 5.0])
            .with("y", vec![0.5])
    }

    fn options(backend: impl OrbitBackend + 'static, chunksize: usize) -> AnalysisOptions {
        AnalysisOptions {
            backend: BackendChoice::Custom(Box::new(backend)),
            chunksize,
            progressbar: false,
            ..AnalysisOptions::default()
        }
    }

    fn line_analysis<E: Evaluator>(
        evaluator: E,
        backend: impl OrbitBackend + 'static,
        chunksize: usize,
    ) -> AnalysisResult<Analysis<E>> {
        Analysis::new(
            evaluator,
            line_recipe(),
            line_axes(),
            PotentialRecipe::Null,
            0.01,
            10,
            options(backend, chunksize),
        )
    }

    #[test]
    fn trivial_pipeline_reproduces_the_axis() {
        let analysis = line_analysis(FirstCoordinate, EchoBackend, 2).expect("analysis");
        assert_eq!(analysis.shape(), &[1, 5]);
        assert_eq!(analysis.size(), 5);
        assert_eq!(
            analysis.image().iter().copied().collect::<Vec<_>>(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0]
        );
        assert_eq!(analysis.axes().names().collect::<Vec<_>>(), vec!["y", "x"]);
        assert_eq!(analysis.backend().implementation_name(), "EchoBackend");
    }

    #[test]
    fn axis_mismatch_fails_before_integration() {
        let axes = AxisSet::new().with("x", vec![1.0, 2.0]).with("z", vec![0.0]);
        let result = Analysis::new(
            FirstCoordinate,
            line_recipe(),
            axes,
            PotentialRecipe::Null,
            0.01,
            10,
            options(FailingBackend, 1),
        );
        assert!(matches!(&result, Err(err) if err.is_configuration()));
        assert_err_contains(result, "do not match the constructor parameters");
    }

    #[test]
    fn chunksize_must_be_strictly_inside_the_grid() {
        for chunksize in [0, 5, 6] {
            let result = line_analysis(FirstCoordinate, EchoBackend, chunksize);
            assert!(matches!(
                &result,
                Err(AnalysisError::InvalidChunksize { size: 5, .. })
            ));
        }
        for chunksize in [1, 4] {
            line_analysis(FirstCoordinate, EchoBackend, chunksize).expect("valid chunksize");
        }
    }

    #[test]
    fn run_parameters_are_validated() {
        let run = |dt: Time, steps: usize| {
            Analysis::new(
                FirstCoordinate,
                line_recipe(),
                line_axes(),
                PotentialRecipe::Null,
                dt,
                steps,
                options(EchoBackend, 1),
            )
        };
        assert_err_contains(run(0.0.into(), 10), "Time step must be positive");
        assert_err_contains(run((-1.0).into(), 10), "Time step must be positive");
        assert_err_contains(run(0.01.into(), 0), "Step count must be positive");

        let analysis = run(Time::new(2.0, TimeUnit::Myr), 10).expect("dimensioned dt");
        assert!((analysis.dt() - 0.002).abs() < 1e-15);
    }

    #[test]
    fn invalid_recipes_are_configuration_errors() {
        let bad_ic = IcRecipe::cartesian(&["x", "y"], ["x", "y", "w", "0", "0", "0"]);
        let result = Analysis::new(
            FirstCoordinate,
            bad_ic,
            line_axes(),
            PotentialRecipe::Null,
            0.01,
            10,
            options(EchoBackend, 1),
        );
        assert!(matches!(&result, Err(err) if err.is_configuration()));
        assert_err_contains(result, "Unknown variable or parameter: w");

        let result = Analysis::new(
            FirstCoordinate,
            line_recipe(),
            line_axes(),
            PotentialRecipe::Kepler { mass: f64::NAN },
            0.01,
            10,
            options(EchoBackend, 1),
        );
        assert_err_contains(result, "Invalid potential recipe");
    }

    #[test]
    fn batching_does_not_change_the_image() {
        let recipe = IcRecipe::cylindrical(&["R", "vT"], ["R", "0", "0", "0", "vT", "0"]);
        let axes = AxisSet::new()
            .with("R", vec![4.0, 6.0, 8.0])
            .with("vT", vec![150.0, 200.0]);
        let run = |chunksize: usize| {
            Analysis::new(
                FinalCoordinate,
                recipe.clone(),
                axes.clone(),
                PotentialRecipe::Hernquist {
                    mass: 1e11,
                    a: 2.0,
                },
                1e-3,
                200,
                AnalysisOptions {
                    pattern_speed: AngularVelocity::new(30.0, AngularVelocityUnit::KmPerSPerKpc),
                    chunksize,
                    progressbar: false,
                    ..AnalysisOptions::default()
                },
            )
            .expect("analysis")
        };
        let reference = run(1);
        assert_eq!(reference.backend().name(), "leapfrog");
        assert_eq!(reference.pattern_speed(), 30.0);
        for chunksize in 2..6 {
            assert_eq!(run(chunksize).image(), reference.image());
        }
        assert_eq!(run(3).image(), run(3).image());
    }

    #[test]
    fn evaluation_failures_abort_construction() {
        let result = line_analysis(FailingEvaluator, EchoBackend, 2);
        assert!(matches!(
            &result,
            Err(AnalysisError::Evaluation { pixel, .. }) if pixel == &vec![0, 2]
        ));
        assert_err_contains(result, "Degenerate orbit at x = 3");
    }

    #[test]
    fn integration_failures_abort_construction() {
        let result = line_analysis(FirstCoordinate, FailingBackend, 2);
        assert!(matches!(
            &result,
            Err(AnalysisError::Integration { batch: 1, .. })
        ));
        assert_err_contains(result, "Step size underflow");

        let result = line_analysis(FirstCoordinate, ShortBackend, 2);
        assert_err_contains(result, "returned 1 orbits for a batch of 2");
    }

    #[test]
    fn progress_reports_batches_and_orbits() {
        let mut events = Vec::new();
        let mut observer = |event: ProgressEvent| events.push(event);
        let options = AnalysisOptions {
            progressbar: true,
            ..options(EchoBackend, 2)
        };
        Analysis::new_with_progress(
            FirstCoordinate,
            line_recipe(),
            line_axes(),
            PotentialRecipe::Null,
            0.01,
            10,
            options,
            &mut observer,
        )
        .expect("analysis");

        let batches: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::BatchStarted { total, len, .. } => Some((*total, *len)),
                _ => None,
            })
            .collect();
        assert_eq!(batches, vec![(3, 2), (3, 2), (3, 1)]);
        let orbits = events
            .iter()
            .filter(|event| matches!(event, ProgressEvent::OrbitEvaluated { .. }))
            .count();
        assert_eq!(orbits, 5);
        assert_eq!(events.last(), Some(&ProgressEvent::Finished { pixels: 5 }));
    }

    #[test]
    fn disabled_progress_reports_nothing() {
        let mut count = 0;
        let mut observer = |_: ProgressEvent| count += 1;
        Analysis::new_with_progress(
            FirstCoordinate,
            line_recipe(),
            line_axes(),
            PotentialRecipe::Null,
            0.01,
            10,
            options(EchoBackend, 2),
            &mut observer,
        )
        .expect("analysis");
        assert_eq!(count, 0);
    }

    #[test]
    fn implicit_and_named_backends_resolve_at_construction() {
        let analytic = Analysis::new(
            FirstCoordinate,
            line_recipe(),
            line_axes(),
            PotentialRecipe::Plummer { mass: 1e10, b: 1.0 },
            0.01,
            10,
            AnalysisOptions {
                progressbar: false,
                ..AnalysisOptions::default()
            },
        )
        .expect("implicit");
        assert_eq!(analytic.backend().implementation_name(), "LeapfrogBackend");

        let named = Analysis::new(
            FirstCoordinate,
            line_recipe(),
            line_axes(),
            PotentialRecipe::Plummer { mass: 1e10, b: 1.0 },
            0.01,
            10,
            AnalysisOptions {
                backend: BackendKind::Tsit5.into(),
                progressbar: false,
                ..AnalysisOptions::default()
            },
        )
        .expect("named");
        assert_eq!(named.backend().implementation_name(), "Tsit5Backend");

        let unknown = Analysis::new(
            FirstCoordinate,
            line_recipe(),
            line_axes(),
            PotentialRecipe::Null,
            0.01,
            10,
            AnalysisOptions {
                backend: "agama".into(),
                progressbar: false,
                ..AnalysisOptions::default()
            },
        );
        assert!(matches!(&unknown, Err(err) if err.is_configuration()));
    }
}
