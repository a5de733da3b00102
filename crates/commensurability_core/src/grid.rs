//! Named parameter axes and the expansion of grid pixels into initial conditions.

use crate::coords::PhaseSpaceCoord;
use crate::error::{AnalysisError, AnalysisResult};
use crate::recipe::InitialConditions;
use anyhow::{bail, Result};

/// One named axis: the tick values of a single constructor parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    pub name: String,
    pub values: Vec<f64>,
}

/// An ordered collection of named axes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AxisSet {
    axes: Vec<Axis>,
}

impl AxisSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an axis; builder form of [`AxisSet::push`].
    pub fn with(mut self, name: impl Into<String>, values: impl Into<Vec<f64>>) -> Self {
        self.push(name, values);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, values: impl Into<Vec<f64>>) {
        self.axes.push(Axis {
            name: name.into(),
            values: values.into(),
        });
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.axes
            .iter()
            .find(|axis| axis.name == name)
            .map(|axis| axis.values.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.axes.iter().map(|axis| axis.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Axis> {
        self.axes.iter()
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Vec<f64>)> for AxisSet {
    fn from_iter<I: IntoIterator<Item = (S, Vec<f64>)>>(iter: I) -> Self {
        let mut set = AxisSet::new();
        for (name, values) in iter {
            set.push(name, values);
        }
        set
    }
}

/// Maps multi-indices of the parameter grid to initial conditions.
///
/// Axes are held in the constructor's parameter order, whatever order they
/// were supplied in, so `shape()[i]` is the length of the axis feeding the
/// i-th positional argument.
#[derive(Debug, Clone)]
pub struct GridExpander {
    constructor: InitialConditions,
    axes: AxisSet,
    shape: Vec<usize>,
}

impl GridExpander {
    pub fn new(constructor: InitialConditions, axes: AxisSet) -> AnalysisResult<Self> {
        let parameters = constructor.parameters();
        let mismatch = || AnalysisError::AxisMismatch {
            expected: parameters.to_vec(),
            found: axes.names().map(str::to_string).collect(),
        };
        if axes.len() != parameters.len() {
            return Err(mismatch());
        }

        let mut ordered = AxisSet::new();
        for parameter in parameters {
            let mut matching = axes.iter().filter(|axis| &axis.name == parameter);
            let axis = matching.next().ok_or_else(mismatch)?;
            if matching.next().is_some() {
                return Err(mismatch());
            }
            if axis.values.is_empty() {
                return Err(AnalysisError::EmptyAxis(axis.name.clone()));
            }
            ordered.axes.push(axis.clone());
        }

        let shape = ordered.iter().map(|axis| axis.values.len()).collect();
        Ok(Self {
            constructor,
            axes: ordered,
            shape,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of pixels. A constructor without parameters has one.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Axes in constructor-parameter order.
    pub fn axes(&self) -> &AxisSet {
        &self.axes
    }

    pub fn constructor(&self) -> &InitialConditions {
        &self.constructor
    }

    /// Axis values at `pixel`, one per constructor parameter.
    pub fn parameters_at(&self, pixel: &[usize]) -> Result<Vec<f64>> {
        if pixel.len() != self.shape.len() {
            bail!(
                "Pixel {:?} has rank {}, grid has rank {}.",
                pixel,
                pixel.len(),
                self.shape.len()
            );
        }
        self.axes
            .iter()
            .zip(pixel)
            .map(|(axis, &index)| match axis.values.get(index) {
                Some(value) => Ok(*value),
                None => bail!(
                    "Index {index} is out of range for axis \"{}\" of length {}.",
                    axis.name,
                    axis.values.len()
                ),
            })
            .collect()
    }

    /// Calls the constructor positionally with the axis values at `pixel`.
    pub fn expand(&self, pixel: &[usize]) -> Result<PhaseSpaceCoord> {
        let args = self.parameters_at(pixel)?;
        self.constructor.call(&args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::IcRecipe;

    fn constructor() -> InitialConditions {
        IcRecipe::cartesian(&["x", "vy"], ["x", "0", "0", "0", "vy", "0"])
            .compile()
            .expect("compile")
    }

    #[test]
    fn shape_follows_parameter_order() {
        let axes = AxisSet::new()
            .with("vy", vec![100.0, 200.0, 300.0])
            .with("x", vec![1.0, 2.0]);
        let grid = GridExpander::new(constructor(), axes).expect("grid");
        assert_eq!(grid.shape(), &[2, 3]);
        assert_eq!(grid.size(), 6);
        assert_eq!(grid.axes().names().collect::<Vec<_>>(), vec!["x", "vy"]);

        let coord = grid.expand(&[1, 2]).expect("expand");
        assert_eq!(coord.position.x, 2.0);
        assert_eq!(coord.velocity.y, 300.0);
    }

    #[test]
    fn mismatched_axes_are_configuration_errors() {
        let cases = [
            AxisSet::new().with("x", vec![1.0]),
            AxisSet::new().with("x", vec![1.0]).with("vz", vec![1.0]),
            AxisSet::new()
                .with("x", vec![1.0])
                .with("vy", vec![1.0])
                .with("z", vec![0.0]),
            AxisSet::new().with("x", vec![1.0]).with("x", vec![2.0]),
        ];
        for axes in cases {
            let err = GridExpander::new(constructor(), axes).expect_err("mismatch");
            assert!(err.is_configuration());
            assert!(matches!(err, AnalysisError::AxisMismatch { .. }));
        }
    }

    #[test]
    fn empty_axes_are_rejected() {
        let axes = AxisSet::new().with("x", vec![]).with("vy", vec![1.0]);
        let err = GridExpander::new(constructor(), axes).expect_err("empty");
        assert!(matches!(err, AnalysisError::EmptyAxis(name) if name == "x"));
    }

    #[test]
    fn bad_pixels_are_errors() {
        let axes = AxisSet::new().with("x", vec![1.0]).with("vy", vec![1.0]);
        let grid = GridExpander::new(constructor(), axes).expect("grid");
        let err = grid.expand(&[0]).expect_err("rank");
        assert!(err.to_string().contains("rank"));
        let err = grid.expand(&[0, 1]).expect_err("range");
        assert!(err.to_string().contains("out of range for axis \"vy\""));
    }

    #[test]
    fn parameterless_constructor_has_a_single_pixel() {
        let noop = IcRecipe::noop().compile().expect("noop");
        let grid = GridExpander::new(noop, AxisSet::new()).expect("grid");
        assert!(grid.shape().is_empty());
        assert_eq!(grid.size(), 1);
        assert_eq!(grid.expand(&[]).expect("expand").to_array(), [0.0; 6]);
    }
}
