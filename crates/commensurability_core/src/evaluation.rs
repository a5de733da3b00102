//! Evaluation strategies: turn one integrated orbit into a scalar measure.

use crate::coords::Orbit;
use anyhow::{bail, Result};
use num_complex::Complex;
use rustfft::FftPlanner;

/// The result of evaluating one orbit.
pub trait Evaluation {
    fn measure(&self) -> f64;
}

impl Evaluation for f64 {
    fn measure(&self) -> f64 {
        *self
    }
}

/// A per-orbit evaluation strategy. The name identifies the analysis
/// subtype and doubles as the dataset name in saved containers.
pub trait Evaluator {
    type Output: Evaluation;

    fn name(&self) -> &str;

    fn evaluate(&self, orbit: &Orbit) -> Result<Self::Output>;
}

/// Which position axes an evaluator looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// x and y only.
    Planar,
    /// x, y and z.
    Spatial,
}

impl Projection {
    pub fn dims(self) -> usize {
        match self {
            Projection::Planar => 2,
            Projection::Spatial => 3,
        }
    }
}

const MIN_SAMPLES: usize = 8;

/// Scores how close the dominant frequencies of the projected coordinates
/// are to small integer ratios.
///
/// For each axis pair the best `n:m` with `1 <= n, m <= max_order` is the
/// one minimising `|n fi - m fj| / (n fi + m fj)`, lowest orders winning
/// ties. The measure is one minus the mean of those residuals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralEvaluator {
    pub projection: Projection,
    pub max_order: u32,
}

impl SpectralEvaluator {
    pub fn planar(max_order: u32) -> Self {
        Self {
            projection: Projection::Planar,
            max_order,
        }
    }

    pub fn spatial(max_order: u32) -> Self {
        Self {
            projection: Projection::Spatial,
            max_order,
        }
    }
}

impl Default for SpectralEvaluator {
    fn default() -> Self {
        Self::planar(6)
    }
}

/// Frequencies and best ratios found for one orbit.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralEvaluation {
    /// Dominant frequency per projected axis, in cycles per Gyr.
    pub frequencies: Vec<f64>,
    /// Best `(n, m)` per axis pair `(i, j)`, `i < j`, in lexicographic order.
    pub ratios: Vec<(u32, u32)>,
    pub residuals: Vec<f64>,
    measure: f64,
}

impl Evaluation for SpectralEvaluation {
    fn measure(&self) -> f64 {
        self.measure
    }
}

impl Evaluator for SpectralEvaluator {
    type Output = SpectralEvaluation;

    fn name(&self) -> &str {
        match self.projection {
            Projection::Planar => "SpectralAnalysis2D",
            Projection::Spatial => "SpectralAnalysis",
        }
    }

    fn evaluate(&self, orbit: &Orbit) -> Result<SpectralEvaluation> {
        if self.max_order == 0 {
            bail!("max_order must be at least 1.");
        }
        if orbit.len() < MIN_SAMPLES {
            bail!(
                "Spectral evaluation needs at least {MIN_SAMPLES} samples, got {}.",
                orbit.len()
            );
        }
        let dt = orbit.sample_interval()?;
        if dt.is_nan() || dt <= 0.0 {
            bail!("Orbit samples must be increasing in time.");
        }

        let mut planner = FftPlanner::<f64>::new();
        let frequencies = (0..self.projection.dims())
            .map(|axis| dominant_frequency(&mut planner, &orbit.axis(axis), dt, axis))
            .collect::<Result<Vec<_>>>()?;

        let mut ratios = Vec::new();
        let mut residuals = Vec::new();
        for i in 0..frequencies.len() {
            for j in (i + 1)..frequencies.len() {
                let (ratio, residual) = best_ratio(frequencies[i], frequencies[j], self.max_order);
                ratios.push(ratio);
                residuals.push(residual);
            }
        }
        let mean = residuals.iter().sum::<f64>() / residuals.len() as f64;

        Ok(SpectralEvaluation {
            frequencies,
            ratios,
            residuals,
            measure: 1.0 - mean,
        })
    }
}

/// Peak of the Hann-windowed spectrum, refined by a parabola through the
/// peak bin and its neighbours.
fn dominant_frequency(
    planner: &mut FftPlanner<f64>,
    signal: &[f64],
    dt: f64,
    axis: usize,
) -> Result<f64> {
    let n = signal.len();
    let mean = signal.iter().sum::<f64>() / n as f64;
    let spread = signal
        .iter()
        .fold(0.0_f64, |acc, v| acc.max((v - mean).abs()));
    let scale = signal.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
    if !spread.is_finite() || spread <= 1e-12 * scale {
        bail!("Axis {axis} does not oscillate.");
    }

    let mut buffer: Vec<Complex<f64>> = signal
        .iter()
        .enumerate()
        .map(|(k, v)| {
            let w = 0.5 - 0.5 * (2.0 * std::f64::consts::PI * k as f64 / n as f64).cos();
            Complex::new((v - mean) * w, 0.0)
        })
        .collect();
    planner.plan_fft_forward(n).process(&mut buffer);

    let half = n / 2;
    let power: Vec<f64> = buffer[..=half].iter().map(|c| c.norm()).collect();
    let peak = (1..=half)
        .max_by(|&a, &b| power[a].total_cmp(&power[b]))
        .unwrap_or(1);

    let mut offset = 0.0;
    if peak > 1 && peak < half {
        let (left, centre, right) = (power[peak - 1], power[peak], power[peak + 1]);
        let curvature = left - 2.0 * centre + right;
        if curvature != 0.0 {
            offset = (0.5 * (left - right) / curvature).clamp(-0.5, 0.5);
        }
    }
    Ok((peak as f64 + offset) / (n as f64 * dt))
}

fn best_ratio(fi: f64, fj: f64, max_order: u32) -> ((u32, u32), f64) {
    let mut best = ((1, 1), f64::INFINITY);
    for n in 1..=max_order {
        for m in 1..=max_order {
            let (a, b) = (n as f64 * fi, m as f64 * fj);
            let residual = (a - b).abs() / (a + b);
            // ties go to the lowest orders
            if residual < best.1 - 1e-12 {
                best = ((n, m), residual);
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::PhaseSpaceCoord;
    use nalgebra::Vector3;
    use std::f64::consts::TAU;

    fn lissajous(fx: f64, fy: f64, fz: f64, samples: usize, dt: f64) -> Orbit {
        let mut orbit = Orbit::with_capacity(samples);
        for i in 0..samples {
            let t = i as f64 * dt;
            let position = Vector3::new(
                (TAU * fx * t).cos(),
                (TAU * fy * t).sin(),
                0.3 * (TAU * fz * t).sin(),
            );
            orbit.push(t, PhaseSpaceCoord::new(position, Vector3::zeros()));
        }
        orbit
    }

    #[test]
    fn circular_orbit_is_commensurate() {
        let orbit = lissajous(4.0, 4.0, 0.0, 1024, 0.01);
        let result = SpectralEvaluator::planar(4).evaluate(&orbit).expect("evaluate");
        assert!((result.frequencies[0] - 4.0).abs() < 0.1);
        assert_eq!(result.ratios, vec![(1, 1)]);
        assert!(result.measure() > 0.99, "measure {}", result.measure());
    }

    #[test]
    fn spatial_projection_scores_every_pair() {
        let orbit = lissajous(3.0, 6.0, 9.0, 2048, 0.005);
        let result = SpectralEvaluator::spatial(4).evaluate(&orbit).expect("evaluate");
        assert_eq!(result.frequencies.len(), 3);
        assert_eq!(result.ratios, vec![(2, 1), (3, 1), (3, 2)]);
        assert!(result.measure() > 0.98);
    }

    #[test]
    fn incommensurate_orbit_scores_lower() {
        let locked = lissajous(4.0, 8.0, 0.0, 2048, 0.005);
        let free = lissajous(4.0, 4.0 * 2f64.sqrt() * 1.17, 0.0, 2048, 0.005);
        let evaluator = SpectralEvaluator::planar(2);
        let locked = evaluator.evaluate(&locked).expect("locked").measure();
        let free = evaluator.evaluate(&free).expect("free").measure();
        assert!(locked > free, "{locked} <= {free}");
    }

    #[test]
    fn degenerate_orbits_fail() {
        let planar = lissajous(4.0, 4.0, 0.0, 1024, 0.01);
        let err = SpectralEvaluator::spatial(4)
            .evaluate(&planar)
            .expect_err("flat z");
        assert!(err.to_string().contains("Axis 2 does not oscillate"));

        let short = lissajous(4.0, 4.0, 0.0, 4, 0.01);
        let err = SpectralEvaluator::planar(4)
            .evaluate(&short)
            .expect_err("too short");
        assert!(err.to_string().contains("at least 8 samples"));
    }

    #[test]
    fn names_follow_the_projection() {
        assert_eq!(SpectralEvaluator::planar(3).name(), "SpectralAnalysis2D");
        assert_eq!(SpectralEvaluator::spatial(3).name(), "SpectralAnalysis");
    }
}
