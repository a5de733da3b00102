//! Phase-space coordinates, batched coordinate collections and integrated orbits.

use anyhow::{bail, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A Galactocentric Cartesian phase-space point: position in kpc, velocity in km/s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpaceCoord {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
}

impl PhaseSpaceCoord {
    pub fn new(position: Vector3<f64>, velocity: Vector3<f64>) -> Self {
        Self { position, velocity }
    }

    /// Builds a coordinate from cylindrical components (R, phi, z, vR, vT, vz).
    pub fn from_cylindrical(r: f64, phi: f64, z: f64, v_r: f64, v_t: f64, v_z: f64) -> Self {
        let (sin, cos) = phi.sin_cos();
        Self {
            position: Vector3::new(r * cos, r * sin, z),
            velocity: Vector3::new(v_r * cos - v_t * sin, v_r * sin + v_t * cos, v_z),
        }
    }

    /// Position and velocity packed as `[x, y, z, vx, vy, vz]`.
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.position.x,
            self.position.y,
            self.position.z,
            self.velocity.x,
            self.velocity.y,
            self.velocity.z,
        ]
    }
}

/// Several coordinates collapsed into one collection for a single backend call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordBatch {
    positions: Vec<Vector3<f64>>,
    velocities: Vec<Vector3<f64>>,
}

impl CoordBatch {
    /// Collapses per-pixel coordinates, preserving their order.
    pub fn collapse(coords: impl IntoIterator<Item = PhaseSpaceCoord>) -> Self {
        let (positions, velocities) = coords
            .into_iter()
            .map(|coord| (coord.position, coord.velocity))
            .unzip();
        Self {
            positions,
            velocities,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<PhaseSpaceCoord> {
        Some(PhaseSpaceCoord::new(
            *self.positions.get(index)?,
            *self.velocities.get(index)?,
        ))
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = PhaseSpaceCoord> + '_ {
        self.positions
            .iter()
            .zip(&self.velocities)
            .map(|(p, v)| PhaseSpaceCoord::new(*p, *v))
    }
}

/// A sampled trajectory. `times[i]` is in Gyr; the samples share the units of
/// [`PhaseSpaceCoord`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Orbit {
    pub times: Vec<f64>,
    pub positions: Vec<Vector3<f64>>,
    pub velocities: Vec<Vector3<f64>>,
}

impl Orbit {
    pub fn with_capacity(samples: usize) -> Self {
        Self {
            times: Vec::with_capacity(samples),
            positions: Vec::with_capacity(samples),
            velocities: Vec::with_capacity(samples),
        }
    }

    /// An orbit that never moves: `samples` copies of `coord`, one per `dt`.
    pub fn stationary(coord: PhaseSpaceCoord, dt: f64, samples: usize) -> Self {
        let mut orbit = Self::with_capacity(samples);
        for i in 0..samples {
            orbit.push(i as f64 * dt, coord);
        }
        orbit
    }

    pub fn push(&mut self, t: f64, coord: PhaseSpaceCoord) {
        self.times.push(t);
        self.positions.push(coord.position);
        self.velocities.push(coord.velocity);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn initial(&self) -> Option<PhaseSpaceCoord> {
        Some(PhaseSpaceCoord::new(
            *self.positions.first()?,
            *self.velocities.first()?,
        ))
    }

    /// Uniform sampling interval, if the orbit has at least two samples.
    pub fn sample_interval(&self) -> Result<f64> {
        if self.times.len() < 2 {
            bail!("Orbit has fewer than two samples.");
        }
        Ok(self.times[1] - self.times[0])
    }

    /// The time series of one Cartesian position axis (0 = x, 1 = y, 2 = z).
    pub fn axis(&self, axis: usize) -> Vec<f64> {
        self.positions.iter().map(|p| p[axis]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cylindrical_conversion_matches_cartesian() {
        let phi = std::f64::consts::FRAC_PI_2;
        let coord = PhaseSpaceCoord::from_cylindrical(2.0, phi, 0.5, 0.0, 200.0, 3.0);
        assert!(coord.position.x.abs() < 1e-12);
        assert!((coord.position.y - 2.0).abs() < 1e-12);
        assert_eq!(coord.position.z, 0.5);
        assert!((coord.velocity.x + 200.0).abs() < 1e-12);
        assert!(coord.velocity.y.abs() < 1e-12);
        assert_eq!(coord.velocity.z, 3.0);
    }

    #[test]
    fn collapse_preserves_order() {
        let coords: Vec<_> = (0..4)
            .map(|i| PhaseSpaceCoord::new(Vector3::new(i as f64, 0.0, 0.0), Vector3::zeros()))
            .collect();
        let batch = CoordBatch::collapse(coords.clone());
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.iter().collect::<Vec<_>>(), coords);
        assert_eq!(batch.get(2), Some(coords[2]));
        assert_eq!(batch.get(4), None);
    }

    #[test]
    fn axes_read_one_coordinate_per_sample() {
        let coord = PhaseSpaceCoord::new(Vector3::new(1.0, 2.0, 3.0), Vector3::zeros());
        let orbit = Orbit::stationary(coord, 0.1, 3);
        assert_eq!(orbit.axis(0), vec![1.0; 3]);
        assert_eq!(orbit.axis(2), vec![3.0; 3]);
        assert!((orbit.sample_interval().expect("interval") - 0.1).abs() < 1e-15);
    }
}
