//! Canonical units and the adapter that normalizes user inputs into them.
//!
//! Internally lengths are kpc, velocities km/s, times Gyr and angular
//! velocities km/s/kpc. Integrators work in kpc and Gyr and use the factors
//! below to move between km/s and kpc/Gyr.

use serde::{Deserialize, Serialize};

/// 1 km/s expressed in kpc/Gyr.
pub const KMS_TO_KPC_PER_GYR: f64 = 1.022_712_165_053_708;

/// Gravitational constant in kpc (km/s)^2 / Msun.
pub const G: f64 = 4.300_917_270_036_279e-6;

/// A unit that converts linearly into its canonical unit.
pub trait Unit: Copy {
    /// Multiplier taking a value in `self` to the canonical unit.
    fn to_canonical(self) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    #[serde(rename = "Gyr")]
    Gyr,
    #[serde(rename = "Myr")]
    Myr,
    #[serde(rename = "kyr")]
    Kyr,
    #[serde(rename = "yr")]
    Yr,
}

impl Unit for TimeUnit {
    fn to_canonical(self) -> f64 {
        match self {
            TimeUnit::Gyr => 1.0,
            TimeUnit::Myr => 1e-3,
            TimeUnit::Kyr => 1e-6,
            TimeUnit::Yr => 1e-9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AngularVelocityUnit {
    /// km/s/kpc, the canonical unit.
    #[serde(rename = "km/s/kpc")]
    KmPerSPerKpc,
    /// rad/Gyr.
    #[serde(rename = "rad/Gyr")]
    RadPerGyr,
    /// rad/Myr.
    #[serde(rename = "rad/Myr")]
    RadPerMyr,
}

impl Unit for AngularVelocityUnit {
    fn to_canonical(self) -> f64 {
        match self {
            AngularVelocityUnit::KmPerSPerKpc => 1.0,
            AngularVelocityUnit::RadPerGyr => 1.0 / KMS_TO_KPC_PER_GYR,
            AngularVelocityUnit::RadPerMyr => 1e3 / KMS_TO_KPC_PER_GYR,
        }
    }
}

/// A bare scalar (already canonical) or a value tagged with its unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity<U> {
    Scalar(f64),
    Dimensioned { value: f64, unit: U },
}

impl<U: Unit> Quantity<U> {
    pub fn new(value: f64, unit: U) -> Self {
        Quantity::Dimensioned { value, unit }
    }

    /// The value in canonical units. Scalars pass through untouched.
    pub fn canonical(self) -> f64 {
        match self {
            Quantity::Scalar(value) => value,
            Quantity::Dimensioned { value, unit } => value * unit.to_canonical(),
        }
    }
}

impl<U> From<f64> for Quantity<U> {
    fn from(value: f64) -> Self {
        Quantity::Scalar(value)
    }
}

impl<U: Unit> Default for Quantity<U> {
    fn default() -> Self {
        Quantity::Scalar(0.0)
    }
}

pub type Time = Quantity<TimeUnit>;
pub type AngularVelocity = Quantity<AngularVelocityUnit>;

/// Normalizes a scalar or dimensioned input into canonical units.
pub fn make_quantity<U: Unit>(input: impl Into<Quantity<U>>) -> f64 {
    input.into().canonical()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_pass_through() {
        assert_eq!(make_quantity::<TimeUnit>(0.25), 0.25);
        assert_eq!(make_quantity::<AngularVelocityUnit>(30.0), 30.0);
    }

    #[test]
    fn dimensioned_inputs_convert() {
        let dt = Time::new(2.0, TimeUnit::Myr);
        assert!((dt.canonical() - 0.002).abs() < 1e-18);

        // 1 rad/Gyr is just under 1 km/s/kpc.
        let omega = AngularVelocity::new(KMS_TO_KPC_PER_GYR, AngularVelocityUnit::RadPerGyr);
        assert!((omega.canonical() - 1.0).abs() < 1e-15);
    }

    #[test]
    fn quantities_deserialize_from_scalar_or_table() {
        let scalar: Time = serde_json::from_str("0.001").expect("scalar");
        assert_eq!(scalar, Time::Scalar(0.001));
        let tagged: Time =
            serde_json::from_str(r#"{"value": 1.0, "unit": "Myr"}"#).expect("tagged");
        assert_eq!(tagged, Time::new(1.0, TimeUnit::Myr));
    }
}
