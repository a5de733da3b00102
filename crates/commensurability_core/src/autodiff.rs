use crate::traits::Scalar;
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};

/// Simple Dual Number for Forward Mode AD
/// val: real part
/// eps: infinitesimal part
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Dual {
    pub val: f64,
    pub eps: f64,
}

impl Dual {
    pub fn new(val: f64, eps: f64) -> Self {
        Self { val, eps }
    }

    /// A variable seeded with unit tangent.
    pub fn variable(val: f64) -> Self {
        Self::new(val, 1.0)
    }
}

impl Add for Dual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.val + rhs.val, self.eps + rhs.eps)
    }
}

impl Sub for Dual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.val - rhs.val, self.eps - rhs.eps)
    }
}

impl Mul for Dual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.val * rhs.val, self.val * rhs.eps + self.eps * rhs.val)
    }
}

impl Div for Dual {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let denom = rhs.val * rhs.val;
        Self::new(
            self.val / rhs.val,
            (self.eps * rhs.val - self.val * rhs.eps) / denom,
        )
    }
}

impl Neg for Dual {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.val, -self.eps)
    }
}

impl Rem for Dual {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        // d/dx (x mod c) is 1 almost everywhere for a constant modulus.
        Self::new(self.val % rhs.val, self.eps)
    }
}

impl Scalar for Dual {
    fn constant(value: f64) -> Self {
        Self::new(value, 0.0)
    }

    fn value(self) -> f64 {
        self.val
    }

    fn powf(self, n: Self) -> Self {
        let val_pow = self.val.powf(n.val);
        // d(x^y) = x^y * (y' ln x + y x'/x); the ln term vanishes for constant exponents.
        let log_term = if n.eps == 0.0 { 0.0 } else { n.eps * self.val.ln() };
        let base_term = if self.eps == 0.0 {
            0.0
        } else {
            n.val * self.val.powf(n.val - 1.0) * self.eps
        };
        Self::new(val_pow, val_pow * log_term + base_term)
    }

    fn sqrt(self) -> Self {
        let s = self.val.sqrt();
        Self::new(s, self.eps / (2.0 * s))
    }

    fn sin(self) -> Self {
        Self::new(self.val.sin(), self.eps * self.val.cos())
    }

    fn cos(self) -> Self {
        Self::new(self.val.cos(), -self.eps * self.val.sin())
    }

    fn tan(self) -> Self {
        let t = self.val.tan();
        Self::new(t, self.eps * (1.0 + t * t))
    }

    fn atan(self) -> Self {
        Self::new(self.val.atan(), self.eps / (1.0 + self.val * self.val))
    }

    fn exp(self) -> Self {
        let e = self.val.exp();
        Self::new(e, e * self.eps)
    }

    fn ln(self) -> Self {
        Self::new(self.val.ln(), self.eps / self.val)
    }

    fn ln_1p(self) -> Self {
        Self::new(self.val.ln_1p(), self.eps / (1.0 + self.val))
    }

    fn abs(self) -> Self {
        Self::new(
            self.val.abs(),
            if self.val >= 0.0 { self.eps } else { -self.eps },
        )
    }
}

/// Gradient of a scalar field `f: R^N -> R` at `x`, one dual pass per component.
pub fn gradient<const N: usize, F>(x: [f64; N], mut f: F) -> [f64; N]
where
    F: FnMut(&[Dual; N]) -> Dual,
{
    let mut grad = [0.0; N];
    let mut dual_x = [Dual::constant(0.0); N];
    for j in 0..N {
        for i in 0..N {
            dual_x[i] = if i == j {
                Dual::variable(x[i])
            } else {
                Dual::constant(x[i])
            };
        }
        grad[j] = f(&dual_x).eps;
    }
    grad
}

#[cfg(test)]
mod tests {
    use super::{gradient, Dual};
    use crate::traits::Scalar;

    #[test]
    fn dual_chain_rule_matches_analytic_derivative() {
        // f(x) = sin(x^2) => f'(x) = 2x cos(x^2)
        let x = Dual::variable(0.7);
        let y = (x * x).sin();
        assert!((y.val - (0.49_f64).sin()).abs() < 1e-15);
        assert!((y.eps - 1.4 * (0.49_f64).cos()).abs() < 1e-14);
    }

    #[test]
    fn powf_with_constant_exponent_handles_zero_base_tangent() {
        let x = Dual::constant(0.0);
        let y = x.powf(Dual::constant(1.5));
        assert_eq!(y.eps, 0.0);
        assert!(!y.val.is_nan());
    }

    #[test]
    fn ln_1p_keeps_precision_for_small_arguments() {
        let x = Dual::variable(1e-10);
        let y = x.ln_1p();
        assert!((y.val - (1e-10 - 5e-21)).abs() < 1e-25);
        assert!((y.eps - 1.0 / (1.0 + 1e-10)).abs() < 1e-15);
    }

    #[test]
    fn gradient_of_inverse_distance() {
        let grad = gradient([3.0, 0.0, 4.0], |r| {
            let d = (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt();
            Dual::constant(-1.0) / d
        });
        // grad(-1/r) = r_vec / r^3
        assert!((grad[0] - 3.0 / 125.0).abs() < 1e-15);
        assert_eq!(grad[1], 0.0);
        assert!((grad[2] - 4.0 / 125.0).abs() < 1e-15);
    }
}
