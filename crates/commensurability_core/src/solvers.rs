use crate::traits::{DynamicalSystem, Scalar, Steppable};

/// Classic Runge-Kutta 4th Order Solver
pub struct RK4<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Scalar> RK4<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::constant(0.0);
        Self {
            k1: vec![z; dim],
            k2: vec![z; dim],
            k3: vec![z; dim],
            k4: vec![z; dim],
            tmp: vec![z; dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for RK4<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let half = T::constant(0.5);
        let sixth = T::constant(1.0 / 6.0);
        let two = T::constant(2.0);

        let t0 = *t;

        // k1 = f(t, y)
        system.apply(t0, state, &mut self.k1);

        // k2 = f(t + dt/2, y + dt*k1/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k1[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k2);

        // k3 = f(t + dt/2, y + dt*k2/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k2[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k3);

        // k4 = f(t + dt, y + dt*k3)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k4);

        // y_next = y + dt/6 * (k1 + 2k2 + 2k3 + k4)
        for i in 0..state.len() {
            state[i] = state[i]
                + dt * sixth * (self.k1[i] + two * self.k2[i] + two * self.k3[i] + self.k4[i]);
        }

        *t = t0 + dt;
    }
}

// Tsitouras 5(4) tableau, fixed-step use of the 5th order weights.
const TSIT5_C: [f64; 6] = [0.0, 0.161, 0.327, 0.9, 0.980_025_540_904_509_7, 1.0];
const TSIT5_A: [[f64; 5]; 6] = [
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [0.161, 0.0, 0.0, 0.0, 0.0],
    [-0.008_480_655_492_356_989, 0.335_480_655_492_357, 0.0, 0.0, 0.0],
    [
        2.897_153_057_105_493,
        -6.359_448_489_975_075,
        4.362_295_432_869_581_5,
        0.0,
        0.0,
    ],
    [
        5.325_864_828_439_257,
        -11.748_883_564_062_828,
        7.495_539_342_889_836_5,
        -0.092_495_066_361_755_25,
        0.0,
    ],
    [
        5.861_455_442_946_42,
        -12.920_969_317_847_11,
        8.159_367_898_576_159,
        -0.071_584_973_281_401,
        -0.028_269_050_394_068_383,
    ],
];
const TSIT5_B: [f64; 6] = [
    0.096_460_766_818_065_23,
    0.01,
    0.479_889_650_414_499_6,
    1.379_008_574_103_742,
    -3.290_069_515_436_099,
    2.324_710_524_099_774,
];

/// Tsitouras 5/4 Solver
pub struct Tsit5<T: Scalar> {
    k: [Vec<T>; 6],
    tmp: Vec<T>,
}

impl<T: Scalar> Tsit5<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::constant(0.0);
        Self {
            k: std::array::from_fn(|_| vec![z; dim]),
            tmp: vec![z; dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for Tsit5<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let t0 = *t;

        system.apply(t0, state, &mut self.k[0]);
        for stage in 1..6 {
            for i in 0..state.len() {
                let mut incr = T::constant(0.0);
                for (j, &a) in TSIT5_A[stage][..stage].iter().enumerate() {
                    incr = incr + T::constant(a) * self.k[j][i];
                }
                self.tmp[i] = state[i] + dt * incr;
            }
            system.apply(t0 + T::constant(TSIT5_C[stage]) * dt, &self.tmp, &mut self.k[stage]);
        }

        for i in 0..state.len() {
            let mut incr = T::constant(0.0);
            for (j, &b) in TSIT5_B.iter().enumerate() {
                incr = incr + T::constant(b) * self.k[j][i];
            }
            state[i] = state[i] + dt * incr;
        }

        *t = t0 + dt;
    }
}

/// Kick-drift-kick leapfrog for separable second-order systems.
///
/// The state is laid out as `[q, v]` with equal halves and `dq/dt = v`.
/// Only the second half of `apply`'s output is read: `dv/dt` must depend on
/// `q` and `t` alone. Two force evaluations per step.
pub struct Leapfrog<T: Scalar> {
    deriv: Vec<T>,
}

impl<T: Scalar> Leapfrog<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            deriv: vec![T::constant(0.0); dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for Leapfrog<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let n = state.len() / 2;
        let half_dt = dt * T::constant(0.5);
        let t0 = *t;

        // kick
        system.apply(t0, state, &mut self.deriv);
        for i in 0..n {
            state[n + i] = state[n + i] + half_dt * self.deriv[n + i];
        }

        // drift with the half-step velocities
        for i in 0..n {
            state[i] = state[i] + dt * state[n + i];
        }

        // kick
        system.apply(t0 + dt, state, &mut self.deriv);
        for i in 0..n {
            state[n + i] = state[n + i] + half_dt * self.deriv[n + i];
        }

        *t = t0 + dt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unit harmonic oscillator, state [x, v].
    struct Oscillator;

    impl DynamicalSystem<f64> for Oscillator {
        fn dimension(&self) -> usize {
            2
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = x[1];
            out[1] = -x[0];
        }
    }

    fn run(stepper: &mut impl Steppable<f64>, steps: usize, dt: f64) -> (f64, [f64; 2]) {
        let mut t = 0.0;
        let mut state = [1.0, 0.0];
        for _ in 0..steps {
            stepper.step(&Oscillator, &mut t, &mut state, dt);
        }
        (t, state)
    }

    #[test]
    fn rk4_tracks_cosine() {
        let (t, state) = run(&mut RK4::new(2), 1000, 0.01);
        assert!((t - 10.0).abs() < 1e-9);
        assert!((state[0] - t.cos()).abs() < 1e-7);
        assert!((state[1] + t.sin()).abs() < 1e-7);
    }

    #[test]
    fn tsit5_tracks_cosine() {
        let (t, state) = run(&mut Tsit5::new(2), 1000, 0.01);
        assert!((state[0] - t.cos()).abs() < 1e-7);
        assert!((state[1] + t.sin()).abs() < 1e-7);
    }

    #[test]
    fn tsit5_converges_at_fifth_order() {
        // halving dt must cut the error by far more than the 4x of a second order method
        let error = |steps: usize, dt: f64| {
            let (t, state) = run(&mut Tsit5::new(2), steps, dt);
            (state[0] - t.cos()).hypot(state[1] + t.sin())
        };
        let coarse = error(100, 0.1);
        let fine = error(200, 0.05);
        assert!(coarse < 1e-7, "coarse error {coarse:e}");
        assert!(coarse / fine > 20.0, "error ratio {}", coarse / fine);
    }

    #[test]
    fn leapfrog_bounds_energy_error() {
        let (_, state) = run(&mut Leapfrog::new(2), 100_000, 0.05);
        let energy = 0.5 * (state[0] * state[0] + state[1] * state[1]);
        // symplectic: no secular drift, error stays O(dt^2)
        assert!((energy - 0.5).abs() < 1e-3);
    }

    #[test]
    fn leapfrog_evaluates_forces_twice_per_step() {
        struct Counting(std::cell::Cell<usize>);

        impl DynamicalSystem<f64> for Counting {
            fn dimension(&self) -> usize {
                2
            }

            fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
                self.0.set(self.0.get() + 1);
                Oscillator.apply(t, x, out);
            }
        }

        let system = Counting(std::cell::Cell::new(0));
        let mut stepper = Leapfrog::new(2);
        let (mut t, mut state) = (0.0, [1.0, 0.0]);
        for _ in 0..10 {
            stepper.step(&system, &mut t, &mut state, 0.01);
        }
        assert_eq!(system.0.get(), 20);
        assert!((state[0] - t.cos()).abs() < 1e-4);
    }

    #[test]
    fn tsit5_weights_are_consistent() {
        let sum: f64 = TSIT5_B.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        for (stage, row) in TSIT5_A.iter().enumerate() {
            let row_sum: f64 = row.iter().sum();
            assert!((row_sum - TSIT5_C[stage]).abs() < 1e-12, "stage {stage}");
        }
    }
}
