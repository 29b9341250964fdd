use crate::traits::{DynamicalSystem, Scalar, Steppable};
use thiserror::Error;

fn constant<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap()
}

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
        let z = T::zero();
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
        let half = constant::<T>(0.5);
        let sixth = constant::<T>(1.0 / 6.0);
        let two = constant::<T>(2.0);
        let t0 = *t;

        system.apply(t0, state, &mut self.k1);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k1[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k2);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k2[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k3);

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

// Tsitouras 5(4) tableau.
const C: [f64; 5] = [0.161, 0.327, 0.9, 0.9800255409045097, 1.0];
const A: [[f64; 6]; 6] = [
    [0.161, 0.0, 0.0, 0.0, 0.0, 0.0],
    [-0.008480655492356989, 0.335480655492357, 0.0, 0.0, 0.0, 0.0],
    [2.898, -6.359447987781783, 4.361447987781783, 0.0, 0.0, 0.0],
    [
        5.325864858437957,
        -11.748883564062828,
        7.495539342889693,
        -0.09249506636030195,
        0.0,
        0.0,
    ],
    [
        5.86145544294642,
        -12.92096931784711,
        8.159367898576159,
        -0.071584973281401,
        -0.02826857949054663,
        0.0,
    ],
    [
        0.09646076681806523,
        0.01,
        0.4798896504144996,
        1.379008574103742,
        -3.290069515436099,
        2.324710524099774,
    ],
];
/// Difference between the 5th and embedded 4th order weights, over k1..k7.
const BTILDE: [f64; 7] = [
    -0.00178001105222577714,
    -0.0008164344596567469,
    0.007880878010261995,
    -0.1447110071732629,
    0.5823571654525552,
    -0.45808210592918697,
    1.0 / 66.0,
];

/// Tsitouras 5/4 Solver
///
/// As a [`Steppable`] it takes fixed steps; [`Tsit5::attempt`] also returns the
/// embedded error estimate for [`AdaptiveTsit5`].
pub struct Tsit5<T: Scalar> {
    k: [Vec<T>; 7],
    tmp: Vec<T>,
    next: Vec<T>,
}

impl<T: Scalar> Tsit5<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k: std::array::from_fn(|_| vec![z; dim]),
            tmp: vec![z; dim],
            next: vec![z; dim],
        }
    }

    /// Runs the six stages from `(t0, state)` and writes the 5th order solution
    /// into `self.next`.
    fn stages(&mut self, system: &impl DynamicalSystem<T>, t0: T, state: &[T], dt: T) {
        let n = state.len();
        system.apply(t0, state, &mut self.k[0]);
        for stage in 1..6 {
            let row = &A[stage - 1];
            for i in 0..n {
                let mut acc = T::zero();
                for (j, &a) in row.iter().enumerate().take(stage) {
                    acc = acc + constant::<T>(a) * self.k[j][i];
                }
                self.tmp[i] = state[i] + dt * acc;
            }
            system.apply(t0 + constant::<T>(C[stage - 1]) * dt, &self.tmp, &mut self.k[stage]);
        }
        let weights = &A[5];
        for i in 0..n {
            let mut acc = T::zero();
            for (j, &b) in weights.iter().enumerate() {
                acc = acc + constant::<T>(b) * self.k[j][i];
            }
            self.next[i] = state[i] + dt * acc;
        }
    }

    /// One trial step of size `dt`. Writes the candidate into `out` and returns
    /// the RMS error norm scaled by `atol + rtol * max(|y|, |y_next|)`; a norm of
    /// at most one means the step is acceptable.
    pub fn attempt(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t0: T,
        state: &[T],
        dt: T,
        tolerances: (T, T),
        out: &mut [T],
    ) -> T {
        let (rtol, atol) = tolerances;
        self.stages(system, t0, state, dt);
        // FSAL stage at the candidate point.
        system.apply(t0 + dt, &self.next, &mut self.k[6]);

        let n = state.len();
        let mut sum = T::zero();
        for i in 0..n {
            let mut err = T::zero();
            for (j, &e) in BTILDE.iter().enumerate() {
                err = err + constant::<T>(e) * self.k[j][i];
            }
            let err = dt * err;
            let scale = atol + rtol * state[i].abs().max(self.next[i].abs());
            let ratio = err / scale;
            sum = sum + ratio * ratio;
            out[i] = self.next[i];
        }
        if n == 0 {
            return T::zero();
        }
        (sum / constant::<T>(n as f64)).sqrt()
    }
}

impl<T: Scalar> Steppable<T> for Tsit5<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let t0 = *t;
        self.stages(system, t0, state, dt);
        state.copy_from_slice(&self.next);
        *t = t0 + dt;
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepFailure {
    #[error("state became non-finite at t = {0}")]
    NonFinite(f64),
    #[error("step size underflow at t = {0}")]
    StepUnderflow(f64),
    #[error("exceeded {0} steps")]
    StepLimit(usize),
}

/// Step-size controller settings for [`AdaptiveTsit5`].
#[derive(Debug, Clone, Copy)]
pub struct StepControl<T: Scalar> {
    pub rtol: T,
    pub atol: T,
    pub safety: T,
    pub min_factor: T,
    pub max_factor: T,
    pub max_steps: usize,
}

impl<T: Scalar> StepControl<T> {
    pub fn new(rtol: T, atol: T, max_steps: usize) -> Self {
        Self {
            rtol,
            atol,
            safety: constant(0.9),
            min_factor: constant(0.2),
            max_factor: constant(5.0),
            max_steps,
        }
    }
}

/// Error-controlled Tsit5 integration between output times.
pub struct AdaptiveTsit5<T: Scalar> {
    stepper: Tsit5<T>,
    control: StepControl<T>,
    candidate: Vec<T>,
    /// Magnitude of the last accepted step size, reused as the next guess.
    h: T,
    steps: usize,
}

impl<T: Scalar> AdaptiveTsit5<T> {
    pub fn new(dim: usize, control: StepControl<T>) -> Self {
        Self {
            stepper: Tsit5::new(dim),
            control,
            candidate: vec![T::zero(); dim],
            h: T::zero(),
            steps: 0,
        }
    }

    /// Accepted plus rejected trial steps so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Integrates from `*t` to `t_end` (either direction) with step magnitudes
    /// no larger than `h_max`.
    pub fn advance(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: &mut T,
        state: &mut [T],
        t_end: T,
        h_max: T,
    ) -> Result<(), StepFailure> {
        let span = t_end - *t;
        if span == T::zero() {
            return Ok(());
        }
        let direction = span.signum();
        let h_max = h_max.abs().min(span.abs());
        if self.h <= T::zero() || self.h > h_max {
            self.h = h_max;
        }
        let tolerances = (self.control.rtol, self.control.atol);
        let floor = T::epsilon() * constant(16.0) * (t.abs() + T::one());

        while (t_end - *t) * direction > T::zero() {
            if self.steps >= self.control.max_steps {
                return Err(StepFailure::StepLimit(self.control.max_steps));
            }
            self.steps += 1;

            let remaining = (t_end - *t).abs();
            let h = self.h.min(remaining);
            let error = self.stepper.attempt(
                system,
                *t,
                state,
                h * direction,
                tolerances,
                &mut self.candidate,
            );
            let time = t.to_f64().unwrap_or(f64::NAN);
            if !error.is_finite() || self.candidate.iter().any(|value| !value.is_finite()) {
                // Retry smaller before declaring the state non-finite.
                if h <= floor {
                    return Err(StepFailure::NonFinite(time));
                }
                self.h = h * self.control.min_factor;
                continue;
            }

            let factor = if error == T::zero() {
                self.control.max_factor
            } else {
                (self.control.safety * error.powf(constant(-0.2)))
                    .max(self.control.min_factor)
                    .min(self.control.max_factor)
            };
            if error <= T::one() {
                *t = if h == remaining { t_end } else { *t + h * direction };
                state.copy_from_slice(&self.candidate);
                self.h = (h * factor).min(h_max);
            } else {
                self.h = h * factor;
                if self.h <= floor {
                    return Err(StepFailure::StepUnderflow(time));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::FnSystem;

    fn exponential() -> FnSystem<impl Fn(f64, &[f64], &mut [f64])> {
        FnSystem::new(1, |_t: f64, y: &[f64], out: &mut [f64]| out[0] = y[0])
    }

    #[test]
    fn error_weights_sum_to_zero() {
        let total: f64 = BTILDE.iter().sum();
        assert!(total.abs() < 1e-12, "btilde sums to {total}");
    }

    #[test]
    fn rk4_exponential_growth() {
        let system = exponential();
        let mut solver = RK4::new(1);
        let mut t = 0.0;
        let mut y = [1.0];
        for _ in 0..400 {
            solver.step(&system, &mut t, &mut y, 1.0 / 400.0);
        }
        assert!((t - 1.0).abs() < 1e-12);
        assert!((y[0] - std::f64::consts::E).abs() < 1e-4, "y(1) = {}", y[0]);
    }

    #[test]
    fn tsit5_fixed_step_is_accurate() {
        let system = exponential();
        let mut solver = Tsit5::new(1);
        let mut t = 0.0;
        let mut y = [1.0];
        for _ in 0..20 {
            solver.step(&system, &mut t, &mut y, 0.05);
        }
        assert!((y[0] - std::f64::consts::E).abs() < 1e-8, "y(1) = {}", y[0]);
    }

    #[test]
    fn adaptive_meets_tolerance_with_few_steps() {
        let system = exponential();
        let mut solver = AdaptiveTsit5::new(1, StepControl::new(1e-8, 1e-10, 10_000));
        let mut t = 0.0;
        let mut y = [1.0];
        solver
            .advance(&system, &mut t, &mut y, 1.0, 1.0)
            .expect("integration should succeed");
        assert_eq!(t, 1.0);
        assert!((y[0] - std::f64::consts::E).abs() < 1e-6, "y(1) = {}", y[0]);
        assert!(solver.steps() < 100, "took {} steps", solver.steps());
    }

    #[test]
    fn adaptive_integrates_backwards() {
        let system = exponential();
        let mut solver = AdaptiveTsit5::new(1, StepControl::new(1e-8, 1e-10, 10_000));
        let mut t = 0.0;
        let mut y = [1.0];
        solver
            .advance(&system, &mut t, &mut y, -1.0, 0.5)
            .expect("integration should succeed");
        assert!((y[0] - (-1f64).exp()).abs() < 1e-6, "y(-1) = {}", y[0]);
    }

    #[test]
    fn adaptive_reports_blow_up() {
        // y' = y^2, y(0) = 1 blows up at t = 1.
        let system = FnSystem::new(1, |_t: f64, y: &[f64], out: &mut [f64]| out[0] = y[0] * y[0]);
        let mut solver = AdaptiveTsit5::new(1, StepControl::new(1e-6, 1e-9, 5_000));
        let mut t = 0.0;
        let mut y = [1.0];
        let result = solver.advance(&system, &mut t, &mut y, 2.0, 0.1);
        assert!(result.is_err(), "blow-up should not integrate past t = 1");
        assert!(t < 1.0);
    }
}
