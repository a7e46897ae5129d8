/* Transition adapted from mcmclib (Keith O'hara), which released the original C++ implementation via Apache 2.0 */

use nalgebra::DVector;
use rand::Rng;
use rand_distr::StandardNormal;

/// Result of a single Hamiltonian transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {

    pub accepted : bool,

    /// Metropolis acceptance probability min(1, e^{-dH}); zero for divergent proposals.
    pub accept_prob : f64,

    /// The trajectory reached a point where the log-density (or its energy) was not finite.
    pub divergent : bool

}

fn fill_with_std_normal<R : Rng>(v : &mut DVector<f64>, rng : &mut R) {
    for x in v.iter_mut() {
        *x = rng.sample(StandardNormal);
    }
}

/// One Hamiltonian Monte Carlo transition with identity mass matrix, leaving the
/// density behind log_kernel invariant. The kernel receives the position and an
/// optional gradient buffer to overwrite, and returns the log-density.
/// Divergent trajectories are rejected and position is left untouched; on
/// acceptance position holds the end point of the leapfrog trajectory.
pub fn hmc_transition<R, F>(
    position : &mut DVector<f64>,
    log_kernel : F,
    step_size : f64,
    n_leap_steps : usize,
    rng : &mut R
) -> Transition
where
    R : Rng,
    F : Fn(&DVector<f64>, Option<&mut DVector<f64>>) -> f64
{
    let n_vals = position.nrows();
    let mut grad = DVector::zeros(n_vals);
    let mut mntm = DVector::zeros(n_vals);
    fill_with_std_normal(&mut mntm, rng);
    let z : f64 = rng.gen();

    let prev_lp = log_kernel(&*position, Some(&mut grad));
    let divergent = Transition { accepted : false, accept_prob : 0.0, divergent : true };
    if !prev_lp.is_finite() {
        return divergent;
    }
    let prev_h = -prev_lp + mntm.dot(&mntm) / 2.0;

    let mut new_draw = position.clone();
    let mut prop_lp = prev_lp;
    for _ in 0..n_leap_steps {
        mntm.axpy(step_size / 2.0, &grad, 1.0);
        new_draw.axpy(step_size, &mntm, 1.0);
        prop_lp = log_kernel(&new_draw, Some(&mut grad));
        if !prop_lp.is_finite() {
            return divergent;
        }
        mntm.axpy(step_size / 2.0, &grad, 1.0);
    }
    let prop_h = -prop_lp + mntm.dot(&mntm) / 2.0;
    if !prop_h.is_finite() {
        return divergent;
    }

    let comp_val = (prev_h - prop_h).min(0.0);
    let accept_prob = comp_val.exp();
    if z < accept_prob {
        position.copy_from(&new_draw);
        Transition { accepted : true, accept_prob, divergent : false }
    } else {
        Transition { accepted : false, accept_prob, divergent : false }
    }
}

/// Dual-averaging step-size adaptation (Hoffman & Gelman, 2014, section 3.2).
/// Fed with the acceptance probability of every warm-up transition, it drives
/// the average acceptance toward target; final_step() yields the averaged step size
/// that should be frozen once warm-up ends.
#[derive(Debug, Clone)]
pub struct StepSizeAdapter {
    target : f64,
    mu : f64,
    log_step : f64,
    log_step_bar : f64,
    h_bar : f64,
    t : f64
}

impl StepSizeAdapter {

    const GAMMA : f64 = 0.05;

    const T0 : f64 = 10.0;

    const KAPPA : f64 = 0.75;

    pub fn new(initial_step : f64, target : f64) -> Self {
        Self {
            target,
            mu : (10. * initial_step).ln(),
            log_step : initial_step.ln(),
            log_step_bar : initial_step.ln(),
            h_bar : 0.0,
            t : 0.0
        }
    }

    /// Step size to use for the next warm-up transition.
    pub fn current(&self) -> f64 {
        self.log_step.exp()
    }

    pub fn update(&mut self, accept_prob : f64) {
        self.t += 1.0;
        let w = 1. / (self.t + Self::T0);
        self.h_bar = (1. - w) * self.h_bar + w * (self.target - accept_prob);
        self.log_step = self.mu - self.t.sqrt() / Self::GAMMA * self.h_bar;
        let eta = self.t.powf(-Self::KAPPA);
        self.log_step_bar = eta * self.log_step + (1. - eta) * self.log_step_bar;
    }

    pub fn final_step(&self) -> f64 {
        self.log_step_bar.exp()
    }

}

#[cfg(test)]
fn std_normal_kernel(x : &DVector<f64>, grad : Option<&mut DVector<f64>>) -> f64 {
    if let Some(g) = grad {
        g.copy_from(&(-x));
    }
    -x.dot(x) / 2.0
}

#[test]
fn hmc_recovers_standard_normal_moments() {
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(11);
    let mut x = DVector::from_element(3, 2.0);
    let (mut sum, mut sum_sq, mut n_accept) = (0.0, 0.0, 0);
    let n = 4000;
    for _ in 0..n {
        let tr = hmc_transition(&mut x, std_normal_kernel, 0.3, 10, &mut rng);
        if tr.accepted {
            n_accept += 1;
        }
        sum += x[0];
        sum_sq += x[0] * x[0];
    }
    let mean = sum / n as f64;
    let var = sum_sq / n as f64 - mean * mean;
    assert!(mean.abs() < 0.15, "mean = {}", mean);
    assert!((var - 1.0).abs() < 0.25, "var = {}", var);
    assert!(n_accept as f64 / n as f64 > 0.8);
}

#[test]
fn divergent_proposal_keeps_position() {
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(3);
    let kernel = |x : &DVector<f64>, grad : Option<&mut DVector<f64>>| {
        if let Some(g) = grad {
            g.fill(1.0);
        }
        if x[0] > 0.5 { f64::NEG_INFINITY } else { x[0] }
    };
    let mut x = DVector::from_element(1, 0.49);
    let mut saw_divergence = false;
    for _ in 0..50 {
        let tr = hmc_transition(&mut x, &kernel, 0.5, 5, &mut rng);
        if tr.divergent {
            saw_divergence = true;
            assert!(!tr.accepted);
        }
        assert!(x[0] <= 0.5);
    }
    assert!(saw_divergence);
}

#[test]
fn adapter_shrinks_step_when_acceptance_is_low() {
    let mut adapter = StepSizeAdapter::new(1.0, 0.8);
    for _ in 0..200 {
        adapter.update(0.1);
    }
    assert!(adapter.final_step() < 1.0);
    let mut adapter = StepSizeAdapter::new(0.01, 0.8);
    for _ in 0..200 {
        adapter.update(1.0);
    }
    assert!(adapter.final_step() > 0.01);
}
