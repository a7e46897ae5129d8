use log::{debug, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Serialize, Deserialize};
use crate::error::Error;
use crate::model::{Draw, HierarchicalModel, Hyper, State};
use crate::prob;

/// Exact update of the model indicator and the subject-level probabilities.
mod gibbs;

pub use gibbs::*;

/// Metropolis-Hastings move between the two hypotheses.
mod jump;

pub use jump::*;

/// Hamiltonian transition for the continuous block, and warm-up step-size adaptation.
mod hmc;

pub use hmc::*;

/// Sampler settings. Every field has a default, so a settings file only
/// needs the entries it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {

    /// Number of retained draws (one per sweep after burn-in).
    pub n_draws : usize,

    /// Burn-in: number of sweeps run and discarded before the first retained draw.
    pub n_burnin : usize,

    pub seed : u64,

    /// How many independent chains sample_chains runs in parallel.
    pub n_chains : usize,

    /// Leapfrog step size (initial value when adaptation is enabled).
    pub step_size : f64,

    pub n_leap_steps : usize,

    /// Acceptance probability the step size is adapted toward during burn-in.
    pub target_accept : f64,

    pub adapt_step_size : bool,

    /// How many consecutive failed sweeps (a non-finite proposal, or a discrete
    /// update that could not be evaluated) are tolerated before sampling aborts.
    pub max_retries : usize,

    pub hyper : Hyper

}

impl Default for Settings {

    fn default() -> Self {
        Self {
            n_draws : 10000,
            n_burnin : 1000,
            seed : 47401,
            n_chains : 1,
            step_size : 0.05,
            n_leap_steps : 20,
            target_accept : 0.8,
            adapt_step_size : true,
            max_retries : 50,
            hyper : Hyper::default()
        }
    }

}

impl Settings {

    pub fn validate(&self) -> Result<(), Error> {
        if !prob::is_positive(self.step_size) {
            return Err(Error::ModelMisspecification(format!("step_size must be positive (got {})", self.step_size)));
        }
        if self.n_leap_steps == 0 {
            return Err(Error::ModelMisspecification("n_leap_steps must be at least 1".into()));
        }
        if !prob::is_open_unit(self.target_accept) {
            return Err(Error::ModelMisspecification(format!("target_accept must lie in (0, 1) (got {})", self.target_accept)));
        }
        if self.n_chains == 0 {
            return Err(Error::ModelMisspecification("n_chains must be at least 1".into()));
        }
        Ok(())
    }

}

/// Per-chain sampling statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainStats {

    /// Sweeps run, burn-in included.
    pub n_iterations : usize,

    /// Accepted continuous-block proposals among retained sweeps.
    pub n_accepted : usize,

    /// Sweeps with a rejected non-finite proposal or a failed discrete update, over the whole run.
    pub n_divergent : usize,

    /// Retained sweeps where the switch changed value.
    pub n_switch_flips : usize,

    /// Accepted between-hypothesis moves among retained sweeps.
    #[serde(default)]
    pub n_jumps : usize,

    /// Step size used for every retained sweep.
    pub step_size : f64

}

/// The output artifact of one chain: the retained draws, in iteration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {

    pub chain : usize,

    pub seed : u64,

    pub draws : Vec<Draw>,

    pub stats : ChainStats

}

impl Trace {

    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    pub fn acceptance_rate(&self) -> f64 {
        if self.draws.is_empty() {
            0.0
        } else {
            self.stats.n_accepted as f64 / self.draws.len() as f64
        }
    }

}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sweep {

    /// The between-hypothesis move was accepted.
    pub jumped : bool,

    /// Some update of the sweep could not be evaluated or was rejected as non-finite.
    pub failed : bool,

    pub transition : Transition

}

/// Composite sampler over the switch and the continuous parameters. Each sweep
/// runs three updates, each leaving the posterior invariant:
/// a Metropolis-Hastings move to the competing hypothesis (switch_jump), the
/// exact draw of the switch and of both subject-level branches given means and
/// concentrations (gibbs_switch), and one Hamiltonian transition over every
/// continuous parameter conditional on the switch.
pub struct Sampler<'a> {

    model : &'a HierarchicalModel,

    settings : Settings,

    rng : StdRng,

    state : State,

    step_size : f64,

    /// Consecutive failed sweeps.
    failures : usize

}

impl<'a> Sampler<'a> {

    pub fn new(model : &'a HierarchicalModel, settings : Settings) -> Result<Self, Error> {
        settings.validate()?;
        let rng = StdRng::seed_from_u64(settings.seed);
        let step_size = settings.step_size;
        let state = model.initial_state();
        Self { model, settings, rng, state, step_size, failures : 0 }.with_state(None)
    }

    /// Replaces the starting point of the chain. With None, only verifies that the
    /// current starting point has a finite density.
    pub fn with_state(mut self, state : Option<State>) -> Result<Self, Error> {
        if let Some(state) = state {
            if state.position.nrows() != self.model.layout().dim() {
                return Err(Error::ModelMisspecification(format!(
                    "Starting point has {} continuous parameters; the model has {}",
                    state.position.nrows(),
                    self.model.layout().dim()
                )));
            }
            self.state = state;
        }
        if !self.model.log_density(self.state.switch, &self.state.position, None).is_finite() {
            return Err(Error::NumericalInstability { iteration : 0, retries : 0 });
        }
        Ok(self)
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    /// One sweep: the between-hypothesis move, the exact switch update, then the
    /// continuous-block update. A failed update leaves its part of the state
    /// untouched and counts toward max_retries.
    pub fn sweep(&mut self, iteration : usize) -> Result<Sweep, Error> {
        let jump = switch_jump(self.model, &mut self.state, &mut self.rng);
        let drawn = gibbs_switch(self.model, &mut self.state, &mut self.rng);
        let model = self.model;
        let switch = self.state.switch;
        let transition = hmc_transition(
            &mut self.state.position,
            |q, grad| model.log_density(switch, q, grad),
            self.step_size,
            self.settings.n_leap_steps,
            &mut self.rng
        );
        let failed = jump.is_none() || !drawn || transition.divergent;
        if failed {
            self.failures += 1;
            debug!(
                "Failed sweep at iteration {} ({} in a row; jump {}, switch draw {}, divergent {})",
                iteration,
                self.failures,
                if jump.is_some() { "ok" } else { "failed" },
                if drawn { "ok" } else { "failed" },
                transition.divergent
            );
            if self.failures > self.settings.max_retries {
                return Err(Error::NumericalInstability { iteration, retries : self.settings.max_retries });
            }
        } else {
            self.failures = 0;
        }
        Ok(Sweep { jumped : jump.unwrap_or(false), failed, transition })
    }

    pub fn run(self) -> Result<Trace, Error> {
        self.run_with(|_, _| { })
    }

    /// Runs burn-in followed by n_draws retained sweeps. The callback is invoked
    /// after every sweep with the iteration index and, for retained sweeps, the
    /// draw being appended to the trace.
    pub fn run_with<F>(mut self, mut progress : F) -> Result<Trace, Error>
    where
        F : FnMut(usize, Option<&Draw>)
    {
        let (n_burnin, n_draws) = (self.settings.n_burnin, self.settings.n_draws);
        let layout = *self.model.layout();
        let mut adapter = if self.settings.adapt_step_size && n_burnin > 0 {
            Some(StepSizeAdapter::new(self.step_size, self.settings.target_accept))
        } else {
            None
        };
        let mut draws = Vec::with_capacity(n_draws);
        let mut stats = ChainStats::default();
        info!(
            "Sampling chain (seed {}): {} burn-in + {} draws over {} continuous parameters",
            self.settings.seed,
            n_burnin,
            n_draws,
            layout.dim()
        );

        for it in 0..(n_burnin + n_draws) {
            if let Some(a) = adapter.as_ref() {
                self.step_size = clamp_step(a.current());
            }
            let prev_switch = self.state.switch;
            let sweep = self.sweep(it)?;
            let tr = sweep.transition;
            stats.n_iterations += 1;
            if sweep.failed {
                stats.n_divergent += 1;
            }
            if it < n_burnin {
                if let Some(a) = adapter.as_mut() {
                    a.update(tr.accept_prob);
                }
                if it + 1 == n_burnin {
                    if let Some(a) = adapter.take() {
                        self.step_size = clamp_step(a.final_step());
                        debug!("Step size adapted to {:.5} after {} burn-in sweeps", self.step_size, n_burnin);
                    }
                }
                progress(it, None);
            } else {
                if tr.accepted {
                    stats.n_accepted += 1;
                }
                if self.state.switch != prev_switch {
                    stats.n_switch_flips += 1;
                }
                if sweep.jumped {
                    stats.n_jumps += 1;
                }
                let draw = self.state.to_draw(&layout);
                progress(it, Some(&draw));
                draws.push(draw);
            }
        }

        stats.step_size = self.step_size;
        let trace = Trace { chain : 0, seed : self.settings.seed, draws, stats };
        if trace.stats.n_divergent > 0 {
            warn!("Chain (seed {}) had {} failed sweeps", trace.seed, trace.stats.n_divergent);
        }
        info!(
            "Chain (seed {}) finished: acceptance {:.3}, step size {:.5}, {} switch flips ({} by jumps)",
            trace.seed,
            trace.acceptance_rate(),
            trace.stats.step_size,
            trace.stats.n_switch_flips,
            trace.stats.n_jumps
        );
        Ok(trace)
    }

}

fn clamp_step(step : f64) -> f64 {
    step.max(1E-6).min(10.0)
}

/// Runs settings.n_chains independent chains in parallel. Chain c is seeded with
/// seed + c and owns its own state and random stream; traces are returned in
/// chain order.
pub fn sample_chains(model : &HierarchicalModel, settings : &Settings) -> Result<Vec<Trace>, Error> {
    sample_chains_with(model, settings, |_, _| { })
}

/// As sample_chains, calling progress(chain, iteration) after every sweep of every chain.
pub fn sample_chains_with<F>(model : &HierarchicalModel, settings : &Settings, progress : F) -> Result<Vec<Trace>, Error>
where
    F : Fn(usize, usize) + Sync
{
    settings.validate()?;
    let progress = &progress;
    let results : Vec<Result<Trace, Error>> = std::thread::scope(|scope| {
        let handles : Vec<_> = (0..settings.n_chains)
            .map(|chain| {
                let mut chain_settings = settings.clone();
                chain_settings.seed = settings.seed.wrapping_add(chain as u64);
                scope.spawn(move || -> Result<Trace, Error> {
                    let mut trace = Sampler::new(model, chain_settings)?
                        .run_with(|it, _| progress(chain, it) )?;
                    trace.chain = chain;
                    Ok(trace)
                })
            })
            .collect();
        handles.into_iter()
            .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e) ) )
            .collect()
    });
    results.into_iter().collect()
}

#[cfg(test)]
fn toy_model() -> HierarchicalModel {
    let data = crate::sample::Data::load(&[0, 0, 0, 1, 1, 1], &[20; 6], &[12, 11, 13, 9, 10, 8]).unwrap();
    HierarchicalModel::new(data, Hyper::default()).unwrap()
}

#[test]
fn invalid_settings_are_rejected() {
    let model = toy_model();
    let settings = Settings { n_leap_steps : 0, ..Settings::default() };
    assert!(Sampler::new(&model, settings).is_err());
    let settings = Settings { step_size : -0.1, ..Settings::default() };
    assert!(Sampler::new(&model, settings).is_err());
    let settings = Settings { n_chains : 0, ..Settings::default() };
    assert!(sample_chains(&model, &settings).is_err());
}

#[test]
fn starting_point_must_match_layout() {
    let model = toy_model();
    let state = State { switch : crate::model::Switch::Shared, position : nalgebra::DVector::zeros(3) };
    let res = Sampler::new(&model, Settings::default()).unwrap().with_state(Some(state));
    assert!(matches!(res, Err(Error::ModelMisspecification(_))));
}

#[test]
fn run_emits_exactly_n_draws() {
    let model = toy_model();
    let settings = Settings { n_draws : 37, n_burnin : 13, ..Settings::default() };
    let mut n_seen = 0;
    let mut n_calls = 0;
    let trace = Sampler::new(&model, settings).unwrap()
        .run_with(|_, draw| {
            n_calls += 1;
            if draw.is_some() {
                n_seen += 1;
            }
        })
        .unwrap();
    assert_eq!(trace.len(), 37);
    assert_eq!(n_seen, 37);
    assert_eq!(n_calls, 50);
    assert_eq!(trace.stats.n_iterations, 50);
    assert!(trace.stats.step_size > 0.0);
}

#[test]
fn zero_retries_fail_on_first_non_finite_proposal() {
    let model = toy_model();
    // A step this large throws the leapfrog trajectory far outside the support.
    let settings = Settings {
        step_size : 10.0,
        n_leap_steps : 50,
        adapt_step_size : false,
        max_retries : 0,
        n_burnin : 0,
        n_draws : 200,
        ..Settings::default()
    };
    match Sampler::new(&model, settings).unwrap().run() {
        Err(Error::NumericalInstability { retries, .. }) => assert_eq!(retries, 0),
        other => panic!("Expected numerical instability, got {:?}", other.map(|t| t.len() ))
    }
}

#[test]
fn failed_switch_updates_count_against_retry_budget() {
    let model = toy_model();
    let settings = Settings { max_retries : 2, n_burnin : 0, ..Settings::default() };
    let mut sampler = Sampler::new(&model, settings).unwrap();
    // An infinite concentration leaves neither discrete update a finite weight.
    sampler.state.position[model.layout().concentration(0)] = 800.;
    let stuck = sampler.state.clone();
    for it in 0..2 {
        let sweep = sampler.sweep(it).unwrap();
        assert!(sweep.failed);
        assert!(!sweep.jumped);
        assert_eq!(sampler.state, stuck);
    }
    match sampler.sweep(2) {
        Err(Error::NumericalInstability { iteration, retries }) => {
            assert_eq!(iteration, 2);
            assert_eq!(retries, 2);
        },
        other => panic!("Expected numerical instability, got {:?}", other)
    }
}

#[test]
fn successful_sweep_resets_failure_count() {
    let model = toy_model();
    let settings = Settings { max_retries : 1, n_burnin : 0, step_size : 0.01, adapt_step_size : false, ..Settings::default() };
    let mut sampler = Sampler::new(&model, settings).unwrap();
    let good = sampler.state.clone();
    sampler.state.position[model.layout().concentration(1)] = 800.;
    assert!(sampler.sweep(0).unwrap().failed);
    sampler.state = good;
    assert!(!sampler.sweep(1).unwrap().failed);
    assert_eq!(sampler.failures, 0);
}
