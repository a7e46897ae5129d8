use nalgebra::DVector;
use serde::{Serialize, Deserialize};
use std::fmt::{self, Display};
use crate::error::Error;
use crate::prob::{self, Beta, Gamma, Univariate};
use crate::sample::Data;

/// Switch, parameter layout, chain state and emitted draw.
mod state;

pub use state::*;

/// Fixed constants of the hierarchical model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyper {

    /// Shape of the Gamma prior over each group concentration.
    pub shape_gamma : f64,

    /// Rate of the Gamma prior over each group concentration.
    pub rate_gamma : f64,

    /// First Beta parameter of the prior over shared_mean and every group_mean.
    pub mean_prior_a : f64,

    /// Second Beta parameter of the prior over shared_mean and every group_mean.
    pub mean_prior_b : f64,

    /// Prior probability that the switch selects H0 (shared mean).
    pub prior_shared : f64

}

impl Default for Hyper {

    fn default() -> Self {
        Self {
            shape_gamma : 1.0,
            rate_gamma : 0.1,
            mean_prior_a : 1.0,
            mean_prior_b : 1.0,
            prior_shared : 0.5
        }
    }

}

impl Hyper {

    pub fn concentration_prior(&self) -> Gamma {
        Gamma::new(self.shape_gamma, self.rate_gamma)
    }

    pub fn mean_prior(&self) -> Beta {
        Beta::new(self.mean_prior_a, self.mean_prior_b)
    }

    /// Log prior mass of the informed switch value.
    pub fn switch_log_prior(&self, switch : Switch) -> f64 {
        match switch {
            Switch::Distinct => (1. - self.prior_shared).ln(),
            Switch::Shared => self.prior_shared.ln()
        }
    }

    fn validate(&self) -> Result<(), Error> {
        let positive = [
            ("shape_gamma", self.shape_gamma),
            ("rate_gamma", self.rate_gamma),
            ("mean_prior_a", self.mean_prior_a),
            ("mean_prior_b", self.mean_prior_b)
        ];
        for (name, v) in positive.iter() {
            if !prob::is_positive(*v) {
                return Err(Error::ModelMisspecification(format!("{} must be positive and finite (got {})", name, v)));
            }
        }
        if !prob::is_open_unit(self.prior_shared) {
            return Err(Error::ModelMisspecification(format!("prior_shared must lie in (0, 1) (got {})", self.prior_shared)));
        }
        Ok(())
    }

}

/// Per-(branch, group) quantities shared by every subject of the group.
struct GroupTerms {
    mean : f64,
    conc : f64,
    a : f64,
    b : f64,
    ln_norm : f64,
    psi_a : f64,
    psi_b : f64,
    psi_conc : f64
}

impl GroupTerms {

    fn new(mean : f64, conc : f64, with_grad : bool) -> Self {
        let beta = Beta::from_mean(mean, conc);
        let (psi_a, psi_b, psi_conc) = if with_grad {
            (prob::digamma(beta.a), prob::digamma(beta.b), prob::digamma(conc))
        } else {
            (0., 0., 0.)
        };
        Self { mean, conc, a : beta.a, b : beta.b, ln_norm : beta.ln_norm(), psi_a, psi_b, psi_conc }
    }

}

/// Joint model over both hypotheses, unified by the switch:
///
/// concentration[g] ~ Gamma(shape, rate)
/// shared_mean ~ Beta(1, 1); group_mean[g] ~ Beta(1, 1)
/// prob_h0[i] ~ Beta(shared_mean * concentration[g], (1 - shared_mean) * concentration[g])
/// prob_h1[i] ~ Beta(group_mean[g] * concentration[g], (1 - group_mean[g]) * concentration[g])
/// switch ~ Categorical(1 - prior_shared, prior_shared)
/// n_correct[i] ~ Binomial(n_trials[i], prob_h1[i] if switch == 0 else prob_h0[i])
///
/// Both subject-level branches are always instantiated and always carry
/// their prior density; only the likelihood depends on the switch.
#[derive(Debug, Clone)]
pub struct HierarchicalModel {

    data : Data,

    hyper : Hyper,

    layout : Layout,

    /// log C(n_trials, n_correct), per subject.
    log_coefs : Vec<f64>

}

impl HierarchicalModel {

    pub fn new(data : Data, hyper : Hyper) -> Result<Self, Error> {
        if data.n_groups() == 0 || data.n_subjects() == 0 {
            return Err(Error::ModelMisspecification(format!(
                "Model requires at least one group and one subject (got {} groups, {} subjects)",
                data.n_groups(),
                data.n_subjects()
            )));
        }
        hyper.validate()?;
        let layout = Layout::new(data.n_groups(), data.n_subjects());
        let log_coefs = data.subjects().iter()
            .map(|s| prob::log_binomial_coef(s.n_trials, s.n_correct) )
            .collect();
        Ok(Self { data, hyper, layout, log_coefs })
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    pub fn hyper(&self) -> &Hyper {
        &self.hyper
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Binomial log-likelihood of all observed counts, when subject i succeeds
    /// with probability probs[i].
    pub fn log_likelihood(&self, probs : &[f64]) -> f64 {
        self.data.subjects().iter()
            .zip(probs.iter())
            .map(|(s, p)| prob::binomial_log_prob(s.n_correct, s.n_trials, *p) )
            .sum()
    }

    /// Beta prior of the subject-level probabilities of group g under the
    /// informed branch, read from position.
    pub fn subject_prior(&self, position : &DVector<f64>, branch : Switch, g : usize) -> Beta {
        let l = &self.layout;
        Beta::from_mean(prob::sigmoid(position[l.mean(branch, g)]), position[l.concentration(g)].exp())
    }

    /// Log-likelihood of all observations when the informed branch is active,
    /// with every subject-level probability of that branch integrated out: each
    /// count is beta-binomial around its group's branch mean and concentration.
    pub fn marginal_log_likelihood(&self, position : &DVector<f64>, branch : Switch) -> f64 {
        self.data.subjects().iter()
            .map(|s| {
                let beta = self.subject_prior(position, branch, s.group);
                prob::beta_binomial_log_prob(s.n_correct, s.n_trials, beta.a, beta.b)
            })
            .sum()
    }

    /// Unnormalized log-probability of each switch value given the means and
    /// concentrations, with the subject-level probabilities of both branches
    /// integrated out, indexed by Switch::index(): log prior(switch) + the
    /// marginal log-likelihood of the correspondingly-active branch. The
    /// inactive branch integrates to one, so it does not enter.
    pub fn log_switch_weights(&self, position : &DVector<f64>) -> [f64; 2] {
        let mut w = [0.; 2];
        for s in Switch::ALL.iter() {
            w[s.index() as usize] = self.hyper.switch_log_prior(*s) + self.marginal_log_likelihood(position, *s);
        }
        w
    }

    /// Log-density of every continuous parameter conditional on the switch and
    /// the data, on the unconstrained scale (log-Jacobians of the log and logit
    /// transforms included), up to a constant. When grad is informed, it is
    /// overwritten with the gradient with respect to position. Returns negative
    /// infinity when any transformed value falls on or outside its support boundary.
    pub fn log_density(&self, switch : Switch, position : &DVector<f64>, mut grad : Option<&mut DVector<f64>>) -> f64 {
        let l = &self.layout;
        let with_grad = grad.is_some();
        if let Some(g) = grad.as_mut() {
            g.fill(0.);
        }

        let conc_prior = self.hyper.concentration_prior();
        let mean_prior = self.hyper.mean_prior();
        let mut lp = 0.0;

        let mut conc = Vec::with_capacity(l.n_groups);
        for g in 0..l.n_groups {
            let u = position[l.concentration(g)];
            let c = u.exp();
            if !conc_prior.in_support(c) {
                return f64::NEG_INFINITY;
            }
            lp += conc_prior.log_prob(c) + u;
            if let Some(gr) = grad.as_mut() {
                gr[l.concentration(g)] += conc_prior.shape - conc_prior.rate * c;
            }
            conc.push(c);
        }

        let mean_ixs : Vec<usize> = std::iter::once(l.shared_mean())
            .chain((0..l.n_groups).map(|g| l.group_mean(g) ))
            .collect();
        let mut means = Vec::with_capacity(mean_ixs.len());
        for ix in mean_ixs.iter() {
            let v = position[*ix];
            let m = prob::sigmoid(v);
            if !prob::is_open_unit(m) {
                return f64::NEG_INFINITY;
            }
            let (ln_m, ln_1mm) = (prob::ln_sigmoid(v), prob::ln_one_minus_sigmoid(v));
            lp += mean_prior.log_prob_ln(ln_m, ln_1mm) + ln_m + ln_1mm;
            if let Some(gr) = grad.as_mut() {
                gr[*ix] += mean_prior.a * (1. - m) - mean_prior.b * m;
            }
            means.push(m);
        }

        for branch in Switch::ALL.iter() {
            let terms : Vec<GroupTerms> = (0..l.n_groups)
                .map(|g| {
                    let m = match branch {
                        Switch::Shared => means[0],
                        Switch::Distinct => means[1 + g]
                    };
                    GroupTerms::new(m, conc[g], with_grad)
                })
                .collect();
            let active = *branch == switch;
            for (i, s) in self.data.subjects().iter().enumerate() {
                let t = &terms[s.group];
                let ix = l.prob(*branch, i);
                let v = position[ix];
                let theta = prob::sigmoid(v);
                if !prob::is_open_unit(theta) {
                    return f64::NEG_INFINITY;
                }
                let (ln_t, ln_1mt) = (prob::ln_sigmoid(v), prob::ln_one_minus_sigmoid(v));

                // Beta prior plus the logit Jacobian ln t + ln(1 - t).
                lp += t.a * ln_t + t.b * ln_1mt - t.ln_norm;
                let (k, nk) = if active {
                    (s.n_correct as f64, s.n_wrong() as f64)
                } else {
                    (0., 0.)
                };
                if active {
                    lp += self.log_coefs[i];
                    if k > 0. {
                        lp += k * ln_t;
                    }
                    if nk > 0. {
                        lp += nk * ln_1mt;
                    }
                }

                if let Some(gr) = grad.as_mut() {
                    gr[ix] += (t.a + k) * (1. - theta) - (t.b + nk) * theta;
                    let d_a = ln_t - t.psi_a;
                    let d_b = ln_1mt - t.psi_b;
                    let d_mean = t.conc * (d_a - d_b);
                    let d_conc = t.mean * d_a + (1. - t.mean) * d_b + t.psi_conc;
                    gr[l.concentration(s.group)] += t.conc * d_conc;
                    let mean_ix = match branch {
                        Switch::Shared => l.shared_mean(),
                        Switch::Distinct => l.group_mean(s.group)
                    };
                    gr[mean_ix] += t.mean * (1. - t.mean) * d_mean;
                }
            }
        }
        lp
    }

    /// Log joint density of a constrained draw, factorized as
    /// prior(concentration) x prior(shared_mean) x prior(group_mean) x prior(switch) x
    /// prod_i prior(prob_h0[i]) x prior(prob_h1[i]) x likelihood(n_correct[i] | active_prob[i]).
    pub fn log_joint(&self, draw : &Draw) -> f64 {
        let conc_prior = self.hyper.concentration_prior();
        let mean_prior = self.hyper.mean_prior();
        let mut lp : f64 = draw.concentration.iter().map(|c| conc_prior.log_prob(*c) ).sum();
        lp += mean_prior.log_prob(draw.shared_mean);
        lp += draw.group_mean.iter().map(|m| mean_prior.log_prob(*m) ).sum::<f64>();
        lp += self.hyper.switch_log_prior(draw.switch);
        for (i, s) in self.data.subjects().iter().enumerate() {
            let c = draw.concentration[s.group];
            lp += Beta::from_mean(draw.shared_mean, c).log_prob(draw.prob_h0[i]);
            lp += Beta::from_mean(draw.group_mean[s.group], c).log_prob(draw.prob_h1[i]);
        }
        lp + self.log_likelihood(&draw.active_probs()[..])
    }

    /// Support-valid starting point. The H0 branch starts at the pooled success
    /// rate, the H1 branch at each group's own rate (both with a half-count
    /// correction, which keeps all-failure and all-success data interior);
    /// concentrations start at the hyperprior mean.
    pub fn initial_state(&self) -> State {
        let l = &self.layout;
        let rate = |(k, n) : (u64, u64)| (k as f64 + 0.5) / (n as f64 + 1.0);
        let pooled = rate(self.data.pooled_counts());
        let group_rates : Vec<f64> = (0..l.n_groups).map(|g| rate(self.data.group_counts(g)) ).collect();
        let conc = self.hyper.concentration_prior().mean();
        let mut position = DVector::zeros(l.dim());
        position[l.shared_mean()] = prob::logit(pooled);
        for g in 0..l.n_groups {
            position[l.concentration(g)] = conc.ln();
            position[l.group_mean(g)] = prob::logit(group_rates[g]);
        }
        for (i, s) in self.data.subjects().iter().enumerate() {
            position[l.prob_h0(i)] = prob::logit(pooled);
            position[l.prob_h1(i)] = prob::logit(group_rates[s.group]);
        }
        State { switch : Switch::Distinct, position }
    }

}

impl Display for HierarchicalModel {

    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Hierarchical model ({} groups, {} subjects, {} parameters; concentration ~ Gamma({}, {}))",
            self.layout.n_groups,
            self.layout.n_subjects,
            self.layout.dim() + 1,
            self.hyper.shape_gamma,
            self.hyper.rate_gamma
        )
    }

}

#[cfg(test)]
fn small_model() -> HierarchicalModel {
    let data = Data::load(&[0, 0, 1, 1, 2], &[20, 20, 20, 10, 15], &[12, 0, 9, 10, 7]).unwrap();
    HierarchicalModel::new(data, Hyper::default()).unwrap()
}

#[test]
fn zero_groups_or_subjects_is_misspecified() {
    let empty = Data::load(&[], &[], &[]).unwrap();
    assert!(matches!(HierarchicalModel::new(empty, Hyper::default()), Err(Error::ModelMisspecification(_))));
}

#[test]
fn invalid_constants_are_misspecified() {
    let data = Data::load(&[0], &[10], &[3]).unwrap();
    let hyper = Hyper { rate_gamma : 0.0, ..Hyper::default() };
    assert!(matches!(HierarchicalModel::new(data.clone(), hyper), Err(Error::ModelMisspecification(_))));
    let hyper = Hyper { prior_shared : 1.0, ..Hyper::default() };
    assert!(matches!(HierarchicalModel::new(data, hyper), Err(Error::ModelMisspecification(_))));
}

#[test]
fn initial_state_is_in_support() {
    let model = small_model();
    let state = model.initial_state();
    let draw = state.to_draw(model.layout());
    assert!(draw.in_support());
    assert!((draw.concentration[0] - 10.).abs() < 1E-10);
    assert!((draw.group_mean[1] - 19.5 / 31.).abs() < 1E-12);
    for s in Switch::ALL.iter() {
        assert!(model.log_density(*s, &state.position, None).is_finite());
    }
    assert!(model.log_joint(&draw).is_finite());
}

#[test]
fn log_density_differs_from_log_joint_by_jacobian() {
    let model = small_model();
    let l = *model.layout();
    let mut state = model.initial_state();
    for (ix, v) in state.position.iter_mut().enumerate() {
        *v += 0.1 * ((ix as f64) * 1.7).sin();
    }
    for s in Switch::ALL.iter() {
        state.switch = *s;
        let draw = state.to_draw(&l);
        let q = &state.position;
        let mut log_jac : f64 = (0..l.n_groups).map(|g| q[l.concentration(g)] ).sum();
        for ix in l.shared_mean()..l.dim() {
            log_jac += prob::logit_log_jacobian(q[ix]);
        }
        let expected = model.log_joint(&draw) - model.hyper().switch_log_prior(*s) + log_jac;
        let got = model.log_density(*s, q, None);
        assert!((expected - got).abs() < 1E-8, "switch {}: {} vs {}", s, expected, got);
    }
}

#[test]
fn switch_weights_integrate_subject_probabilities() {
    let model = small_model();
    let mut state = model.initial_state();
    let l = *model.layout();
    let w = model.log_switch_weights(&state.position);
    let draw = state.to_draw(&l);
    let half = 0.5f64.ln();
    let mut expected = [half; 2];
    for s in model.data().subjects().iter() {
        let c = draw.concentration[s.group];
        for (branch, m) in [(0, draw.group_mean[s.group]), (1, draw.shared_mean)].iter() {
            let beta = Beta::from_mean(*m, c);
            expected[*branch] += prob::beta_binomial_log_prob(s.n_correct, s.n_trials, beta.a, beta.b);
        }
    }
    assert!((w[0] - expected[0]).abs() < 1E-8);
    assert!((w[1] - expected[1]).abs() < 1E-8);

    // Subject-level probabilities do not enter; the branch means do.
    state.position[l.prob_h0(0)] += 1.0;
    state.position[l.prob_h1(1)] -= 1.0;
    assert_eq!(model.log_switch_weights(&state.position), w);
    state.position[l.shared_mean()] += 0.5;
    let w2 = model.log_switch_weights(&state.position);
    assert_eq!(w[0], w2[0]);
    assert!(w[1] != w2[1]);
}

#[test]
fn infinite_concentration_has_no_switch_weight() {
    let model = small_model();
    let mut state = model.initial_state();
    state.position[model.layout().concentration(0)] = 800.;
    let w = model.log_switch_weights(&state.position);
    assert_eq!(w, [f64::NEG_INFINITY; 2]);
}

#[test]
fn out_of_support_position_has_no_density() {
    let model = small_model();
    let l = *model.layout();
    let mut state = model.initial_state();
    state.position[l.prob_h1(2)] = 800.;
    assert_eq!(model.log_density(Switch::Distinct, &state.position, None), f64::NEG_INFINITY);
    let mut state = model.initial_state();
    state.position[l.concentration(0)] = -800.;
    assert_eq!(model.log_density(Switch::Shared, &state.position, None), f64::NEG_INFINITY);
}
