use nalgebra::DVector;
use rand::Rng;
use crate::model::{HierarchicalModel, State, Switch};
use crate::prob::{self, Beta};
use super::sample_logit_beta;

/// Share of each weighted count the mean proposal keeps. Below one, the
/// proposal is wider than the conditional of the means it stands in for.
pub const PROPOSAL_TEMPER : f64 = 0.5;

/// Data-informed Beta proposal for every mean of the informed branch, in the
/// order of Layout::means(branch). Each subject contributes its counts weighted
/// by (c + 1) / (n + c), the share of its n trials that informs the group mean
/// when the concentration is c, and the weighted counts pooled over the groups
/// a mean covers update the mean prior. Depends on the concentrations only.
pub fn mean_proposal(model : &HierarchicalModel, position : &DVector<f64>, branch : Switch) -> Vec<Beta> {
    let l = model.layout();
    let prior = model.hyper().mean_prior();
    let n_means = l.means(branch).len();
    let mut correct = vec![0.; n_means];
    let mut trials = vec![0.; n_means];
    for s in model.data().subjects() {
        let c = position[l.concentration(s.group)].exp();
        let w = (c + 1.) / (s.n_trials as f64 + c);
        let j = match branch {
            Switch::Shared => 0,
            Switch::Distinct => s.group
        };
        correct[j] += w * s.n_correct as f64;
        trials[j] += w * s.n_trials as f64;
    }
    correct.iter()
        .zip(trials.iter())
        .map(|(k, n)| Beta::new(prior.a + PROPOSAL_TEMPER * k, prior.b + PROPOSAL_TEMPER * (n - k)) )
        .collect()
}

// ln prior(m) - ln q(m) for the mean at logit value v.
fn prior_over_proposal(prior : &Beta, proposal : &Beta, v : f64) -> f64 {
    let (ln_m, ln_1mm) = (prob::ln_sigmoid(v), prob::ln_one_minus_sigmoid(v));
    prior.log_prob_ln(ln_m, ln_1mm) - proposal.log_prob_ln(ln_m, ln_1mm)
}

/// Metropolis-Hastings move to the competing hypothesis, on the posterior of
/// (switch, means) with the subject-level probabilities integrated out and the
/// concentrations held fixed. The means of the branch that becomes active are
/// drawn from mean_proposal, and those of the branch that becomes inactive
/// from their prior, so the acceptance ratio reduces to
///
/// prior(to) L(to) prior(m_to) q(m_from) / [ prior(from) L(from) prior(m_from) q(m_to) ]
///
/// with L the marginal likelihood of Model::marginal_log_likelihood. The
/// subject-level probabilities are left stale and must be redrawn by
/// gibbs_switch before any update that conditions on them.
///
/// Returns whether the move was accepted, or None when the ratio could not be
/// evaluated (the state is left untouched then).
pub fn switch_jump<R : Rng>(model : &HierarchicalModel, state : &mut State, rng : &mut R) -> Option<bool> {
    let l = model.layout();
    let hyper = model.hyper();
    let prior = hyper.mean_prior();
    let from = state.switch;
    let to = from.other();

    let mut proposal = state.position.clone();
    let mut log_ratio = hyper.switch_log_prior(to) - hyper.switch_log_prior(from);
    for (ix, q) in l.means(to).iter().zip(mean_proposal(model, &state.position, to).iter()) {
        let v = sample_logit_beta(q.a, q.b, rng)?;
        proposal[*ix] = v;
        log_ratio += prior_over_proposal(&prior, q, v);
    }
    for (ix, q) in l.means(from).iter().zip(mean_proposal(model, &state.position, from).iter()) {
        log_ratio -= prior_over_proposal(&prior, q, state.position[*ix]);
        proposal[*ix] = sample_logit_beta(prior.a, prior.b, rng)?;
    }
    log_ratio += model.marginal_log_likelihood(&proposal, to) - model.marginal_log_likelihood(&state.position, from);
    if log_ratio.is_nan() {
        return None;
    }

    let u : f64 = rng.gen();
    if u.ln() < log_ratio {
        state.switch = to;
        state.position = proposal;
        Some(true)
    } else {
        Some(false)
    }
}

#[cfg(test)]
fn model_with_counts(correct : &[i64]) -> HierarchicalModel {
    // Five subjects per group, 20 trials each.
    let groups : Vec<i64> = (0..correct.len()).map(|i| (i / 5) as i64 ).collect();
    let trials = vec![20; correct.len()];
    let data = crate::sample::Data::load(&groups[..], &trials[..], correct).unwrap();
    HierarchicalModel::new(data, crate::model::Hyper::default()).unwrap()
}

#[test]
fn proposal_pools_weighted_counts() {
    let model = model_with_counts(&[10, 12, 8, 11, 9, 16, 15, 17, 14, 18]);
    let l = *model.layout();
    let mut position = model.initial_state().position;
    // Concentration 20 over 20 trials weighs every subject by 21 / 40.
    for g in 0..2 {
        position[l.concentration(g)] = 20f64.ln();
    }
    let w = 21. / 40.;
    let shared = mean_proposal(&model, &position, Switch::Shared);
    assert_eq!(shared.len(), 1);
    assert!((shared[0].a - (1. + PROPOSAL_TEMPER * w * 130.)).abs() < 1E-9);
    assert!((shared[0].b - (1. + PROPOSAL_TEMPER * w * 70.)).abs() < 1E-9);
    let distinct = mean_proposal(&model, &position, Switch::Distinct);
    assert_eq!(distinct.len(), 2);
    assert!((distinct[1].a - (1. + PROPOSAL_TEMPER * w * 80.)).abs() < 1E-9);
    assert!((distinct[1].b - (1. + PROPOSAL_TEMPER * w * 20.)).abs() < 1E-9);
}

#[test]
fn jump_reaches_the_hypothesis_the_data_favor() {
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(12);

    // Two groups far apart: starting from H0, the move to H1 is accepted within a few tries.
    let model = model_with_counts(&[3, 4, 2, 5, 3, 17, 16, 18, 15, 17]);
    let mut state = model.initial_state();
    state.switch = Switch::Shared;
    let mut n_tries = 0;
    while state.switch == Switch::Shared && n_tries < 50 {
        assert!(switch_jump(&model, &mut state, &mut rng).is_some());
        n_tries += 1;
    }
    assert_eq!(state.switch, Switch::Distinct);
    assert!(model.log_density(state.switch, &state.position, None).is_finite());

    // Identical groups: starting from H1, H0 is reached just as quickly.
    let model = model_with_counts(&[10, 11, 9, 10, 12, 10, 9, 11, 10, 8]);
    let mut state = model.initial_state();
    let mut n_tries = 0;
    while state.switch == Switch::Distinct && n_tries < 50 {
        assert!(switch_jump(&model, &mut state, &mut rng).is_some());
        n_tries += 1;
    }
    assert_eq!(state.switch, Switch::Shared);
}

#[test]
fn rejected_or_failed_jump_keeps_state() {
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(3);
    let model = model_with_counts(&[3, 4, 2, 5, 3, 17, 16, 18, 15, 17]);
    let l = *model.layout();

    // Infinite concentration: no ratio can be formed.
    let mut state = model.initial_state();
    state.position[l.concentration(0)] = 800.;
    let before = state.clone();
    assert_eq!(switch_jump(&model, &mut state, &mut rng), None);
    assert_eq!(state, before);

    // From H1 with groups this far apart, H0 is never accepted.
    let mut state = model.initial_state();
    let before = state.clone();
    for _ in 0..20 {
        assert_eq!(switch_jump(&model, &mut state, &mut rng), Some(false));
    }
    assert_eq!(state, before);
}
