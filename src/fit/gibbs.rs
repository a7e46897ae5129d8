use rand::Rng;
use rand::distributions::Open01;
use rand_distr::{Distribution, Gamma as GammaDistr};
use crate::model::{HierarchicalModel, State, Switch};
use crate::prob;

/// Draws rejected because they round onto the boundary of (0, 1) before a
/// Beta draw is given up.
const MAX_REDRAWS : usize = 1000;

/// Probability that the switch selects H1 (index 0), from the two
/// unnormalized log-weights. None when either weight is not a number or
/// both are negative infinity.
pub fn switch_conditional(log_w : [f64; 2]) -> Option<f64> {
    let (w0, w1) = (log_w[0], log_w[1]);
    if w0.is_nan() || w1.is_nan() || (w0 == f64::NEG_INFINITY && w1 == f64::NEG_INFINITY) {
        return None;
    }
    if w0 == f64::INFINITY || w1 == f64::INFINITY {
        return None;
    }
    // 1 / (1 + e^{w1 - w0}), evaluated on the side that cannot overflow.
    let d = w1 - w0;
    let p0 = if d > 0. {
        let e = (-d).exp();
        e / (1. + e)
    } else {
        1. / (1. + d.exp())
    };
    Some(p0)
}

// ln X for X ~ Gamma(shape, 1). Shapes below one draw Gamma(shape + 1) and
// scale by U^(1 / shape) (Marsaglia and Tsang), which is added in log space
// so that tiny shapes do not underflow to ln 0.
fn ln_gamma_variate<R : Rng>(shape : f64, rng : &mut R) -> Option<f64> {
    if shape < 1.0 {
        let g = GammaDistr::new(shape + 1.0, 1.0).ok()?.sample(rng);
        let u : f64 = rng.sample(Open01);
        Some(g.ln() + u.ln() / shape)
    } else {
        Some(GammaDistr::new(shape, 1.0).ok()?.sample(rng).ln())
    }
}

/// Draws logit(p) for p ~ Beta(a, b), as the difference of two log-Gamma
/// variates. Draws whose sigmoid rounds onto 0 or 1 are redrawn, so the result
/// is always a point where the model density is finite. None when a shape is
/// not positive and finite, or when no interior value came up.
pub fn sample_logit_beta<R : Rng>(a : f64, b : f64, rng : &mut R) -> Option<f64> {
    if !prob::is_positive(a) || !prob::is_positive(b) {
        return None;
    }
    for _ in 0..MAX_REDRAWS {
        let v = ln_gamma_variate(a, rng)? - ln_gamma_variate(b, rng)?;
        if v.is_finite() && prob::is_open_unit(prob::sigmoid(v)) {
            return Some(v);
        }
    }
    None
}

/// Blocked Gibbs step over the model indicator and both subject-level
/// branches, given the means and concentrations. The switch is drawn with the
/// subject-level probabilities integrated out (Model::log_switch_weights); the
/// probabilities of the branch it selects are then drawn from their conjugate
/// Beta(a + correct, b + wrong) conditional, and those of the other branch from
/// their Beta(a, b) prior. Returns false when some draw could not be made; the
/// state is left untouched then.
pub fn gibbs_switch<R : Rng>(model : &HierarchicalModel, state : &mut State, rng : &mut R) -> bool {
    let p0 = match switch_conditional(model.log_switch_weights(&state.position)) {
        Some(p0) => p0,
        None => return false
    };
    let u : f64 = rng.gen();
    let switch = if u < p0 { Switch::Distinct } else { Switch::Shared };

    let l = model.layout();
    let mut probs = Vec::with_capacity(2 * l.n_subjects);
    for branch in Switch::ALL.iter() {
        for (i, s) in model.data().subjects().iter().enumerate() {
            let beta = model.subject_prior(&state.position, *branch, s.group);
            let (a, b) = if *branch == switch {
                (beta.a + s.n_correct as f64, beta.b + s.n_wrong() as f64)
            } else {
                (beta.a, beta.b)
            };
            match sample_logit_beta(a, b, rng) {
                Some(v) => probs.push((l.prob(*branch, i), v)),
                None => return false
            }
        }
    }
    state.switch = switch;
    for (ix, v) in probs {
        state.position[ix] = v;
    }
    true
}

#[cfg(test)]
fn two_group_model() -> HierarchicalModel {
    let data = crate::sample::Data::load(&[0, 0, 0, 1, 1, 1], &[20; 6], &[12, 11, 20, 3, 0, 5]).unwrap();
    HierarchicalModel::new(data, crate::model::Hyper::default()).unwrap()
}

#[test]
fn conditional_is_logistic_in_weight_difference() {
    assert!((switch_conditional([0., 0.]).unwrap() - 0.5).abs() < 1E-15);
    let p = switch_conditional([-3.0, -1.0]).unwrap();
    assert!((p - 1. / (1. + 2.0f64.exp())).abs() < 1E-15);
    assert_eq!(switch_conditional([-1E6, 0.]).unwrap(), 0.0);
    assert_eq!(switch_conditional([0., -1E6]).unwrap(), 1.0);
    assert_eq!(switch_conditional([f64::NEG_INFINITY, 0.]).unwrap(), 0.0);
    assert!(switch_conditional([f64::NAN, 0.]).is_none());
    assert!(switch_conditional([f64::NEG_INFINITY, f64::NEG_INFINITY]).is_none());
}

#[test]
fn logit_beta_draws_match_beta_moments() {
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(21);
    for (a, b) in [(2.0, 5.0), (0.4, 0.7), (30.0, 1.5)].iter() {
        let n = 20000;
        let xs : Vec<f64> = (0..n).map(|_| prob::sigmoid(sample_logit_beta(*a, *b, &mut rng).unwrap()) ).collect();
        let mean = xs.iter().sum::<f64>() / n as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2) ).sum::<f64>() / n as f64;
        let (m, v) = (a / (a + b), a * b / ((a + b).powi(2) * (a + b + 1.)));
        assert!((mean - m).abs() < 0.01, "Beta({}, {}): mean {} vs {}", a, b, mean, m);
        assert!((var - v).abs() < 0.1 * v, "Beta({}, {}): variance {} vs {}", a, b, var, v);
        assert!(xs.iter().all(|x| prob::is_open_unit(*x) ));
    }

    // Shapes small enough that most raw draws round onto zero still come back interior.
    for _ in 0..100 {
        let v = sample_logit_beta(1E-3, 5.0, &mut rng).unwrap();
        assert!(prob::is_open_unit(prob::sigmoid(v)));
    }
    assert!(sample_logit_beta(0.0, 1.0, &mut rng).is_none());
    assert!(sample_logit_beta(1.0, f64::NAN, &mut rng).is_none());
}

#[test]
fn gibbs_redraws_both_branches() {
    use rand::SeedableRng;
    let model = two_group_model();
    let l = *model.layout();
    let mut rng = rand::rngs::StdRng::seed_from_u64(4);
    let mut state = model.initial_state();
    let before = state.clone();
    assert!(gibbs_switch(&model, &mut state, &mut rng));
    for i in 0..l.n_subjects {
        assert!(state.position[l.prob_h0(i)] != before.position[l.prob_h0(i)]);
        assert!(state.position[l.prob_h1(i)] != before.position[l.prob_h1(i)]);
    }
    for g in 0..l.n_groups {
        assert_eq!(state.position[l.concentration(g)], before.position[l.concentration(g)]);
        assert_eq!(state.position[l.group_mean(g)], before.position[l.group_mean(g)]);
    }
    assert!(state.to_draw(&l).in_support());
}

#[test]
fn gibbs_switch_frequency_matches_collapsed_weights() {
    use rand::SeedableRng;
    let model = two_group_model();
    let mut rng = rand::rngs::StdRng::seed_from_u64(8);
    let start = model.initial_state();
    let p0 = switch_conditional(model.log_switch_weights(&start.position)).unwrap();
    let n = 4000;
    let mut n_distinct = 0;
    for _ in 0..n {
        let mut state = start.clone();
        assert!(gibbs_switch(&model, &mut state, &mut rng));
        if state.switch == Switch::Distinct {
            n_distinct += 1;
        }
    }
    let freq = n_distinct as f64 / n as f64;
    assert!((freq - p0).abs() < 4. * (p0 * (1. - p0) / n as f64).sqrt() + 1E-3, "{} vs {}", freq, p0);
}

#[test]
fn failed_gibbs_step_leaves_state_untouched() {
    use rand::SeedableRng;
    let model = two_group_model();
    let mut rng = rand::rngs::StdRng::seed_from_u64(1);
    let mut state = model.initial_state();
    state.switch = Switch::Shared;
    state.position[model.layout().concentration(1)] = 800.;
    let before = state.clone();
    assert!(!gibbs_switch(&model, &mut state, &mut rng));
    assert_eq!(state, before);
}
