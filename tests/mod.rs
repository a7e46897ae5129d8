use nalgebra::DVector;
use finitediff::FiniteDiff;
use oddgroup::approx::*;
use oddgroup::fit::*;
use oddgroup::model::*;
use oddgroup::sample::*;

const EPS : f64 = 1E-4;

/// n_per_group subjects per group, every subject of group g with correct[g] out of trials.
fn balanced_data(correct : &[i64], n_per_group : usize, trials : i64) -> Data {
    let mut groups = Vec::new();
    let mut n_correct = Vec::new();
    for (g, k) in correct.iter().enumerate() {
        for _ in 0..n_per_group {
            groups.push(g as i64);
            n_correct.push(*k);
        }
    }
    let n_trials = vec![trials; groups.len()];
    Data::load(&groups[..], &n_trials[..], &n_correct[..]).unwrap()
}

fn pooled_draws(traces : &[Trace]) -> Vec<Draw> {
    traces.iter().flat_map(|t| t.draws.iter().cloned() ).collect()
}

fn settings(n_draws : usize, n_burnin : usize, n_chains : usize, seed : u64) -> Settings {
    Settings { n_draws, n_burnin, n_chains, seed, ..Settings::default() }
}

#[test]
fn analytic_gradient_matches_finite_differences() {
    let data = Data::load(&[3, 3, 7, 7, 9], &[20, 20, 20, 10, 15], &[12, 0, 9, 10, 7]).unwrap();
    let model = HierarchicalModel::new(data, Hyper::default()).unwrap();
    let mut state = model.initial_state();
    for (ix, v) in state.position.iter_mut().enumerate() {
        *v += 0.3 * ((ix as f64) * 0.7).cos();
    }
    for switch in Switch::ALL.iter() {
        let mut grad = DVector::zeros(model.layout().dim());
        let lp = model.log_density(*switch, &state.position, Some(&mut grad));
        assert!(lp.is_finite());
        let x : Vec<f64> = state.position.iter().cloned().collect();
        let numeric = x.central_diff(&|x : &Vec<f64>| {
            model.log_density(*switch, &DVector::from_vec(x.clone()), None)
        });
        for (ix, (a, n)) in grad.iter().zip(numeric.iter()).enumerate() {
            assert!(
                (a - n).abs() < EPS * (1. + n.abs()),
                "switch {}, coordinate {}: analytic {} numeric {}",
                switch,
                ix,
                a,
                n
            );
        }
    }
}

/// Subject counts at the binomial quantiles (j + 1/2) / n_subjects, j = 0..n_subjects:
/// a deterministic group whose empirical distribution follows Binomial(trials, p).
fn quantile_counts(p : f64, n_subjects : usize, trials : u64) -> Vec<i64> {
    (0..n_subjects).map(|j| {
        let q = (j as f64 + 0.5) / n_subjects as f64;
        let mut cdf = 0.0;
        for k in 0..=trials {
            cdf += oddgroup::prob::binomial_log_prob(k, trials, p).exp();
            if cdf >= q {
                return k as i64;
            }
        }
        trials as i64
    }).collect()
}

fn quantile_data(group_probs : &[f64], n_subjects : usize, trials : u64) -> Data {
    let mut groups = Vec::new();
    let mut n_correct = Vec::new();
    for (g, p) in group_probs.iter().enumerate() {
        for k in quantile_counts(*p, n_subjects, trials) {
            groups.push(g as i64);
            n_correct.push(k);
        }
    }
    let n_trials = vec![trials as i64; groups.len()];
    Data::load(&groups[..], &n_trials[..], &n_correct[..]).unwrap()
}

/// Runs s.n_chains chains one after another, every one starting from the
/// model's initial point with the informed switch value.
fn chains_from(model : &HierarchicalModel, start : Switch, s : &Settings) -> Vec<Trace> {
    (0..s.n_chains).map(|c| {
        let chain_settings = Settings { seed : s.seed + c as u64, ..s.clone() };
        let state = State { switch : start, ..model.initial_state() };
        Sampler::new(model, chain_settings).unwrap()
            .with_state(Some(state)).unwrap()
            .run().unwrap()
    }).collect()
}

#[test]
fn quantile_counts_follow_binomial() {
    let counts = quantile_counts(0.7, 20, 20);
    assert_eq!(counts, vec![10, 11, 12, 12, 12, 13, 13, 13, 14, 14, 14, 14, 15, 15, 15, 16, 16, 16, 17, 18]);
    assert_eq!(quantile_counts(0.5, 20, 20).iter().sum::<i64>(), 200);
}

#[test]
fn odd_group_favors_distinct_means() {
    // 4 groups x 20 subjects x 20 trials; the first group succeeds at 0.7, the others near 0.5.
    let data = quantile_data(&[0.7, 0.5, 0.49, 0.51], 20, 20);
    let model = HierarchicalModel::new(data, Hyper::default()).unwrap();
    for start in Switch::ALL.iter() {
        let traces = chains_from(&model, *start, &settings(1000, 500, 2, 101));
        let draws = pooled_draws(&traces[..]);
        let (p_h1, p_h0) = estimate_hypothesis_probabilities(&draws[..]).unwrap();
        assert!(p_h1 > 0.9, "start {}: p(H1|D) = {}", start, p_h1);
        assert!((p_h1 + p_h0 - 1.0).abs() < 1E-12);

        // The odd group should stand above every other group under H1.
        for j in 1..4 {
            let c = pairwise_contrast(&draws[..], 0, j).unwrap();
            let summary = ContrastSummary::from_samples(&c[..], 0.95).unwrap();
            assert!(summary.mean > 0.1, "start {}, contrast 0-{}: {}", start, j, summary);
            assert!(summary.prob_above_zero > 0.95);
        }
    }
}

#[test]
fn equal_groups_favor_shared_mean() {
    let design = Design { group_probs : vec![0.5; 4], n_subjects_per_group : 20, n_trials_per_subject : 20, seed : 2024 };
    let model = HierarchicalModel::new(design.simulate().unwrap(), Hyper::default()).unwrap();
    for start in Switch::ALL.iter() {
        let traces = chains_from(&model, *start, &settings(1000, 500, 2, 31));
        let (_, p_h0) = estimate_hypothesis_probabilities(&pooled_draws(&traces[..])[..]).unwrap();
        assert!(p_h0 > 0.9, "start {}: p(H0|D) = {}", start, p_h0);
    }
}

#[test]
fn single_group_splits_posterior_between_hypotheses() {
    // With one group both hypotheses describe the same model, so the
    // posterior of the switch equals its prior.
    let data = quantile_data(&[0.5], 20, 20);
    let model = HierarchicalModel::new(data, Hyper::default()).unwrap();
    for start in Switch::ALL.iter() {
        let traces = chains_from(&model, *start, &settings(1500, 500, 2, 7));
        let draws = pooled_draws(&traces[..]);
        let (p_h1, _) = estimate_hypothesis_probabilities(&draws[..]).unwrap();
        assert!(p_h1 > 0.35 && p_h1 < 0.65, "start {}: p(H1|D) = {}", start, p_h1);
        assert!(traces.iter().all(|t| t.stats.n_switch_flips > 100 ));
    }

    // Weak data: two subjects, four trials each.
    let data = balanced_data(&[2], 2, 4);
    let model = HierarchicalModel::new(data, Hyper::default()).unwrap();
    let traces = sample_chains(&model, &settings(2000, 500, 4, 7)).unwrap();
    let (p_h1, _) = estimate_hypothesis_probabilities(&pooled_draws(&traces[..])[..]).unwrap();
    assert!(p_h1 > 0.35 && p_h1 < 0.65, "p(H1|D) = {}", p_h1);
}

#[test]
fn single_group_posterior_follows_switch_prior() {
    let data = quantile_data(&[0.5], 20, 20);
    let hyper = Hyper { prior_shared : 0.85, ..Hyper::default() };
    let model = HierarchicalModel::new(data, hyper).unwrap();
    let s = Settings { hyper, ..settings(1500, 500, 2, 19) };
    for start in Switch::ALL.iter() {
        let traces = chains_from(&model, *start, &s);
        let (_, p_h0) = estimate_hypothesis_probabilities(&pooled_draws(&traces[..])[..]).unwrap();
        assert!(p_h0 > 0.75 && p_h0 < 0.95, "start {}: p(H0|D) = {}", start, p_h0);
    }
}

#[test]
fn boundary_counts_stay_in_support() {
    for k in [0, 20].iter() {
        let data = balanced_data(&[*k, *k], 3, 20);
        let model = HierarchicalModel::new(data, Hyper::default()).unwrap();
        let trace = Sampler::new(&model, settings(300, 200, 1, 3)).unwrap().run().unwrap();
        assert_eq!(trace.len(), 300);
        for d in trace.draws.iter() {
            assert!(d.in_support(), "{:?}", d);
            assert!(model.log_joint(d).is_finite());
        }
    }
}

#[test]
fn same_seed_reproduces_traces() {
    let data = balanced_data(&[12, 9, 10], 4, 20);
    let model = HierarchicalModel::new(data, Hyper::default()).unwrap();
    let s = settings(150, 100, 3, 42);
    let first = sample_chains(&model, &s).unwrap();
    let second = sample_chains(&model, &s).unwrap();
    assert_eq!(first, second);
    assert_eq!(first[1].seed, 43);
    assert!(first[0].draws != first[1].draws);
}

#[test]
fn every_chain_emits_requested_draws() {
    let data = balanced_data(&[12, 9], 3, 20);
    let model = HierarchicalModel::new(data, Hyper::default()).unwrap();
    let traces = sample_chains(&model, &settings(123, 40, 3, 5)).unwrap();
    assert_eq!(traces.len(), 3);
    for (c, t) in traces.iter().enumerate() {
        assert_eq!(t.chain, c);
        assert_eq!(t.len(), 123);
        assert_eq!(t.stats.n_iterations, 163);
        for d in t.draws.iter() {
            assert!(d.in_support());
            assert_eq!(d.concentration.len(), 2);
            assert_eq!(d.group_mean.len(), 2);
            assert_eq!(d.prob_h0.len(), 6);
            assert_eq!(d.prob_h1.len(), 6);
        }
    }
    let empty = sample_chains(&model, &settings(0, 10, 1, 5)).unwrap();
    assert!(empty[0].is_empty());
    assert!(estimate_hypothesis_probabilities(&empty[0].draws[..]).is_none());
}

#[test]
fn trace_survives_json() {
    let data = balanced_data(&[12, 9], 2, 20);
    let model = HierarchicalModel::new(data, Hyper::default()).unwrap();
    let traces = sample_chains(&model, &settings(20, 10, 1, 8)).unwrap();
    let json = serde_json::to_string(&traces).unwrap();
    assert!(json.contains("\"switch\":0") || json.contains("\"switch\":1"));
    let back : Vec<Trace> = serde_json::from_str(&json).unwrap();
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].len(), 20);
    assert_eq!(back[0].draws[0].switch, traces[0].draws[0].switch);
}

#[test]
fn simulated_table_round_trips_through_csv() {
    let design = Design { n_subjects_per_group : 5, ..Design::default() };
    let data = design.simulate().unwrap();
    let mut buf = Vec::new();
    data.write_csv(&mut buf).unwrap();
    let back = Data::from_reader(&buf[..]).unwrap();
    assert_eq!(back, data);
    assert_eq!(back.n_groups(), 4);
    assert_eq!(back.n_subjects(), 20);
}
