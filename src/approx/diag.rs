fn mean_var(series : &[f64]) -> (f64, f64) {
    let n = series.len() as f64;
    let mean = series.iter().sum::<f64>() / n;
    let var = series.iter().map(|x| (x - mean).powi(2) ).sum::<f64>() / n;
    (mean, var)
}

fn autocorrelation(series : &[f64], mean : f64, var : f64, lag : usize) -> f64 {
    let n = series.len();
    let cov : f64 = (0..(n - lag)).map(|t| (series[t] - mean) * (series[t + lag] - mean) ).sum();
    cov / (n as f64 * var)
}

/// Longest autocorrelation lag effective_sample_size evaluates.
pub const MAX_LAG : usize = 1000;

/// Effective sample size of a single chain, n / (1 + 2 sum rho_k), truncating the
/// autocorrelation sum with Geyer's initial positive sequence: lags are summed in
/// consecutive pairs until a pair sum turns negative, or the lag reaches
/// min(n / 2, MAX_LAG), which bounds the cost at O(n MAX_LAG). A constant series
/// has no autocorrelation to measure and reports its length.
pub fn effective_sample_size(series : &[f64]) -> f64 {
    let n = series.len();
    if n < 4 {
        return n as f64;
    }
    let (mean, var) = mean_var(series);
    if var <= f64::EPSILON {
        return n as f64;
    }
    let max_lag = (n / 2).min(MAX_LAG);
    let mut sum_rho = 0.0;
    let mut lag = 1;
    while lag + 1 <= max_lag {
        let pair = autocorrelation(series, mean, var, lag) + autocorrelation(series, mean, var, lag + 1);
        if pair < 0.0 {
            break;
        }
        sum_rho += pair;
        lag += 2;
    }
    let tau = (1. + 2. * sum_rho).max(1. / n as f64);
    (n as f64 / tau).min(n as f64)
}

/// Split R-hat (Gelman et al., BDA3 section 11.4): every chain is cut in half and
/// the between/within variance ratio is computed over the halves. Chains are
/// truncated to the shortest one. Returns None when fewer than four draws per
/// chain are available. When every half is constant the statistic is 1 if the
/// halves agree and infinite otherwise.
pub fn split_rhat(chains : &[Vec<f64>]) -> Option<f64> {
    let len = chains.iter().map(|c| c.len() ).min()?;
    let half = len / 2;
    if half < 2 {
        return None;
    }
    let mut halves : Vec<&[f64]> = Vec::with_capacity(2 * chains.len());
    for c in chains {
        halves.push(&c[..half]);
        halves.push(&c[half..2*half]);
    }
    let m = halves.len() as f64;
    let n = half as f64;
    let stats : Vec<(f64, f64)> = halves.iter().map(|h| {
        let (mean, var) = mean_var(h);
        (mean, var * n / (n - 1.))
    }).collect();
    let grand = stats.iter().map(|s| s.0 ).sum::<f64>() / m;
    let b = n / (m - 1.) * stats.iter().map(|s| (s.0 - grand).powi(2) ).sum::<f64>();
    let w = stats.iter().map(|s| s.1 ).sum::<f64>() / m;
    if w <= f64::EPSILON {
        return Some(if b <= f64::EPSILON { 1.0 } else { f64::INFINITY });
    }
    let var_plus = (n - 1.) / n * w + b / n;
    Some((var_plus / w).sqrt())
}

#[test]
fn independent_draws_have_near_full_ess() {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(5);
    let s : Vec<f64> = (0..2000).map(|_| rng.gen::<f64>() ).collect();
    let ess = effective_sample_size(&s[..]);
    assert!(ess > 1200. && ess <= 2000., "ess = {}", ess);
}

#[test]
fn sticky_chain_has_low_ess() {
    // Long constant runs of alternating value.
    let s : Vec<f64> = (0..2000).map(|i| ((i / 100) % 2) as f64 ).collect();
    let ess = effective_sample_size(&s[..]);
    assert!(ess < 200., "ess = {}", ess);
    assert_eq!(effective_sample_size(&[1., 1., 1., 1., 1.]), 5.);
}

#[test]
fn slowly_drifting_chain_stops_at_lag_cap() {
    // Every autocorrelation of a linear ramp stays positive until lag n / 2, so only
    // the cap ends the sum.
    let n = 100_000;
    let s : Vec<f64> = (0..n).map(|i| i as f64 ).collect();
    let ess = effective_sample_size(&s[..]);
    assert!(ess >= 1. && ess < 100., "ess = {}", ess);

    let short : Vec<f64> = (0..10).map(|i| i as f64 ).collect();
    let ess = effective_sample_size(&short[..]);
    assert!(ess >= 1. && ess < 10., "ess = {}", ess);
}

#[test]
fn rhat_flags_disagreeing_chains() {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(9);
    let a : Vec<f64> = (0..1000).map(|_| rng.gen::<f64>() ).collect();
    let b : Vec<f64> = (0..1000).map(|_| rng.gen::<f64>() ).collect();
    let c : Vec<f64> = (0..1000).map(|_| 5. + rng.gen::<f64>() ).collect();
    let good = split_rhat(&[a.clone(), b]).unwrap();
    assert!((good - 1.0).abs() < 0.05, "rhat = {}", good);
    let bad = split_rhat(&[a, c]).unwrap();
    assert!(bad > 1.5, "rhat = {}", bad);
    assert!(split_rhat(&[vec![1., 2., 3.]]).is_none());
    assert_eq!(split_rhat(&[vec![1.; 10], vec![1.; 10]]), Some(1.0));
}
