use serde::{Serialize, Deserialize};
use std::fmt::{self, Display};
use crate::model::{Draw, Switch};

/// Narrowest credible intervals over posterior samples.
mod hdi;

pub use hdi::*;

/// Effective sample size and split R-hat for scalar chains.
mod diag;

pub use diag::*;

/// Posterior probability of each hypothesis, as (p(H1|D), p(H0|D)), from the
/// frequency of each switch value over the draws. The two values always sum
/// to one. Returns None when there are no draws.
pub fn estimate_hypothesis_probabilities(draws : &[Draw]) -> Option<(f64, f64)> {
    if draws.is_empty() {
        return None;
    }
    let n_distinct = draws.iter().filter(|d| d.switch == Switch::Distinct ).count();
    let p_h1 = n_distinct as f64 / draws.len() as f64;
    Some((p_h1, 1. - p_h1))
}

/// group_mean[i] - group_mean[j] over every draw where H1 (distinct means) is
/// active; group_mean only drives the likelihood in those draws. Returns None
/// when i or j is not a group index of the draws.
pub fn pairwise_contrast(draws : &[Draw], i : usize, j : usize) -> Option<Vec<f64>> {
    if let Some(first) = draws.first() {
        let n_groups = first.group_mean.len();
        if i >= n_groups || j >= n_groups {
            return None;
        }
    }
    Some(draws.iter()
        .filter(|d| d.switch == Switch::Distinct )
        .map(|d| d.group_mean[i] - d.group_mean[j] )
        .collect())
}

/// Contrast samples for every group pair i < j, in lexicographic pair order.
pub fn all_pairwise_contrasts(draws : &[Draw]) -> Vec<((usize, usize), Vec<f64>)> {
    let n_groups = draws.first().map(|d| d.group_mean.len() ).unwrap_or(0);
    let mut out = Vec::new();
    for i in 0..n_groups {
        for j in (i+1)..n_groups {
            if let Some(c) = pairwise_contrast(draws, i, j) {
                out.push(((i, j), c));
            }
        }
    }
    out
}

/// The model index of every draw as a real series (0 = H1, 1 = H0), for diagnostics.
pub fn switch_series(draws : &[Draw]) -> Vec<f64> {
    draws.iter().map(|d| d.switch.index() as f64 ).collect()
}

/// Posterior summary of a contrast: its mean, the narrowest interval holding
/// the requested mass, and how much of the posterior lies above zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContrastSummary {

    pub n : usize,

    pub mean : f64,

    pub mass : f64,

    pub hdi : Hdi,

    pub prob_above_zero : f64

}

impl ContrastSummary {

    pub fn from_samples(samples : &[f64], mass : f64) -> Option<Self> {
        let hdi = Hdi::from_samples(samples, mass)?;
        let n = samples.len();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let prob_above_zero = samples.iter().filter(|s| **s > 0.0 ).count() as f64 / n as f64;
        Some(Self { n, mean, mass, hdi, prob_above_zero })
    }

}

impl Display for ContrastSummary {

    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mean {:+.4}; {:.0}% HDI [{:+.4}, {:+.4}]; {:.1}% > 0 ({} draws)",
            self.mean,
            100. * self.mass,
            self.hdi.low(),
            self.hdi.high(),
            100. * self.prob_above_zero,
            self.n
        )
    }

}

#[cfg(test)]
fn draw_with(switch : Switch, group_mean : Vec<f64>) -> Draw {
    Draw {
        switch,
        concentration : vec![10.; group_mean.len()],
        shared_mean : 0.5,
        group_mean,
        prob_h0 : vec![0.5],
        prob_h1 : vec![0.5]
    }
}

#[test]
fn hypothesis_probabilities_count_switch_values() {
    let draws = vec![
        draw_with(Switch::Distinct, vec![0.6, 0.5]),
        draw_with(Switch::Shared, vec![0.6, 0.5]),
        draw_with(Switch::Distinct, vec![0.6, 0.5]),
    ];
    let (p_h1, p_h0) = estimate_hypothesis_probabilities(&draws[..]).unwrap();
    assert!((p_h1 - 2. / 3.).abs() < 1E-15);
    assert_eq!(p_h1 + p_h0, 1.0);
    assert!(estimate_hypothesis_probabilities(&[]).is_none());
}

#[test]
fn contrast_uses_only_distinct_draws() {
    let draws = vec![
        draw_with(Switch::Distinct, vec![0.6, 0.5, 0.4]),
        draw_with(Switch::Shared, vec![0.1, 0.9, 0.4]),
        draw_with(Switch::Distinct, vec![0.7, 0.5, 0.4]),
    ];
    let c = pairwise_contrast(&draws[..], 0, 1).unwrap();
    assert_eq!(c.len(), 2);
    assert!((c[0] - 0.1).abs() < 1E-12);
    assert!((c[1] - 0.2).abs() < 1E-12);
    assert!(pairwise_contrast(&draws[..], 0, 3).is_none());

    let all = all_pairwise_contrasts(&draws[..]);
    let pairs : Vec<(usize, usize)> = all.iter().map(|(p, _)| *p ).collect();
    assert_eq!(pairs, vec![(0, 1), (0, 2), (1, 2)]);
    assert_eq!(switch_series(&draws[..]), vec![0., 1., 0.]);
}

#[test]
fn contrast_summary_reports_mass_above_zero() {
    let samples : Vec<f64> = (0..100).map(|i| (i as f64 - 24.5) / 100. ).collect();
    let summary = ContrastSummary::from_samples(&samples[..], 0.9).unwrap();
    assert_eq!(summary.n, 100);
    assert!((summary.prob_above_zero - 0.75).abs() < 1E-12);
    assert!((summary.mean - 0.25).abs() < 1E-12);
    assert!(summary.hdi.contains(&0.25));
    assert!(ContrastSummary::from_samples(&[], 0.9).is_none());
}
