use serde::{Serialize, Deserialize};
use std::cmp::Ordering;

/// Trait shared by structures that represents a bounded interval in the real line.
pub trait Interval {

    fn low(&self) -> f64;

    fn high(&self) -> f64;

    /// Verify if value is within the closed interval (self.low(), self.high())
    fn contains(&self, val : &f64) -> bool {
        *val >= self.low() && *val <= self.high()
    }

    fn width(&self) -> f64 {
        self.high() - self.low()
    }

}

/// Highest-density interval: the narrowest interval containing a given share
/// of the posterior samples. For unimodal posteriors this is the highest
/// posterior density region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hdi {
    low : f64,
    high : f64
}

impl Hdi {

    /// Slides a window of ceil(mass * n) sorted samples and keeps the narrowest.
    /// Returns None for empty samples, non-finite samples or mass outside (0, 1].
    pub fn from_samples(samples : &[f64], mass : f64) -> Option<Self> {
        if samples.is_empty() || !(mass > 0.0 && mass <= 1.0) || samples.iter().any(|s| !s.is_finite() ) {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal) );
        let n = sorted.len();
        let k = ((mass * n as f64).ceil() as usize).max(1).min(n);
        let (mut low, mut high) = (sorted[0], sorted[k-1]);
        for start in 1..=(n - k) {
            let (l, h) = (sorted[start], sorted[start + k - 1]);
            if h - l < high - low {
                low = l;
                high = h;
            }
        }
        Some(Self { low, high })
    }

}

impl Interval for Hdi {

    fn low(&self) -> f64 {
        self.low
    }

    fn high(&self) -> f64 {
        self.high
    }

}

#[test]
fn hdi_of_skewed_sample_hugs_the_mode() {
    // Dense cluster near zero plus a long right tail.
    let mut s : Vec<f64> = (0..90).map(|i| i as f64 / 90. ).collect();
    s.extend((0..10).map(|i| 10. + 10. * i as f64 ));
    let hdi = Hdi::from_samples(&s[..], 0.9).unwrap();
    assert_eq!(hdi.low(), 0.0);
    assert!((hdi.high() - 89. / 90.).abs() < 1E-12);
    assert!(hdi.contains(&0.5));
    assert!(!hdi.contains(&10.));
}

#[test]
fn hdi_rejects_degenerate_input() {
    assert!(Hdi::from_samples(&[], 0.9).is_none());
    assert!(Hdi::from_samples(&[1., 2.], 0.0).is_none());
    assert!(Hdi::from_samples(&[1., f64::NAN], 0.5).is_none());
    let full = Hdi::from_samples(&[3., 1., 2.], 1.0).unwrap();
    assert_eq!((full.low(), full.high()), (1., 3.));
}
