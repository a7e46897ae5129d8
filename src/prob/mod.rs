use special::Gamma as GammaFn;

/// Log-transform and logit-transform between constrained parameters and
/// the real line the gradient-based sampler moves on.
mod transform;

pub use transform::*;

/// Univariate densities used as priors in the hierarchical model. The
/// Distribution state is the parameter pair; log_prob evaluates the
/// normalized log-density at a point of the support and returns
/// negative infinity outside of it.
pub trait Univariate {

    fn log_prob(&self, x : f64) -> f64;

    /// Whether x lies strictly inside the support.
    fn in_support(&self, x : f64) -> bool;

}

/// Beta(a, b) over the open unit interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Beta {

    pub a : f64,

    pub b : f64

}

impl Beta {

    pub fn new(a : f64, b : f64) -> Self {
        Self { a, b }
    }

    /// Mean/concentration parametrization: a = mean * conc, b = (1 - mean) * conc.
    pub fn from_mean(mean : f64, conc : f64) -> Self {
        Self { a : mean * conc, b : (1. - mean) * conc }
    }

    /// Log of the Beta function B(a, b), the normalizing constant.
    pub fn ln_norm(&self) -> f64 {
        ln_beta(self.a, self.b)
    }

    /// Log-density written in terms of ln(x) and ln(1-x), which the caller
    /// may have computed more precisely than from x itself.
    pub fn log_prob_ln(&self, ln_x : f64, ln_1mx : f64) -> f64 {
        (self.a - 1.0)*ln_x + (self.b - 1.0)*ln_1mx - self.ln_norm()
    }

}

impl Univariate for Beta {

    // Reference: https://github.com/kthohr/stats/blob/master/include/stats_incl/dens/dbeta.ipp
    fn log_prob(&self, x : f64) -> f64 {
        if !self.in_support(x) {
            return f64::NEG_INFINITY;
        }
        self.log_prob_ln(x.ln(), (1.0 - x).ln())
    }

    fn in_support(&self, x : f64) -> bool {
        x > 0.0 && x < 1.0
    }

}

/// Gamma distribution parametrized by shape and rate (inverse scale).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gamma {

    pub shape : f64,

    pub rate : f64

}

impl Gamma {

    pub fn new(shape : f64, rate : f64) -> Self {
        Self { shape, rate }
    }

    pub fn mean(&self) -> f64 {
        self.shape / self.rate
    }

}

impl Univariate for Gamma {

    // Reference: stats::dgamma.ipp
    fn log_prob(&self, x : f64) -> f64 {
        if !self.in_support(x) {
            return f64::NEG_INFINITY;
        }
        self.shape*self.rate.ln() - ln_gamma(self.shape) + (self.shape - 1.0)*x.ln() - self.rate*x
    }

    fn in_support(&self, x : f64) -> bool {
        x > 0.0 && x.is_finite()
    }

}

pub fn ln_gamma(x : f64) -> f64 {
    GammaFn::ln_gamma(x).0
}

pub fn digamma(x : f64) -> f64 {
    GammaFn::digamma(x)
}

pub fn ln_beta(a : f64, b : f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

//Reference: gcem::log_binomial_coef
pub fn log_binomial_coef(n : u64, k : u64) -> f64 {
    ln_gamma((n+1) as f64) - ( ln_gamma((k+1) as f64) + ln_gamma((n-k+1) as f64) )
}

/// Binomial log-mass of k successes in n trials. The degenerate terms are
/// skipped at k == 0 and k == n so that theta at exactly 0 or 1 yields
/// finite values where the mass is 1. Reference: stats::dbinom.ipp
pub fn binomial_log_prob(k : u64, n : u64, theta : f64) -> f64 {
    if k > n || !(0.0..=1.0).contains(&theta) {
        return f64::NEG_INFINITY;
    }
    if k == 0 {
        (n as f64)*(1. - theta).ln()
    } else if k == n {
        (k as f64) * theta.ln()
    } else {
        log_binomial_coef(n, k) + (k as f64)*theta.ln() + ((n - k) as f64)*(1. - theta).ln()
    }
}

/// Beta-binomial log-mass: k successes in n trials when the success
/// probability is itself Beta(a, b) and has been integrated out,
/// C(n, k) B(k + a, n - k + b) / B(a, b). Negative infinity when k > n or
/// either shape is not positive and finite.
pub fn beta_binomial_log_prob(k : u64, n : u64, a : f64, b : f64) -> f64 {
    if k > n || !is_positive(a) || !is_positive(b) {
        return f64::NEG_INFINITY;
    }
    log_binomial_coef(n, k) + ln_beta(k as f64 + a, (n - k) as f64 + b) - ln_beta(a, b)
}

#[cfg(test)]
const EPS : f64 = 1E-8;

#[test]
fn beta_uniform_is_flat() {
    let beta = Beta::new(1., 1.);
    for x in [0.01, 0.3, 0.5, 0.99].iter() {
        assert!(beta.log_prob(*x).abs() < EPS);
    }
    assert_eq!(beta.log_prob(0.0), f64::NEG_INFINITY);
    assert_eq!(beta.log_prob(1.0), f64::NEG_INFINITY);
}

#[test]
fn beta_known_density() {
    // Beta(2, 3) has density 12 x (1-x)^2.
    let beta = Beta::from_mean(0.4, 5.);
    let x : f64 = 0.25;
    let expected = (12. * x * (1. - x).powi(2)).ln();
    assert!((beta.log_prob(x) - expected).abs() < EPS);
}

#[test]
fn gamma_known_density() {
    // Gamma(shape = 1, rate = 0.1) is the exponential with mean 10.
    let gamma = Gamma::new(1.0, 0.1);
    assert!((gamma.mean() - 10.).abs() < EPS);
    let x = 4.0;
    assert!((gamma.log_prob(x) - (0.1f64.ln() - 0.4)).abs() < EPS);
    assert_eq!(gamma.log_prob(-1.0), f64::NEG_INFINITY);

    // Gamma(shape = 3, rate = 2): 2^3 x^2 e^{-2x} / 2!
    let gamma = Gamma::new(3.0, 2.0);
    let expected = (4. * 1.5f64.powi(2) * (-3.0f64).exp()).ln();
    assert!((gamma.log_prob(1.5) - expected).abs() < EPS);
}

#[test]
fn binomial_mass_sums_to_one() {
    for theta in [0.0, 0.13, 0.5, 0.87, 1.0].iter() {
        let total : f64 = (0..=20).map(|k| binomial_log_prob(k, 20, *theta).exp() ).sum();
        assert!((total - 1.0).abs() < 1E-10, "theta = {}: total mass {}", theta, total);
    }
    assert!((binomial_log_prob(3, 10, 0.5) - (120.0f64 / 1024.).ln()).abs() < EPS);
    assert_eq!(binomial_log_prob(11, 10, 0.5), f64::NEG_INFINITY);
}

#[test]
fn digamma_matches_recurrence() {
    // psi(x + 1) = psi(x) + 1/x
    for x in [0.05, 0.7, 3.2, 41.0].iter() {
        assert!((digamma(x + 1.) - digamma(*x) - 1. / x).abs() < 1E-7);
    }
}

#[test]
fn beta_binomial_mass_sums_to_one() {
    // Under a uniform success probability every count is equally likely.
    for k in 0..=12 {
        assert!((beta_binomial_log_prob(k, 12, 1., 1.) - (1f64 / 13.).ln()).abs() < EPS);
    }
    for (a, b) in [(0.3, 0.3), (2.5, 7.0), (40., 1.5)].iter() {
        let total : f64 = (0..=20).map(|k| beta_binomial_log_prob(k, 20, *a, *b).exp() ).sum();
        assert!((total - 1.0).abs() < 1E-10, "Beta({}, {}): total mass {}", a, b, total);
    }

    // A very concentrated Beta approaches the binomial at its mean.
    let bb = beta_binomial_log_prob(7, 20, 0.3 * 1E7, 0.7 * 1E7);
    assert!((bb - binomial_log_prob(7, 20, 0.3)).abs() < 1E-3);
    assert_eq!(beta_binomial_log_prob(3, 20, f64::INFINITY, 1.), f64::NEG_INFINITY);
    assert_eq!(beta_binomial_log_prob(21, 20, 1., 1.), f64::NEG_INFINITY);
}
