/// ln(1 + e^x) without overflow for large x.
pub fn softplus(x : f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// Inverse of the logit: maps the real line to (0, 1).
pub fn sigmoid(v : f64) -> f64 {
    if v >= 0.0 {
        1.0 / (1.0 + (-v).exp())
    } else {
        let e = v.exp();
        e / (1.0 + e)
    }
}

pub fn logit(p : f64) -> f64 {
    p.ln() - (-p).ln_1p()
}

/// ln(sigmoid(v)), accurate where sigmoid(v) rounds to 1.
pub fn ln_sigmoid(v : f64) -> f64 {
    -softplus(-v)
}

/// ln(1 - sigmoid(v)), accurate where sigmoid(v) rounds to 0.
pub fn ln_one_minus_sigmoid(v : f64) -> f64 {
    -softplus(v)
}

/// Log-absolute-Jacobian of p = sigmoid(v): ln p + ln(1 - p).
pub fn logit_log_jacobian(v : f64) -> f64 {
    ln_sigmoid(v) + ln_one_minus_sigmoid(v)
}

/// A probability is valid when it lies strictly inside (0, 1). A sigmoid
/// evaluated far enough into the tails rounds onto the boundary, and those
/// values are rejected rather than clamped.
pub fn is_open_unit(p : f64) -> bool {
    p > 0.0 && p < 1.0
}

/// A concentration is valid when it is strictly positive and finite.
pub fn is_positive(c : f64) -> bool {
    c > 0.0 && c.is_finite()
}

#[test]
fn sigmoid_inverts_logit() {
    for p in [1E-9, 0.01, 0.5, 0.73, 1. - 1E-9].iter() {
        assert!((sigmoid(logit(*p)) - p).abs() < 1E-12);
    }
}

#[test]
fn log_sigmoid_is_stable_in_tails() {
    assert!((ln_sigmoid(0.0) - 0.5f64.ln()).abs() < 1E-14);
    assert!((ln_sigmoid(-800.) + 800.).abs() < 1E-9);
    assert!((ln_one_minus_sigmoid(800.) + 800.).abs() < 1E-9);
    assert!(ln_sigmoid(800.).abs() < 1E-300);
    assert!(!is_open_unit(sigmoid(800.)));
    assert!(!is_open_unit(sigmoid(-800.)));
    assert!(is_open_unit(sigmoid(30.)));
}
