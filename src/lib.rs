/// Error taxonomy shared by every module: input validation, model construction
/// and numerical failures during sampling.
pub mod error;

/// Subject-level count data (group label, trials, successes), its CSV
/// representation and a seeded simulator for synthetic designs.
pub mod sample;

/// Log-densities of the distributions the model is built from (Beta, Gamma,
/// Binomial) and the transforms between constrained and unconstrained scales.
pub mod prob;

/// The hierarchical model comparing a shared mean (H0) against distinct group
/// means (H1) through a binary switch variable.
pub mod model;

/// Composite MCMC sampler: a jump between hypotheses, an exact Gibbs update
/// of the switch and subject-level probabilities, then a Hamiltonian
/// transition over the continuous parameters.
pub mod fit;

/// Posterior summaries over sampled draws: hypothesis probabilities, group
/// contrasts, credible intervals and convergence diagnostics.
pub mod approx;

pub use error::{Error, ValidationError};

pub use sample::Data;

pub use model::{HierarchicalModel, Hyper, Switch, Draw};

pub use fit::{Settings, Trace, sample_chains};

pub use approx::{estimate_hypothesis_probabilities, pairwise_contrast};
