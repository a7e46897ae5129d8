use thiserror::Error;

/// Malformed input data. Always fatal: the data container is never
/// built from rows that break these rules.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {

    #[error("Column lengths disagree (groups: {groups}, trials: {trials}, correct: {correct})")]
    LengthMismatch { groups : usize, trials : usize, correct : usize },

    #[error("Negative {column} count {value} at subject {index}")]
    NegativeCount { column : &'static str, index : usize, value : i64 },

    #[error("Subject {index} has zero trials")]
    ZeroTrials { index : usize },

    #[error("Subject {index} has {n_correct} successes out of {n_trials} trials")]
    ExceedsTrials { index : usize, n_correct : i64, n_trials : i64 },

    #[error("Could not parse table row {row}: {msg}")]
    Csv { row : usize, msg : String },

    #[error("Could not read table: {0}")]
    Io(String)

}

/// Errors raised while building the model or running the sampler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Degenerate model shape or invalid constants, raised before sampling starts.
    #[error("Model misspecification: {0}")]
    ModelMisspecification(String),

    /// The density kept evaluating to a non-finite value and the retry budget ran out.
    #[error("Non-finite density at iteration {iteration} after {retries} consecutive retries")]
    NumericalInstability { iteration : usize, retries : usize }

}
