use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use crate::error::ValidationError;

/// Delimited-text input and output for subject tables.
mod csv;

pub use self::csv::*;

/// Synthetic subject tables drawn from known group success rates.
mod design;

pub use design::*;

/// One experimental unit: the group it belongs to (as a dense index into
/// the group labels of its Data), how many trials it ran and how many of
/// those were successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {

    pub group : usize,

    pub n_trials : u64,

    pub n_correct : u64

}

impl Subject {

    /// Number of failed trials.
    pub fn n_wrong(&self) -> u64 {
        self.n_trials - self.n_correct
    }

}

/// Immutable, validated collection of subjects. Group labels are arbitrary
/// integers at load time; they are mapped to dense indices 0..n_groups in
/// ascending label order, which is the order hierarchical parameters are
/// indexed by.
#[derive(Debug, Clone, PartialEq)]
pub struct Data {

    subjects : Vec<Subject>,

    labels : Vec<i64>

}

impl Data {

    /// Validates and packs three equal-length columns into a Data container.
    pub fn load(
        group_ids : &[i64],
        trial_counts : &[i64],
        success_counts : &[i64]
    ) -> Result<Self, ValidationError> {
        if group_ids.len() != trial_counts.len() || group_ids.len() != success_counts.len() {
            return Err(ValidationError::LengthMismatch {
                groups : group_ids.len(),
                trials : trial_counts.len(),
                correct : success_counts.len()
            });
        }

        let mut dense : BTreeMap<i64, usize> = group_ids.iter().map(|g| (*g, 0) ).collect();
        for (ix, v) in dense.values_mut().enumerate() {
            *v = ix;
        }
        let labels : Vec<i64> = dense.keys().cloned().collect();

        let mut subjects = Vec::with_capacity(group_ids.len());
        for (index, ((g, n), k)) in group_ids.iter().zip(trial_counts).zip(success_counts).enumerate() {
            if *n < 0 {
                return Err(ValidationError::NegativeCount { column : "trial", index, value : *n });
            }
            if *k < 0 {
                return Err(ValidationError::NegativeCount { column : "success", index, value : *k });
            }
            if *n == 0 {
                return Err(ValidationError::ZeroTrials { index });
            }
            if k > n {
                return Err(ValidationError::ExceedsTrials { index, n_correct : *k, n_trials : *n });
            }
            subjects.push(Subject { group : dense[g], n_trials : *n as u64, n_correct : *k as u64 });
        }
        Ok(Self { subjects, labels })
    }

    pub fn n_subjects(&self) -> usize {
        self.subjects.len()
    }

    pub fn n_groups(&self) -> usize {
        self.labels.len()
    }

    pub fn subject(&self, ix : usize) -> Option<&Subject> {
        self.subjects.get(ix)
    }

    pub fn subjects(&self) -> &[Subject] {
        &self.subjects[..]
    }

    /// Original group labels, in dense-index order.
    pub fn group_labels(&self) -> &[i64] {
        &self.labels[..]
    }

    /// Dense group index of the subject at ix.
    pub fn group_of(&self, ix : usize) -> Option<usize> {
        self.subjects.get(ix).map(|s| s.group )
    }

    pub fn n_trials(&self, ix : usize) -> Option<u64> {
        self.subjects.get(ix).map(|s| s.n_trials )
    }

    pub fn n_correct(&self, ix : usize) -> Option<u64> {
        self.subjects.get(ix).map(|s| s.n_correct )
    }

    /// Summed (successes, trials) over every subject of group g.
    pub fn group_counts(&self, g : usize) -> (u64, u64) {
        self.subjects.iter()
            .filter(|s| s.group == g )
            .fold((0, 0), |(k, n), s| (k + s.n_correct, n + s.n_trials) )
    }

    /// Summed (successes, trials) over all subjects.
    pub fn pooled_counts(&self) -> (u64, u64) {
        self.subjects.iter()
            .fold((0, 0), |(k, n), s| (k + s.n_correct, n + s.n_trials) )
    }

}

impl Display for Data {

    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Data ({} subjects, {} groups)", self.n_subjects(), self.n_groups())?;
        for (g, label) in self.labels.iter().enumerate() {
            let (k, n) = self.group_counts(g);
            write!(f, "\n  group {}: {}/{} correct", label, k, n)?;
        }
        Ok(())
    }

}

#[test]
fn load_maps_labels_to_dense_indices() {
    let data = Data::load(&[7, 3, 7, 3, 5], &[10, 10, 10, 10, 10], &[1, 2, 3, 4, 5]).unwrap();
    assert_eq!(data.n_subjects(), 5);
    assert_eq!(data.n_groups(), 3);
    assert_eq!(data.group_labels(), &[3, 5, 7]);
    assert_eq!(data.group_of(0), Some(2));
    assert_eq!(data.group_of(4), Some(1));
    assert_eq!(data.group_counts(0), (6, 20));
    assert_eq!(data.pooled_counts(), (15, 50));
}

#[test]
fn load_rejects_malformed_columns() {
    assert_eq!(
        Data::load(&[0, 1], &[10], &[1, 2]),
        Err(ValidationError::LengthMismatch { groups : 2, trials : 1, correct : 2 })
    );
    assert_eq!(
        Data::load(&[0, 1], &[10, 10], &[11, 2]),
        Err(ValidationError::ExceedsTrials { index : 0, n_correct : 11, n_trials : 10 })
    );
    assert_eq!(
        Data::load(&[0, 1], &[10, -1], &[1, 0]),
        Err(ValidationError::NegativeCount { column : "trial", index : 1, value : -1 })
    );
    assert_eq!(
        Data::load(&[0], &[10], &[-3]),
        Err(ValidationError::NegativeCount { column : "success", index : 0, value : -3 })
    );
    assert_eq!(Data::load(&[0], &[0], &[0]), Err(ValidationError::ZeroTrials { index : 0 }));
}

#[test]
fn empty_columns_are_valid_data() {
    let data = Data::load(&[], &[], &[]).unwrap();
    assert_eq!(data.n_subjects(), 0);
    assert_eq!(data.n_groups(), 0);
}
