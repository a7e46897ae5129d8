use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Binomial, Distribution};
use serde::{Serialize, Deserialize};
use crate::error::{Error, ValidationError};
use super::Data;

/// Experimental design used to generate fictitious subject tables: every
/// group has n_subjects_per_group subjects, each running n_trials_per_subject
/// trials with the group's success probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Design {

    /// Success probability of each group. Its length is the number of groups.
    pub group_probs : Vec<f64>,

    pub n_subjects_per_group : usize,

    pub n_trials_per_subject : u64,

    pub seed : u64

}

impl Default for Design {

    /// Four groups of 20 subjects x 20 trials, one of them odd.
    fn default() -> Self {
        Self {
            group_probs : vec![0.61, 0.50, 0.49, 0.51],
            n_subjects_per_group : 20,
            n_trials_per_subject : 20,
            seed : 47401
        }
    }

}

impl Design {

    pub fn n_groups(&self) -> usize {
        self.group_probs.len()
    }

    /// Draws n_correct ~ Binomial(n_trials, p_g) for every subject, groups
    /// labeled 0..n_groups and laid out contiguously.
    pub fn simulate(&self) -> Result<Data, Error> {
        if self.n_trials_per_subject == 0 {
            return Err(ValidationError::ZeroTrials { index : 0 }.into());
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let n = self.n_groups() * self.n_subjects_per_group;
        let (mut groups, mut trials, mut correct) = (
            Vec::with_capacity(n),
            Vec::with_capacity(n),
            Vec::with_capacity(n)
        );
        for (g, p) in self.group_probs.iter().enumerate() {
            let binom = Binomial::new(self.n_trials_per_subject, *p)
                .map_err(|e| Error::ModelMisspecification(format!("Group {} probability {}: {:?}", g, p, e)) )?;
            for _ in 0..self.n_subjects_per_group {
                groups.push(g as i64);
                trials.push(self.n_trials_per_subject as i64);
                correct.push(binom.sample(&mut rng) as i64);
            }
        }
        Ok(Data::load(&groups[..], &trials[..], &correct[..])?)
    }

}

#[test]
fn simulate_follows_design() {
    let design = Design::default();
    let data = design.simulate().unwrap();
    assert_eq!(data.n_subjects(), 80);
    assert_eq!(data.n_groups(), 4);
    assert!(data.subjects().iter().all(|s| s.n_trials == 20 && s.n_correct <= 20 ));
    assert_eq!(data, design.simulate().unwrap());
}

#[test]
fn simulate_rejects_invalid_probability() {
    let design = Design { group_probs : vec![0.5, 1.5], ..Design::default() };
    assert!(matches!(design.simulate(), Err(Error::ModelMisspecification(_))));
}
