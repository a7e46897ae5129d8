use nalgebra::DVector;
use serde::{Serialize, Deserialize};
use std::convert::TryFrom;
use std::fmt::{self, Display};
use crate::prob::{self, sigmoid, logit};

/// Model indicator. Index 0 selects H1 (each group has its own mean),
/// index 1 selects H0 (all groups share one mean). Serialized as the
/// integer index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Switch {

    /// H1: distinct group means.
    Distinct,

    /// H0: one shared mean.
    Shared

}

impl Switch {

    pub const ALL : [Switch; 2] = [Switch::Distinct, Switch::Shared];

    pub fn index(self) -> u8 {
        match self {
            Switch::Distinct => 0,
            Switch::Shared => 1
        }
    }

    /// The competing hypothesis.
    pub fn other(self) -> Self {
        match self {
            Switch::Distinct => Switch::Shared,
            Switch::Shared => Switch::Distinct
        }
    }

    pub fn from_index(ix : u8) -> Option<Self> {
        match ix {
            0 => Some(Switch::Distinct),
            1 => Some(Switch::Shared),
            _ => None
        }
    }

}

impl From<Switch> for u8 {

    fn from(s : Switch) -> u8 {
        s.index()
    }

}

impl TryFrom<u8> for Switch {

    type Error = String;

    fn try_from(ix : u8) -> Result<Self, String> {
        Switch::from_index(ix).ok_or_else(|| format!("Invalid model index {}", ix) )
    }

}

impl Display for Switch {

    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Switch::Distinct => write!(f, "H1 (distinct means)"),
            Switch::Shared => write!(f, "H0 (shared mean)")
        }
    }

}

/// Selects the success probability that feeds the likelihood of one subject.
pub fn active_prob(switch : Switch, prob_h0 : f64, prob_h1 : f64) -> f64 {
    match switch {
        Switch::Distinct => prob_h1,
        Switch::Shared => prob_h0
    }
}

/// Position of every continuous parameter in the unconstrained vector the
/// continuous-block sampler moves on:
/// [ log concentration (n_groups) | logit shared_mean (1) | logit group_mean (n_groups) |
///   logit prob_h0 (n_subjects) | logit prob_h1 (n_subjects) ]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {

    pub n_groups : usize,

    pub n_subjects : usize

}

impl Layout {

    pub fn new(n_groups : usize, n_subjects : usize) -> Self {
        Self { n_groups, n_subjects }
    }

    pub fn dim(&self) -> usize {
        2*self.n_groups + 1 + 2*self.n_subjects
    }

    pub fn concentration(&self, g : usize) -> usize {
        g
    }

    pub fn shared_mean(&self) -> usize {
        self.n_groups
    }

    pub fn group_mean(&self, g : usize) -> usize {
        self.n_groups + 1 + g
    }

    pub fn prob_h0(&self, i : usize) -> usize {
        2*self.n_groups + 1 + i
    }

    pub fn prob_h1(&self, i : usize) -> usize {
        2*self.n_groups + 1 + self.n_subjects + i
    }

    /// Index of the mean that group g draws its subject-level probabilities
    /// around under the informed branch.
    pub fn mean(&self, branch : Switch, g : usize) -> usize {
        match branch {
            Switch::Distinct => self.group_mean(g),
            Switch::Shared => self.shared_mean()
        }
    }

    /// Every mean of the informed branch: the shared mean alone, or one per group.
    pub fn means(&self, branch : Switch) -> Vec<usize> {
        match branch {
            Switch::Distinct => (0..self.n_groups).map(|g| self.group_mean(g) ).collect(),
            Switch::Shared => vec![self.shared_mean()]
        }
    }

    /// Index of the subject-level probability of the informed branch.
    pub fn prob(&self, branch : Switch, i : usize) -> usize {
        match branch {
            Switch::Distinct => self.prob_h1(i),
            Switch::Shared => self.prob_h0(i)
        }
    }

}

/// One complete assignment of values to every model parameter, on the
/// constrained scale. This is the record the sampler emits per iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draw {

    pub switch : Switch,

    pub concentration : Vec<f64>,

    pub shared_mean : f64,

    pub group_mean : Vec<f64>,

    pub prob_h0 : Vec<f64>,

    pub prob_h1 : Vec<f64>

}

impl Draw {

    /// Subject-level probabilities selected by the switch.
    pub fn active_probs(&self) -> Vec<f64> {
        self.prob_h0.iter()
            .zip(self.prob_h1.iter())
            .map(|(p0, p1)| active_prob(self.switch, *p0, *p1) )
            .collect()
    }

    /// Every probability strictly inside (0, 1) and every concentration strictly positive.
    pub fn in_support(&self) -> bool {
        self.concentration.iter().all(|c| prob::is_positive(*c) ) &&
            prob::is_open_unit(self.shared_mean) &&
            self.group_mean.iter().all(|m| prob::is_open_unit(*m) ) &&
            self.prob_h0.iter().all(|p| prob::is_open_unit(*p) ) &&
            self.prob_h1.iter().all(|p| prob::is_open_unit(*p) )
    }

}

/// In-progress chain state. The continuous parameters live on the
/// unconstrained scale described by Layout; the switch is held apart since
/// it is updated by its own exact step.
#[derive(Debug, Clone, PartialEq)]
pub struct State {

    pub switch : Switch,

    pub position : DVector<f64>

}

impl State {

    pub fn to_draw(&self, layout : &Layout) -> Draw {
        let q = &self.position;
        Draw {
            switch : self.switch,
            concentration : (0..layout.n_groups).map(|g| q[layout.concentration(g)].exp() ).collect(),
            shared_mean : sigmoid(q[layout.shared_mean()]),
            group_mean : (0..layout.n_groups).map(|g| sigmoid(q[layout.group_mean(g)]) ).collect(),
            prob_h0 : (0..layout.n_subjects).map(|i| sigmoid(q[layout.prob_h0(i)]) ).collect(),
            prob_h1 : (0..layout.n_subjects).map(|i| sigmoid(q[layout.prob_h1(i)]) ).collect()
        }
    }

    /// Maps a constrained draw back to the unconstrained scale. Returns None if
    /// the draw does not match the layout dimensions or lies outside the support.
    pub fn from_draw(draw : &Draw, layout : &Layout) -> Option<Self> {
        if draw.concentration.len() != layout.n_groups || draw.group_mean.len() != layout.n_groups ||
            draw.prob_h0.len() != layout.n_subjects || draw.prob_h1.len() != layout.n_subjects ||
            !draw.in_support()
        {
            return None;
        }
        let mut position = DVector::zeros(layout.dim());
        for g in 0..layout.n_groups {
            position[layout.concentration(g)] = draw.concentration[g].ln();
            position[layout.group_mean(g)] = logit(draw.group_mean[g]);
        }
        position[layout.shared_mean()] = logit(draw.shared_mean);
        for i in 0..layout.n_subjects {
            position[layout.prob_h0(i)] = logit(draw.prob_h0[i]);
            position[layout.prob_h1(i)] = logit(draw.prob_h1[i]);
        }
        Some(Self { switch : draw.switch, position })
    }

}

#[test]
fn active_prob_follows_switch() {
    assert_eq!(active_prob(Switch::Distinct, 0.2, 0.7), 0.7);
    assert_eq!(active_prob(Switch::Shared, 0.2, 0.7), 0.2);
}

#[test]
fn switch_serializes_as_index() {
    assert_eq!(serde_json::to_string(&Switch::Distinct).unwrap(), "0");
    assert_eq!(serde_json::to_string(&Switch::Shared).unwrap(), "1");
    let s : Switch = serde_json::from_str("1").unwrap();
    assert_eq!(s, Switch::Shared);
    assert!(serde_json::from_str::<Switch>("2").is_err());
}

#[test]
fn branch_means_follow_layout() {
    let layout = Layout::new(3, 5);
    assert_eq!(layout.means(Switch::Shared), vec![3]);
    assert_eq!(layout.means(Switch::Distinct), vec![4, 5, 6]);
    assert_eq!(layout.mean(Switch::Shared, 2), layout.shared_mean());
    assert_eq!(layout.mean(Switch::Distinct, 2), layout.group_mean(2));
    assert_eq!(Switch::Shared.other(), Switch::Distinct);
    assert_eq!(Switch::Distinct.other().other(), Switch::Distinct);
}

#[test]
fn layout_indices_are_disjoint() {
    let layout = Layout::new(3, 5);
    let mut ixs : Vec<usize> = (0..3).map(|g| layout.concentration(g) )
        .chain(std::iter::once(layout.shared_mean()))
        .chain((0..3).map(|g| layout.group_mean(g) ))
        .chain((0..5).map(|i| layout.prob_h0(i) ))
        .chain((0..5).map(|i| layout.prob_h1(i) ))
        .collect();
    ixs.sort();
    ixs.dedup();
    assert_eq!(ixs, (0..layout.dim()).collect::<Vec<_>>());
}

#[test]
fn state_maps_back_from_draw() {
    let layout = Layout::new(2, 3);
    let draw = Draw {
        switch : Switch::Shared,
        concentration : vec![2.5, 40.],
        shared_mean : 0.45,
        group_mean : vec![0.3, 0.6],
        prob_h0 : vec![0.1, 0.5, 0.9],
        prob_h1 : vec![0.2, 0.4, 0.6]
    };
    let state = State::from_draw(&draw, &layout).unwrap();
    let back = state.to_draw(&layout);
    assert_eq!(back.switch, Switch::Shared);
    assert!((back.concentration[1] - 40.).abs() < 1E-10);
    assert!((back.prob_h0[2] - 0.9).abs() < 1E-12);
    assert_eq!(back.active_probs().len(), 3);
    assert!((back.active_probs()[0] - 0.1).abs() < 1E-12);

    let mut bad = draw.clone();
    bad.prob_h1[0] = 1.0;
    assert!(State::from_draw(&bad, &layout).is_none());
}
