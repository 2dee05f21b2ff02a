pub mod builder;

pub use builder::{LatticeBuild, LatticeBuilder};

use crate::error::{Error, Result};
use crate::logmath::{log_add, LOG0};

/// One weighted arc. Arc labels use the epsilon convention: `0` is the
/// empty label, a segment label `lab` is carried as `lab + 1`. Weights are
/// costs, the negated log-domain scores.
#[derive(Debug, Clone, PartialEq)]
pub struct LatticeArc {
    pub ilabel: usize,
    pub olabel: usize,
    pub weight: f64,
    pub nextstate: usize,
}

impl LatticeArc {
    pub fn new(ilabel: usize, olabel: usize, weight: f64, nextstate: usize) -> Self {
        LatticeArc {
            ilabel,
            olabel,
            weight,
            nextstate,
        }
    }

    /// Arc carrying no label, used for boundary and normalization arcs.
    pub fn epsilon(weight: f64, nextstate: usize) -> Self {
        LatticeArc::new(0, 0, weight, nextstate)
    }
}

/// Best path through a lattice: its total cost and the arcs along it.
#[derive(Debug, Clone, PartialEq)]
pub struct LatticePath {
    pub cost: f64,
    pub arcs: Vec<LatticeArc>,
}

impl LatticePath {
    /// Output labels along the path with epsilon arcs dropped and the
    /// epsilon shift removed.
    pub fn output_labels(&self) -> Vec<usize> {
        self.arcs
            .iter()
            .filter(|arc| arc.olabel != 0)
            .map(|arc| arc.olabel - 1)
            .collect()
    }
}

/// Arc-list acceptor over cost weights.
///
/// The decoders emit states in search order, so every arc of a decoding
/// lattice points to a higher-numbered state and the path algorithms run
/// in one index-order sweep. Alignment automata carry self-loops and are
/// meant for composition against a recognizer, not for the sweeps here;
/// both algorithms reject them.
#[derive(Debug, Clone, Default)]
pub struct Lattice {
    arcs: Vec<Vec<LatticeArc>>,
    finals: Vec<Option<f64>>,
    start: Option<usize>,
}

impl Lattice {
    pub fn new() -> Self {
        Lattice::default()
    }

    /// Adds a state and returns its id. Ids are dense from zero.
    pub fn add_state(&mut self) -> usize {
        self.arcs.push(Vec::new());
        self.finals.push(None);
        self.arcs.len() - 1
    }

    /// # Panics
    /// If `state` does not exist.
    pub fn set_start(&mut self, state: usize) {
        assert!(state < self.arcs.len(), "state {state} does not exist");
        self.start = Some(state);
    }

    pub fn start(&self) -> Option<usize> {
        self.start
    }

    /// # Panics
    /// If either endpoint does not exist.
    pub fn add_arc(&mut self, state: usize, arc: LatticeArc) {
        assert!(state < self.arcs.len(), "state {state} does not exist");
        assert!(
            arc.nextstate < self.arcs.len(),
            "state {} does not exist",
            arc.nextstate
        );
        self.arcs[state].push(arc);
    }

    /// Marks `state` final with the given exit cost.
    ///
    /// # Panics
    /// If `state` does not exist.
    pub fn set_final(&mut self, state: usize, weight: f64) {
        assert!(state < self.arcs.len(), "state {state} does not exist");
        self.finals[state] = Some(weight);
    }

    pub fn final_weight(&self, state: usize) -> Option<f64> {
        self.finals.get(state).copied().flatten()
    }

    pub fn num_states(&self) -> usize {
        self.arcs.len()
    }

    pub fn num_arcs(&self) -> usize {
        self.arcs.iter().map(Vec::len).sum()
    }

    /// Arcs leaving `state`.
    ///
    /// # Panics
    /// If `state` does not exist.
    pub fn arcs(&self, state: usize) -> &[LatticeArc] {
        &self.arcs[state]
    }

    /// Minimum-cost complete path from the start state to a final state.
    ///
    /// # Errors
    /// `Error::InvalidInput` when there is no start state, when a
    /// reachable arc points backward (the lattice is not in search
    /// order), or when no final state is reachable.
    pub fn shortest_path(&self) -> Result<LatticePath> {
        let start = self
            .start
            .ok_or_else(|| Error::invalid_input("lattice has no start state"))?;
        let n = self.num_states();
        let mut dist = vec![f64::INFINITY; n];
        let mut pred: Vec<Option<(usize, usize)>> = vec![None; n];
        dist[start] = 0.0;
        for s in 0..n {
            if dist[s].is_infinite() {
                continue;
            }
            for (k, arc) in self.arcs[s].iter().enumerate() {
                if arc.nextstate <= s {
                    return Err(Error::invalid_input(
                        "lattice is not in search order, cannot take its shortest path",
                    ));
                }
                let cand = dist[s] + arc.weight;
                if cand < dist[arc.nextstate] {
                    dist[arc.nextstate] = cand;
                    pred[arc.nextstate] = Some((s, k));
                }
            }
        }

        let mut best: Option<(usize, f64)> = None;
        for s in 0..n {
            if let Some(w) = self.finals[s] {
                let total = dist[s] + w;
                if total.is_finite() && best.map_or(true, |(_, cost)| total < cost) {
                    best = Some((s, total));
                }
            }
        }
        let (mut state, cost) =
            best.ok_or_else(|| Error::invalid_input("no complete path through the lattice"))?;
        let mut arcs = Vec::new();
        while let Some((prev, k)) = pred[state] {
            arcs.push(self.arcs[prev][k].clone());
            state = prev;
        }
        arcs.reverse();
        Ok(LatticePath { cost, arcs })
    }

    /// Log-domain sum of `exp(-cost)` over every complete path. A lattice
    /// normalized by the partition function totals zero.
    ///
    /// # Errors
    /// Same conditions as [`shortest_path`](Self::shortest_path), except
    /// that having no reachable final state yields mass [`LOG0`] rather
    /// than an error.
    pub fn path_mass(&self) -> Result<f64> {
        let start = self
            .start
            .ok_or_else(|| Error::invalid_input("lattice has no start state"))?;
        let n = self.num_states();
        let mut mass = vec![LOG0; n];
        mass[start] = 0.0;
        for s in 0..n {
            if mass[s] == LOG0 {
                continue;
            }
            for arc in &self.arcs[s] {
                if arc.nextstate <= s {
                    return Err(Error::invalid_input(
                        "lattice is not in search order, cannot sum its paths",
                    ));
                }
                mass[arc.nextstate] = log_add(mass[arc.nextstate], mass[s] - arc.weight);
            }
        }
        let mut total = LOG0;
        for (s, final_weight) in self.finals.iter().enumerate() {
            if let Some(w) = final_weight {
                total = log_add(total, mass[s] - w);
            }
        }
        Ok(total)
    }
}
