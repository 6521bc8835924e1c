//! Multiscale path bookkeeping for the scattering cascade.
//!
//! A *scale path* `(j1, .., jk)` selects one band-pass (or terminal low-pass)
//! filter per convolution layer. Paths are enumerated once per `(r, J, Q)`
//! configuration and assigned dense, stable indices; every description built
//! by the model layers refers back to this mapping, so the enumeration order
//! is part of the crate's public contract:
//!
//! - order 1 first, in increasing scale (low-pass last),
//! - then order 2 in lexicographic order, and so on.
//!
//! Admissibility: each extension must strictly increase the octave. Octaves
//! are compared across layers by cross-multiplication
//! (`j_next * Q_prev > j_prev * Q_next`) so that layers with different voice
//! counts share a common grid. The low-pass index `J*Q` of a layer is always
//! admissible and terminates the path.
use std::collections::HashMap;

use crate::scattering::errors::{ScatResult, ScatteringError};

/// Enumerates admissible scale paths and owns the path <-> index bijection.
///
/// Immutable once constructed; identical `(r, J, Q)` inputs always produce
/// the identical enumeration.
#[derive(Debug, Clone)]
pub struct ScaleIndexer {
    r: usize,
    octaves: Vec<usize>,
    voices: Vec<usize>,
    paths: Vec<Vec<usize>>,
    order_start: Vec<usize>,
    lookup: HashMap<Vec<usize>, usize>,
}

impl ScaleIndexer {
    /// Enumerate all admissible paths for `r` layers with per-layer octave
    /// counts `octaves` and voices per octave `voices`.
    ///
    /// # Errors
    /// - [`ScatteringError::InvalidLayerCount`] if `r == 0`.
    /// - [`ScatteringError::LayerListMismatch`] if a list is not `r` long.
    /// - [`ScatteringError::EmptyScaleGrid`] if any layer has `J * Q == 0`.
    pub fn new(r: usize, octaves: Vec<usize>, voices: Vec<usize>) -> ScatResult<Self> {
        if r == 0 {
            return Err(ScatteringError::InvalidLayerCount { r });
        }
        if octaves.len() != r {
            return Err(ScatteringError::LayerListMismatch {
                name: "octaves",
                expected: r,
                found: octaves.len(),
            });
        }
        if voices.len() != r {
            return Err(ScatteringError::LayerListMismatch {
                name: "voices",
                expected: r,
                found: voices.len(),
            });
        }
        for (layer, (&j, &q)) in octaves.iter().zip(voices.iter()).enumerate() {
            if j * q == 0 {
                return Err(ScatteringError::EmptyScaleGrid { layer, octaves: j, voices: q });
            }
        }

        let mut indexer = Self {
            r,
            octaves,
            voices,
            paths: Vec::new(),
            order_start: Vec::with_capacity(r + 1),
            lookup: HashMap::new(),
        };
        indexer.enumerate();
        Ok(indexer)
    }

    // Orders are filled one after another so indices are dense and grouped;
    // extending the (lexicographically ordered) previous order by ascending
    // scale keeps each order lexicographic as well.
    fn enumerate(&mut self) {
        self.order_start.push(0);
        let grid0 = self.octaves[0] * self.voices[0];
        for j in 0..=grid0 {
            self.push_path(vec![j]);
        }
        self.order_start.push(self.paths.len());

        for layer in 1..self.r {
            let (prev_lo, prev_hi) = (self.order_start[layer - 1], self.order_start[layer]);
            let grid = self.octaves[layer] * self.voices[layer];
            for parent in prev_lo..prev_hi {
                let path = self.paths[parent].clone();
                let j_prev = *path.last().unwrap_or(&0);
                if j_prev >= self.octaves[layer - 1] * self.voices[layer - 1] {
                    continue; // low-pass terminal, no extensions
                }
                for j in 0..=grid {
                    if j == grid || self.octave_increases(j_prev, layer - 1, j, layer) {
                        let mut extended = path.clone();
                        extended.push(j);
                        self.push_path(extended);
                    }
                }
            }
            self.order_start.push(self.paths.len());
        }
    }

    fn push_path(&mut self, path: Vec<usize>) {
        self.lookup.insert(path.clone(), self.paths.len());
        self.paths.push(path);
    }

    // ---- Configuration queries ----

    /// Number of convolution layers.
    pub fn r(&self) -> usize {
        self.r
    }

    /// Octave count of `layer` (0-based).
    pub fn octave_count(&self, layer: usize) -> usize {
        self.octaves[layer]
    }

    /// Voices per octave of `layer` (0-based).
    pub fn voice_count(&self, layer: usize) -> usize {
        self.voices[layer]
    }

    /// The reserved low-pass scale index of `layer` (0-based).
    pub fn low_pass_scale(&self, layer: usize) -> usize {
        self.octaves[layer] * self.voices[layer]
    }

    // ---- Path queries ----

    /// Total number of enumerated paths across all orders.
    pub fn n_paths(&self) -> usize {
        self.paths.len()
    }

    /// Global index range of the paths of a given `order` (1-based).
    pub fn order_range(&self, order: usize) -> std::ops::Range<usize> {
        self.order_start[order - 1]..self.order_start[order]
    }

    /// Number of paths of a given `order` (the layer's output multiplicity).
    pub fn order_len(&self, order: usize) -> usize {
        self.order_range(order).len()
    }

    /// The path behind a global index.
    pub fn path(&self, index: usize) -> ScatResult<&[usize]> {
        self.paths
            .get(index)
            .map(Vec::as_slice)
            .ok_or(ScatteringError::PathIndexOutOfRange { index, n_paths: self.paths.len() })
    }

    /// Global index of a path, if it was enumerated.
    pub fn index_of(&self, path: &[usize]) -> Option<usize> {
        self.lookup.get(path).copied()
    }

    /// Order (number of applied convolutions) of a path.
    pub fn order(&self, index: usize) -> ScatResult<usize> {
        Ok(self.path(index)?.len())
    }

    /// Whether the terminal channel of a path is the low-pass filter.
    pub fn is_low_pass(&self, index: usize) -> ScatResult<bool> {
        let path = self.path(index)?;
        let layer = path.len() - 1;
        Ok(path[layer] == self.low_pass_scale(layer))
    }

    /// Per-layer scale labels of a path, `None` beyond the path's order.
    pub fn scales(&self, index: usize) -> ScatResult<Vec<Option<usize>>> {
        let path = self.path(index)?;
        let mut labels = vec![None; self.r];
        for (layer, &j) in path.iter().enumerate() {
            labels[layer] = Some(j);
        }
        Ok(labels)
    }

    // ---- Octave arithmetic ----

    /// Strict octave increase between scales of (possibly different) layers,
    /// compared by cross-multiplication. Also used by the covariance pairing
    /// logic to decide path admissibility.
    pub fn octave_increases(
        &self, j_prev: usize, layer_prev: usize, j_next: usize, layer_next: usize,
    ) -> bool {
        j_next * self.voices[layer_prev] > j_prev * self.voices[layer_next]
    }

    /// Whether two band-pass scales of (possibly different) layers sit on the
    /// same octave.
    pub fn octaves_equal(&self, jl: usize, layer_l: usize, jr: usize, layer_r: usize) -> bool {
        jl * self.voices[layer_r] == jr * self.voices[layer_l]
    }
}
