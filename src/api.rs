//! One-call neighbor search for a single rank owning the whole box.

use crate::atom::{AtomError, Atoms};
use crate::config::{Binning, ConfigError, NeighSettings};
use crate::domain::{DomainError, SimBox, SubDomain};
use crate::ghost::{GhostError, add_periodic_ghosts};
use crate::neighbor::{NeighRequest, Neighbor, NeighborError};
use crate::table::TypeTable;
use nalgebra::Vector3;
use thiserror::Error;
use tracing::info_span;

/// Margin added around the atoms when no cell is given.
pub const AUTO_BOX_MARGIN: f64 = 1.0;

#[derive(Error, Debug, PartialEq)]
pub enum ApiError {
    #[error("Cutoff must be positive and finite (got {0})")]
    InvalidCutoff(f64),
    #[error("Position {0} is not finite")]
    NonFinite(usize),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Atom(#[from] AtomError),
    #[error(transparent)]
    Ghost(#[from] GhostError),
    #[error(transparent)]
    Neighbor(#[from] NeighborError),
}

/// Directed edges of a full neighbor list.
///
/// Edge `k` runs from `edge_index[k]` to `edge_index[n_edges + k]`, and
/// `x[j] - x[i] + shifts[3k..3k+3] * cell` is its vector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborList {
    pub edge_index: Vec<i64>,
    pub shifts: Vec<i32>,
}

impl NeighborList {
    pub fn n_edges(&self) -> usize {
        self.edge_index.len() / 2
    }

    /// `(i, j, shift)` of every edge.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, [i32; 3])> + '_ {
        let n = self.n_edges();
        (0..n).map(move |k| {
            let s = &self.shifts[3 * k..3 * k + 3];
            (self.edge_index[k] as usize, self.edge_index[n + k] as usize, [s[0], s[1], s[2]])
        })
    }
}

/// Finds every ordered pair closer than `cutoff`.
///
/// With a cell, only orthogonal (diagonal) cells are accepted and periodic
/// positions may lie anywhere; they are wrapped before binning. Each
/// periodic dimension must be longer than the cutoff.
pub fn build_neighborlists(
    positions: &[[f64; 3]],
    cutoff: f64,
    cell: Option<(&[[f64; 3]; 3], [bool; 3])>,
) -> Result<NeighborList, ApiError> {
    if !cutoff.is_finite() || cutoff <= 0.0 {
        return Err(ApiError::InvalidCutoff(cutoff));
    }
    if let Some(i) = positions.iter().position(|p| p.iter().any(|v| !v.is_finite())) {
        return Err(ApiError::NonFinite(i));
    }
    if positions.is_empty() {
        return Ok(NeighborList::default());
    }
    let _span = info_span!("build_neighborlists", n_atoms = positions.len(), cutoff).entered();

    let simbox = simulation_box(positions, cutoff, cell)?;
    let mut atoms = Atoms::new(1);
    let mut wraps = Vec::with_capacity(positions.len());
    for p in positions {
        let (x, n) = wrap_into(&simbox, Vector3::from(*p));
        atoms.add_local(x, 1)?;
        wraps.push(n);
    }

    let settings = NeighSettings::default()
        .with_skin(0.0)
        .with_binning(Binning::Bin);
    let sub = SubDomain::whole(&simbox);
    let mut neighbor = Neighbor::new(settings, simbox, sub, TypeTable::new(1, cutoff))?;
    let full = neighbor.request(NeighRequest::full());
    neighbor.init()?;
    add_periodic_ghosts(&mut atoms, neighbor.simbox(), neighbor.cutghost())?;
    neighbor.build(0, &atoms)?;

    let Some(list) = neighbor.list(full) else {
        return Ok(NeighborList::default());
    };
    let mut src = Vec::with_capacity(list.total_neighbors());
    let mut dst = Vec::with_capacity(list.total_neighbors());
    let mut shifts = Vec::with_capacity(3 * list.total_neighbors());
    for (i, j, _) in list.pairs() {
        let owner = (atoms.tag[j] - 1) as usize;
        let img = atoms.image[j];
        src.push(i as i64);
        dst.push(owner as i64);
        // wrapping moved x_i by -wraps[i] periods and x_j by -wraps[owner]
        for d in 0..3 {
            shifts.push(img[d] - wraps[owner][d] + wraps[i][d]);
        }
    }
    src.extend(dst);
    Ok(NeighborList {
        edge_index: src,
        shifts,
    })
}

fn simulation_box(
    positions: &[[f64; 3]],
    cutoff: f64,
    cell: Option<(&[[f64; 3]; 3], [bool; 3])>,
) -> Result<SimBox, ApiError> {
    let mut min = Vector3::repeat(f64::INFINITY);
    let mut max = Vector3::repeat(f64::NEG_INFINITY);
    for p in positions {
        let p = Vector3::from(*p);
        min = min.inf(&p);
        max = max.sup(&p);
    }
    let margin = cutoff + AUTO_BOX_MARGIN;

    let Some((h, pbc)) = cell else {
        let lo = min - Vector3::repeat(margin);
        let hi = max + Vector3::repeat(margin);
        return Ok(SimBox::new(lo, hi, Vector3::repeat(false))?);
    };
    let off_diagonal = (0..3).any(|r| (0..3).any(|c| r != c && h[r][c] != 0.0));
    if off_diagonal {
        return Err(ConfigError::Triclinic.into());
    }
    let mut lo = Vector3::zeros();
    let mut hi = Vector3::new(h[0][0], h[1][1], h[2][2]);
    for d in 0..3 {
        if !pbc[d] {
            lo[d] = f64::min(0.0, min[d] - margin);
            hi[d] = f64::max(hi[d], max[d] + margin);
        }
    }
    Ok(SimBox::new(lo, hi, Vector3::from(pbc))?)
}

/// Position moved into the periodic box, and how many periods it moved by.
fn wrap_into(simbox: &SimBox, x: Vector3<f64>) -> (Vector3<f64>, [i32; 3]) {
    let mut w = x;
    let mut n = [0; 3];
    for d in 0..3 {
        if !simbox.pbc()[d] {
            continue;
        }
        let (lo, prd) = (simbox.lo()[d], simbox.prd()[d]);
        let mut k = ((x[d] - lo) / prd).floor();
        w[d] = x[d] - k * prd;
        // rounding can land exactly on the upper face
        if w[d] >= lo + prd {
            w[d] -= prd;
            k += 1.0;
        }
        if w[d] < lo {
            w[d] = lo;
        }
        n[d] = k as i32;
    }
    (w, n)
}
