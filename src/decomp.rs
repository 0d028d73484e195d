//! Splitting a global grid among ranks, either as a regular processor grid
//! or as a recursive coordinate bisection (RCB) tree.

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum DecompError {
    #[error("Cannot decompose over zero ranks")]
    ZeroProcs,
    #[error("Grid extent must be positive in every dimension (got {0:?})")]
    ZeroExtent([usize; 3]),
    #[error("{nprocs} ranks cannot split a grid of extent {extent:?}")]
    TooManyProcs { nprocs: usize, extent: [usize; 3] },
    #[error("Rank {rank} outside a decomposition of {nprocs} ranks")]
    InvalidRank { rank: usize, nprocs: usize },
}

/// Prime factor decomposition, ascending.
pub fn prime_factors(n: usize) -> Vec<usize> {
    let mut left = n;
    let mut factors = vec![];
    let mut i = 2;
    while left >= i * i {
        while left % i == 0 {
            factors.push(i);
            left /= i;
        }
        i += 1;
    }
    if left > 1 {
        factors.push(left);
    }
    factors
}

fn argmax(v: &[usize; 3]) -> usize {
    let mut best = 0;
    for d in 1..3 {
        if v[d] > v[best] {
            best = d;
        }
    }
    best
}

fn ceil_div(x: usize, y: usize) -> usize {
    x.div_ceil(y)
}

/// Cartesian arrangement of ranks, x varying fastest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcGrid {
    pub dims: [usize; 3],
}

impl ProcGrid {
    pub fn new(dims: [usize; 3]) -> Result<Self, DecompError> {
        if dims.contains(&0) {
            return Err(DecompError::ZeroProcs);
        }
        Ok(Self { dims })
    }

    /// Gives each prime factor of `nprocs` to the dimension with the most
    /// grid points left per rank, keeping sub-domains close to cubic.
    pub fn factor(nprocs: usize, extent: [usize; 3]) -> Result<Self, DecompError> {
        if nprocs == 0 {
            return Err(DecompError::ZeroProcs);
        }
        if extent.contains(&0) {
            return Err(DecompError::ZeroExtent(extent));
        }
        let mut remaining = extent;
        let mut dims = [1; 3];
        for fac in prime_factors(nprocs) {
            let d = argmax(&remaining);
            remaining[d] = ceil_div(remaining[d], fac);
            dims[d] *= fac;
        }
        if (0..3).any(|d| dims[d] > extent[d]) {
            return Err(DecompError::TooManyProcs { nprocs, extent });
        }
        Ok(Self { dims })
    }

    pub fn nprocs(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn coords(&self, rank: usize) -> [usize; 3] {
        let [px, py, _] = self.dims;
        [rank % px, (rank / px) % py, rank / (px * py)]
    }

    pub fn rank(&self, coords: [usize; 3]) -> usize {
        let [px, py, _] = self.dims;
        coords[0] + px * (coords[1] + py * coords[2])
    }

    /// Lower and upper neighbor rank in each dimension, periodic.
    pub fn procneigh(&self, rank: usize) -> [[usize; 2]; 3] {
        let c = self.coords(rank);
        let mut out = [[0; 2]; 3];
        for d in 0..3 {
            let n = self.dims[d];
            let mut lo = c;
            lo[d] = (c[d] + n - 1) % n;
            let mut hi = c;
            hi[d] = (c[d] + 1) % n;
            out[d] = [self.rank(lo), self.rank(hi)];
        }
        out
    }
}

/// Inclusive box of grid indices. Empty when `hi < lo` in any dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
#[repr(C)]
pub struct GridBox {
    pub lo: [i32; 3],
    pub hi: [i32; 3],
}

impl GridBox {
    pub fn new(lo: [i32; 3], hi: [i32; 3]) -> Self {
        Self { lo, hi }
    }

    /// The whole `[0, n)` grid.
    pub fn global(n: [usize; 3]) -> Self {
        Self {
            lo: [0; 3],
            hi: [n[0] as i32 - 1, n[1] as i32 - 1, n[2] as i32 - 1],
        }
    }

    pub fn extent(&self, d: usize) -> usize {
        (self.hi[d] - self.lo[d] + 1).max(0) as usize
    }

    pub fn count(&self) -> usize {
        (0..3).map(|d| self.extent(d)).product()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn contains(&self, p: [i32; 3]) -> bool {
        (0..3).all(|d| p[d] >= self.lo[d] && p[d] <= self.hi[d])
    }

    /// True if every point of `other` is in this box; empty boxes fit anywhere.
    pub fn contains_box(&self, other: &GridBox) -> bool {
        other.is_empty() || (self.contains(other.lo) && self.contains(other.hi))
    }

    pub fn intersect(&self, other: &GridBox) -> Option<GridBox> {
        let b = GridBox {
            lo: std::array::from_fn(|d| self.lo[d].max(other.lo[d])),
            hi: std::array::from_fn(|d| self.hi[d].min(other.hi[d])),
        };
        (!b.is_empty()).then_some(b)
    }

    /// This box grown by `lo[d]` below and `hi[d]` above in each dimension.
    pub fn grow(&self, lo: [i32; 3], hi: [i32; 3]) -> GridBox {
        GridBox {
            lo: std::array::from_fn(|d| self.lo[d] - lo[d]),
            hi: std::array::from_fn(|d| self.hi[d] + hi[d]),
        }
    }

    pub fn shift(&self, by: [i32; 3]) -> GridBox {
        GridBox {
            lo: std::array::from_fn(|d| self.lo[d] + by[d]),
            hi: std::array::from_fn(|d| self.hi[d] + by[d]),
        }
    }
}

/// Grid points owned by `rank` of a regular decomposition. Ranks in the
/// same grid column split points as evenly as integer division allows.
pub fn partition_regular(
    global: [usize; 3],
    grid: &ProcGrid,
    rank: usize,
) -> Result<GridBox, DecompError> {
    if rank >= grid.nprocs() {
        return Err(DecompError::InvalidRank {
            rank,
            nprocs: grid.nprocs(),
        });
    }
    if (0..3).any(|d| grid.dims[d] > global[d]) {
        return Err(DecompError::TooManyProcs {
            nprocs: grid.nprocs(),
            extent: global,
        });
    }
    let c = grid.coords(rank);
    let split = |d: usize, k: usize| (k * global[d] / grid.dims[d]) as i32;
    Ok(GridBox {
        lo: std::array::from_fn(|d| split(d, c[d])),
        hi: std::array::from_fn(|d| split(d, c[d] + 1) - 1),
    })
}

/// Owned boxes of an RCB tree over ranks `0..nprocs`.
///
/// The ranks `lo..=hi` of every tree node are split at
/// `mid = lo + (hi - lo) / 2 + 1`; `mid` is the first rank of the upper half
/// and `cut_dims[mid]` the dimension of that cut. Rank 0 never starts an
/// upper half and has no cut dimension.
#[derive(Clone, Debug, PartialEq)]
pub struct RcbPartition {
    pub boxes: Vec<GridBox>,
    pub cut_dims: Vec<Option<usize>>,
}

pub fn partition_rcb(global: [usize; 3], nprocs: usize) -> Result<RcbPartition, DecompError> {
    if nprocs == 0 {
        return Err(DecompError::ZeroProcs);
    }
    if global.contains(&0) {
        return Err(DecompError::ZeroExtent(global));
    }
    let mut part = RcbPartition {
        boxes: vec![GridBox::default(); nprocs],
        cut_dims: vec![None; nprocs],
    };
    bisect(GridBox::global(global), 0, nprocs - 1, &mut part, global)?;
    Ok(part)
}

fn bisect(
    b: GridBox,
    lo: usize,
    hi: usize,
    part: &mut RcbPartition,
    global: [usize; 3],
) -> Result<(), DecompError> {
    if lo == hi {
        part.boxes[lo] = b;
        return Ok(());
    }
    let n = hi - lo + 1;
    let mid = lo + (hi - lo) / 2 + 1;
    let nlower = mid - lo;
    let ext = [b.extent(0), b.extent(1), b.extent(2)];
    let dim = argmax(&ext);
    if ext[dim] < n {
        return Err(DecompError::TooManyProcs {
            nprocs: part.boxes.len(),
            extent: global,
        });
    }
    let cut = b.lo[dim] + (ext[dim] * nlower / n) as i32;
    let mut lower = b;
    lower.hi[dim] = cut - 1;
    let mut upper = b;
    upper.lo[dim] = cut;
    part.cut_dims[mid] = Some(dim);
    bisect(lower, lo, mid - 1, part, global)?;
    bisect(upper, mid, hi, part, global)
}
