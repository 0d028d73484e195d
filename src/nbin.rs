use crate::atom::Atoms;
use crate::config::get_parallel_threshold;
use crate::domain::{SimBox, SubDomain};
use nalgebra::Vector3;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info_span};

/// Relative padding of the binned region.
const SMALL: f64 = 1.0e-6;
/// Largest allowed ratio of requested bin size to actual bin size.
const CUT2BIN_RATIO: f64 = 100.0;
/// Marks the end of a bin's atom chain.
pub const EMPTY: usize = usize::MAX;

#[derive(Error, Debug, PartialEq)]
pub enum BinError {
    #[error("Non-numeric positions - simulation unstable (atom {0})")]
    NonFinite(usize),
    #[error("Atom {atom} lies outside the binned region")]
    OutOfRange { atom: usize },
    #[error("Cannot use neighbor bins - box size << cutoff")]
    BoxTooSmall,
    #[error("Domain too large for neighbor bins")]
    DomainTooLarge,
    #[error("Too many neighbor bins")]
    TooManyBins,
    #[error("Neighbor bins used before setup")]
    NotSetup,
}

/// Inputs to bin setup, refreshed whenever the box or cutoffs change.
#[derive(Clone, Copy, Debug)]
pub struct BinContext<'a> {
    pub simbox: &'a SimBox,
    pub sub: &'a SubDomain,
    pub cutghost: f64,
    pub cutneighmax: f64,
    /// Largest neighbor cutoff of each type, indexed by `type - 1`.
    pub cuttype: &'a [f64],
    /// Bin size of the standard grid; per-type grids ignore it.
    pub binsize_user: Option<f64>,
}

/// Geometry of one bin grid covering the sub-domain plus its ghost shell.
///
/// Global bin `0` starts at the box lower bound; local bin coordinates are
/// shifted by `mbinlo` so the first local bin is `0`.
#[derive(Clone, Debug, PartialEq)]
pub struct BinGeometry {
    pub nbin: [i32; 3],
    pub mbin: [usize; 3],
    pub mbinlo: [i32; 3],
    pub binsize: [f64; 3],
    pub bininv: [f64; 3],
    pub bboxlo: [f64; 3],
    pub bboxhi: [f64; 3],
    pub dimension: usize,
}

impl BinGeometry {
    pub fn setup(ctx: &BinContext, binsize_optimal: f64) -> Result<Self, BinError> {
        let simbox = ctx.simbox;
        let dimension = simbox.dimension();
        let bbox = *simbox.prd();
        let bboxlo = *simbox.lo();
        let bboxhi = *simbox.hi();
        let bsublo = ctx.sub.lo - Vector3::repeat(ctx.cutghost);
        let bsubhi = ctx.sub.hi + Vector3::repeat(ctx.cutghost);

        let binsize_optimal = if binsize_optimal > 0.0 { binsize_optimal } else { bbox.x };
        let binsizeinv = 1.0 / binsize_optimal;

        let mut g = BinGeometry {
            nbin: [1; 3],
            mbin: [1; 3],
            mbinlo: [0; 3],
            binsize: [0.0; 3],
            bininv: [0.0; 3],
            bboxlo: [bboxlo.x, bboxlo.y, bboxlo.z],
            bboxhi: [bboxhi.x, bboxhi.y, bboxhi.z],
            dimension,
        };

        for d in 0..3 {
            if d == 2 && dimension == 2 {
                g.nbin[d] = 1;
            } else {
                let n = bbox[d] * binsizeinv;
                if n > i32::MAX as f64 {
                    return Err(BinError::DomainTooLarge);
                }
                g.nbin[d] = (n as i32).max(1);
            }
            g.binsize[d] = bbox[d] / g.nbin[d] as f64;
            g.bininv[d] = 1.0 / g.binsize[d];
            if (d < 2 || dimension == 3) && binsize_optimal * g.bininv[d] > CUT2BIN_RATIO {
                return Err(BinError::BoxTooSmall);
            }

            if d == 2 && dimension == 2 {
                g.mbinlo[d] = 0;
                g.mbin[d] = 1;
                continue;
            }

            let coord = bsublo[d] - SMALL * bbox[d];
            let mut lo = ((coord - bboxlo[d]) * g.bininv[d]) as i32;
            if coord < bboxlo[d] {
                lo -= 1;
            }
            let coord = bsubhi[d] + SMALL * bbox[d];
            let mut hi = ((coord - bboxlo[d]) * g.bininv[d]) as i32;

            // one extra bin on each side so every stencil stays in range
            lo -= 1;
            hi += 1;
            g.mbinlo[d] = lo;
            g.mbin[d] = (hi - lo + 1) as usize;
        }

        let total = g.mbin.iter().map(|&m| m as u64).product::<u64>();
        if total > i32::MAX as u64 {
            return Err(BinError::TooManyBins);
        }
        Ok(g)
    }

    pub fn mbins(&self) -> usize {
        self.mbin[0] * self.mbin[1] * self.mbin[2]
    }

    #[inline(always)]
    fn axis_bin(&self, d: usize, x: f64) -> i32 {
        if x >= self.bboxhi[d] {
            ((x - self.bboxhi[d]) * self.bininv[d]) as i32 + self.nbin[d]
        } else if x >= self.bboxlo[d] {
            (((x - self.bboxlo[d]) * self.bininv[d]) as i32).min(self.nbin[d] - 1)
        } else {
            ((x - self.bboxlo[d]) * self.bininv[d]) as i32 - 1
        }
    }

    /// Local bin coordinates of `x`, or `None` if `x` is not finite or falls
    /// outside the binned region.
    #[inline]
    pub fn coord2bin_xyz(&self, x: &Vector3<f64>) -> Option<[usize; 3]> {
        let mut out = [0usize; 3];
        for d in 0..3 {
            if d == 2 && self.dimension == 2 {
                break;
            }
            if !x[d].is_finite() {
                return None;
            }
            let rel = self.axis_bin(d, x[d]) - self.mbinlo[d];
            if rel < 0 || rel as usize >= self.mbin[d] {
                return None;
            }
            out[d] = rel as usize;
        }
        Some(out)
    }

    #[inline]
    pub fn coord2bin(&self, x: &Vector3<f64>) -> Option<usize> {
        self.coord2bin_xyz(x).map(|b| self.index(b))
    }

    #[inline(always)]
    pub fn index(&self, b: [usize; 3]) -> usize {
        (b[2] * self.mbin[1] + b[1]) * self.mbin[0] + b[0]
    }

    /// Flat offset of a relative bin displacement.
    #[inline(always)]
    pub fn offset(&self, i: i32, j: i32, k: i32) -> isize {
        (k as isize * self.mbin[1] as isize + j as isize) * self.mbin[0] as isize + i as isize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NBinStyle {
    /// One grid, bins of half the largest cutoff unless `binsize_user` is set.
    Standard,
    /// One grid per atom type, bins of half that type's largest cutoff.
    /// `binsize_user` does not apply.
    Bytype,
}

/// Assignment of every owned and ghost atom to a bin.
///
/// Each bin is a chain through `bins`: `binhead` gives the first atom and
/// `bins[i]` the atom after `i`, ending in `EMPTY`. Chains are in ascending
/// atom index, so owned atoms precede ghosts within a bin.
#[derive(Debug)]
pub struct NBin {
    style: NBinStyle,
    grids: Vec<BinGeometry>,
    binhead: Vec<Vec<usize>>,
    bins: Vec<usize>,
    atom2bin: Vec<usize>,
}

impl NBin {
    pub fn new(style: NBinStyle) -> Self {
        Self {
            style,
            grids: Vec::new(),
            binhead: Vec::new(),
            bins: Vec::new(),
            atom2bin: Vec::new(),
        }
    }

    pub fn style(&self) -> NBinStyle {
        self.style
    }

    pub fn is_setup(&self) -> bool {
        !self.grids.is_empty()
    }

    pub fn setup_bins(&mut self, ctx: &BinContext) -> Result<(), BinError> {
        let _span = info_span!("NBin::setup_bins", style = ?self.style).entered();
        self.grids = match self.style {
            NBinStyle::Standard => {
                let optimal = ctx.binsize_user.unwrap_or(0.5 * ctx.cutneighmax);
                vec![BinGeometry::setup(ctx, optimal)?]
            }
            NBinStyle::Bytype => ctx
                .cuttype
                .iter()
                .map(|&c| BinGeometry::setup(ctx, 0.5 * c))
                .collect::<Result<Vec<_>, _>>()?,
        };
        for (t, g) in self.grids.iter().enumerate() {
            debug!(
                grid = t,
                nbin = ?g.nbin,
                mbin = ?g.mbin,
                mbinlo = ?g.mbinlo,
                binsize = ?g.binsize,
                "bin geometry"
            );
        }
        self.binhead = self.grids.iter().map(|g| vec![EMPTY; g.mbins()]).collect();
        Ok(())
    }

    #[inline(always)]
    fn grid_index(&self, itype: usize) -> usize {
        match self.style {
            NBinStyle::Standard => 0,
            NBinStyle::Bytype => itype - 1,
        }
    }

    /// Geometry of the grid that holds atoms of type `itype`.
    #[inline(always)]
    pub fn grid(&self, itype: usize) -> &BinGeometry {
        &self.grids[self.grid_index(itype)]
    }

    pub fn ngrids(&self) -> usize {
        self.grids.len()
    }

    /// Bin of `x` in the grid of type `itype`.
    #[inline]
    pub fn coord2bin(&self, x: &Vector3<f64>, itype: usize) -> Option<usize> {
        self.grid(itype).coord2bin(x)
    }

    pub fn bin_atoms(&mut self, atoms: &Atoms) -> Result<(), BinError> {
        if !self.is_setup() {
            return Err(BinError::NotSetup);
        }
        let nall = atoms.nall();
        let _span =
            info_span!("NBin::bin_atoms", n_atoms = nall, n_grids = self.grids.len()).entered();
        let parallel = nall >= get_parallel_threshold();
        self.atom2bin = self.hash_atoms(atoms, parallel)?;

        for head in &mut self.binhead {
            head.fill(EMPTY);
        }
        self.bins.clear();
        self.bins.resize(nall, EMPTY);
        for i in (0..nall).rev() {
            let g = self.grid_index(atoms.type_[i]);
            let b = self.atom2bin[i];
            self.bins[i] = self.binhead[g][b];
            self.binhead[g][b] = i;
        }
        Ok(())
    }

    fn hash_atoms(&self, atoms: &Atoms, parallel: bool) -> Result<Vec<usize>, BinError> {
        let hash = |i: usize| -> Result<usize, BinError> {
            let x = &atoms.x[i];
            if !x.iter().all(|v| v.is_finite()) {
                return Err(BinError::NonFinite(i));
            }
            self.coord2bin(x, atoms.type_[i])
                .ok_or(BinError::OutOfRange { atom: i })
        };
        if parallel {
            (0..atoms.nall()).into_par_iter().map(hash).collect()
        } else {
            (0..atoms.nall()).map(hash).collect()
        }
    }

    /// Bin of atom `i` in its own type's grid.
    #[inline(always)]
    pub fn atom2bin(&self, i: usize) -> usize {
        self.atom2bin[i]
    }

    /// Atoms in bin `ibin` of type `itype`'s grid.
    #[inline]
    pub fn bin(&self, itype: usize, ibin: usize) -> BinIter<'_> {
        let head = self.binhead[self.grid_index(itype)]
            .get(ibin)
            .copied()
            .unwrap_or(EMPTY);
        BinIter {
            next: &self.bins,
            cur: head,
        }
    }

    /// Atoms of bin `ibin + offset`, or nothing if that bin does not exist.
    #[inline]
    pub fn bin_offset(&self, itype: usize, ibin: usize, offset: isize) -> BinIter<'_> {
        match ibin.checked_add_signed(offset) {
            Some(b) => self.bin(itype, b),
            None => BinIter {
                next: &self.bins,
                cur: EMPTY,
            },
        }
    }

    /// Atoms that follow `i` in its own bin.
    #[inline]
    pub fn after(&self, i: usize) -> BinIter<'_> {
        BinIter {
            next: &self.bins,
            cur: self.bins[i],
        }
    }

    pub fn memory_usage(&self) -> usize {
        let heads: usize = self.binhead.iter().map(|h| h.capacity()).sum();
        (heads + self.bins.capacity() + self.atom2bin.capacity()) * std::mem::size_of::<usize>()
    }
}

pub struct BinIter<'a> {
    next: &'a [usize],
    cur: usize,
}

impl Iterator for BinIter<'_> {
    type Item = usize;

    #[inline(always)]
    fn next(&mut self) -> Option<usize> {
        if self.cur == EMPTY {
            return None;
        }
        let i = self.cur;
        self.cur = self.next[i];
        Some(i)
    }
}
