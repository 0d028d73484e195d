//! Periodic images for a rank that owns the whole box.

use crate::atom::{AtomError, Atoms};
use crate::domain::SimBox;
use thiserror::Error;
use tracing::{debug, info_span};

#[derive(Error, Debug, PartialEq)]
pub enum GhostError {
    #[error("Ghost cutoff is longer than the periodic box")]
    CutoffExceedsBox,
    #[error("Owned atom {0} lies outside the periodic box")]
    OutsideBox(usize),
    #[error(transparent)]
    Atom(#[from] AtomError),
}

/// Replaces the ghosts of `atoms` with the periodic images lying within
/// `cutghost` of the box, and returns how many were made.
///
/// Dimensions are handled in order x, y, z and each pass also replicates the
/// ghosts made by the previous ones, so edge and corner images exist.
pub fn add_periodic_ghosts(
    atoms: &mut Atoms,
    simbox: &SimBox,
    cutghost: f64,
) -> Result<usize, GhostError> {
    let _span = info_span!("ghost::add_periodic", n_local = atoms.nlocal, cutghost).entered();
    atoms.clear_ghosts();
    let lo = simbox.lo();
    let hi = simbox.hi();
    let prd = simbox.prd();

    for d in 0..simbox.dimension() {
        if !simbox.pbc()[d] {
            continue;
        }
        if cutghost >= prd[d] {
            return Err(GhostError::CutoffExceedsBox);
        }
        if let Some(i) =
            (0..atoms.nlocal).find(|&i| atoms.x[i][d] < lo[d] || atoms.x[i][d] >= hi[d])
        {
            return Err(GhostError::OutsideBox(i));
        }
        let n = atoms.nall();
        for i in 0..n {
            let x = atoms.x[i];
            let mut image = [0; 3];
            if x[d] < lo[d] + cutghost {
                let mut xg = x;
                xg[d] += prd[d];
                image[d] = 1;
                atoms.add_ghost_copy(i, xg, image)?;
            }
            if x[d] >= hi[d] - cutghost {
                let mut xg = x;
                xg[d] -= prd[d];
                image[d] = -1;
                atoms.add_ghost_copy(i, xg, image)?;
            }
        }
    }
    let nghost = atoms.nghost();
    debug!(n_ghost = nghost, "periodic ghosts");
    Ok(nghost)
}
