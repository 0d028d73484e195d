//! Lists derived from an already built parent list instead of from bins.

use crate::atom::Atoms;
use crate::exclusion::neigh_index;
use crate::neigh_list::NeighList;
use crate::npair::PairError;
use crate::nstencil::is_upper;
use crate::table::TypeTable;
use tracing::info_span;

/// Half list taken from a full parent list.
///
/// With Newton on, an owned pair is kept from its lower index and a pair with
/// a ghost only if the ghost is above `i`; with Newton off every `j > i` is kept.
pub fn build_halffull(
    parent: &NeighList,
    list: &mut NeighList,
    atoms: &Atoms,
    newton: bool,
) -> Result<(), PairError> {
    let _span = info_span!("NPair::halffull", newton, inum = parent.inum).entered();
    let nlocal = atoms.nlocal;
    list.begin(atoms.nall());
    for &i in &parent.ilist[..parent.inum] {
        let xi = &atoms.x[i];
        let mut chunk = list.page_mut().vget();
        for &jraw in parent.neighbors(i) {
            let j = neigh_index(jraw);
            let keep = if !newton {
                j > i
            } else if j < nlocal {
                j > i
            } else {
                is_upper(xi, &atoms.x[j])
            };
            if keep {
                chunk.push(jraw)?;
            }
        }
        let slot = chunk.vgot();
        list.store(i, slot);
    }
    list.inum = parent.inum;
    Ok(())
}

/// Types dropped from a skip list: whole atoms by `iskip` (indexed by
/// `type - 1`) and single pairs by `ijskip`.
#[derive(Clone, Debug, PartialEq)]
pub struct SkipFlags {
    pub iskip: Vec<bool>,
    pub ijskip: TypeTable<bool>,
}

impl SkipFlags {
    pub fn none(ntypes: usize) -> Self {
        Self {
            iskip: vec![false; ntypes],
            ijskip: TypeTable::new(ntypes, false),
        }
    }

    /// Keeps only pairs whose types are both in `types`.
    pub fn only_types(ntypes: usize, types: &[usize]) -> Self {
        let keep = |t: usize| types.contains(&t);
        Self {
            iskip: (1..=ntypes).map(|t| !keep(t)).collect(),
            ijskip: TypeTable::from_fn(ntypes, |i, j| !(keep(i) && keep(j))),
        }
    }
}

/// Parent list filtered by type. Skipped atoms are absent from `ilist`.
pub fn build_skip(
    parent: &NeighList,
    list: &mut NeighList,
    atoms: &Atoms,
    skip: &SkipFlags,
) -> Result<(), PairError> {
    let _span = info_span!("NPair::skip", inum = parent.inum, gnum = parent.gnum).entered();
    list.begin(atoms.nall());
    let mut inum = 0;
    let mut gnum = 0;
    for (ii, &i) in parent.ilist.iter().enumerate() {
        let itype = atoms.type_[i];
        if skip.iskip[itype - 1] {
            continue;
        }
        let mut chunk = list.page_mut().vget();
        for &jraw in parent.neighbors(i) {
            let jtype = atoms.type_[neigh_index(jraw)];
            if *skip.ijskip.get(itype, jtype) {
                continue;
            }
            chunk.push(jraw)?;
        }
        let slot = chunk.vgot();
        list.store(i, slot);
        if ii < parent.inum {
            inum += 1;
        } else {
            gnum += 1;
        }
    }
    list.inum = inum;
    list.gnum = gnum;
    Ok(())
}
