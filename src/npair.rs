use crate::atom::Atoms;
use crate::config::{Binning, ConfigError};
use crate::domain::SimBox;
use crate::exclusion::{
    Exclusions, HISTORY_MASK, MAX_NEIGH_INDEX, SBBITS, SpecialFlags, SpecialOutcome, find_special,
};
use crate::nbin::NBin;
use crate::neigh_list::NeighList;
use crate::nstencil::{NStencil, StencilStyle, is_upper};
use crate::page::{Chunk, PageError};
use crate::table::TypeTable;
use thiserror::Error;
use tracing::{debug, info_span};

#[derive(Error, Debug, PartialEq)]
pub enum PairError {
    #[error(transparent)]
    Page(#[from] PageError),
    #[error("Binned pair style built without bins")]
    MissingBins,
    #[error("Binned pair style built without a stencil")]
    MissingStencil,
    #[error("Atom {atom} cannot be located in the bins of type {itype}")]
    OutOfRange { atom: usize, itype: usize },
    #[error("Too many atoms for neighbor indices ({0})")]
    TooManyAtoms(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListKind {
    /// Each pair once. With `newton`, pairs with a ghost are stored by one
    /// rank only; without it, every owned/ghost pair is kept.
    Half { newton: bool },
    /// Each pair in both directions.
    Full,
}

/// One point of the closed set of pair-building variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PairStyle {
    pub kind: ListKind,
    pub binning: Binning,
    /// Cutoff from particle radii plus skin instead of the type table.
    pub size: bool,
    /// Mark touching pairs in the top bits (size lists only).
    pub history: bool,
    /// Ghost atoms get lists too (full lists only).
    pub ghost: bool,
}

impl PairStyle {
    pub fn new(kind: ListKind, binning: Binning) -> Self {
        Self {
            kind,
            binning,
            size: false,
            history: false,
            ghost: false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ghost && self.kind != ListKind::Full {
            return Err(ConfigError::HalfGhostList);
        }
        if self.history && !self.size {
            return Err(ConfigError::HistoryWithoutSize);
        }
        Ok(())
    }

    /// Stencil this style walks, or `None` for all-pairs styles.
    pub fn stencil_style(&self) -> Option<StencilStyle> {
        let bytype = match self.binning {
            Binning::Nsq => return None,
            Binning::Bin => false,
            Binning::Bytype => true,
        };
        Some(StencilStyle {
            half: self.kind == ListKind::Half { newton: true },
            bytype,
        })
    }
}

/// Everything a build reads besides bins and stencils.
#[derive(Clone, Copy)]
pub struct PairContext<'a> {
    pub atoms: &'a Atoms,
    pub simbox: &'a SimBox,
    pub cutneighsq: &'a TypeTable<f64>,
    pub skin: f64,
    pub special_flags: &'a SpecialFlags,
    pub exclusions: &'a Exclusions,
}

/// Exclusion, distance and tagging applied to every candidate pair.
struct PairFilter<'a> {
    ctx: PairContext<'a>,
    size: bool,
    history: bool,
    exclude: bool,
}

impl<'a> PairFilter<'a> {
    fn new(ctx: PairContext<'a>, style: &PairStyle) -> Self {
        Self {
            ctx,
            size: style.size,
            history: style.history,
            exclude: !ctx.exclusions.is_empty(),
        }
    }

    /// Entry to store for `j` in `i`'s list, or `None` to drop it.
    #[inline(always)]
    fn consider(&self, i: usize, j: usize) -> Option<u32> {
        let a = self.ctx.atoms;
        if self.exclude && self.ctx.exclusions.excluded(a, i, j) {
            return None;
        }
        let del = a.x[i] - a.x[j];
        let rsq = del.norm_squared();
        let entry = j as u32;

        if self.size {
            let radsum = a.radius[i] + a.radius[j];
            let cutdist = radsum + self.ctx.skin;
            if rsq > cutdist * cutdist {
                return None;
            }
            if self.history && rsq < radsum * radsum {
                return Some(entry ^ HISTORY_MASK);
            }
            return Some(entry);
        }

        if rsq > *self.ctx.cutneighsq.get(a.type_[i], a.type_[j]) {
            return None;
        }
        let Some(special) = a.special.as_ref().filter(|_| i < a.nlocal) else {
            return Some(entry);
        };
        match find_special(special, self.ctx.special_flags, i, a.tag[j]) {
            SpecialOutcome::None => Some(entry),
            // a bonded partner's far periodic image is an ordinary neighbor
            _ if self.ctx.simbox.minimum_image_check(&del) => Some(entry),
            SpecialOutcome::Exclude => None,
            SpecialOutcome::Flag(which) => Some(entry ^ (which << SBBITS)),
        }
    }

    /// Neighbors of ghost atoms carry no special-bond information.
    #[inline(always)]
    fn consider_ghost(&self, i: usize, j: usize) -> Option<u32> {
        let a = self.ctx.atoms;
        if self.exclude && self.ctx.exclusions.excluded(a, i, j) {
            return None;
        }
        let rsq = (a.x[i] - a.x[j]).norm_squared();
        let cutsq = if self.size {
            let c = a.radius[i] + a.radius[j] + self.ctx.skin;
            c * c
        } else {
            *self.ctx.cutneighsq.get(a.type_[i], a.type_[j])
        };
        (rsq <= cutsq).then_some(j as u32)
    }

    #[inline(always)]
    fn push(&self, chunk: &mut Chunk<'_, u32>, i: usize, j: usize) -> Result<(), PageError> {
        if let Some(e) = self.consider(i, j) {
            chunk.push(e)?;
        }
        Ok(())
    }

    #[inline(always)]
    fn push_ghost(&self, chunk: &mut Chunk<'_, u32>, i: usize, j: usize) -> Result<(), PageError> {
        if let Some(e) = self.consider_ghost(i, j) {
            chunk.push(e)?;
        }
        Ok(())
    }
}

/// Newton-on ownership of an owned/ghost pair in all-pairs builds: decided
/// by tag parity, with the coordinate order for a ghost image of `i` itself.
#[inline]
fn nsq_keeps_ghost(atoms: &Atoms, i: usize, j: usize) -> bool {
    let (itag, jtag) = (atoms.tag[i], atoms.tag[j]);
    if itag > jtag {
        (itag + jtag) % 2 != 0
    } else if itag < jtag {
        (itag + jtag) % 2 != 1
    } else {
        is_upper(&atoms.x[i], &atoms.x[j])
    }
}

/// Builds `list` for `style` from the current bins and stencils.
pub fn build(
    style: &PairStyle,
    list: &mut NeighList,
    nbin: Option<&NBin>,
    nstencil: Option<&NStencil>,
    ctx: PairContext,
) -> Result<(), PairError> {
    let atoms = ctx.atoms;
    let nall = atoms.nall();
    if nall > MAX_NEIGH_INDEX {
        return Err(PairError::TooManyAtoms(nall));
    }
    let _span = info_span!(
        "NPair::build",
        kind = ?style.kind,
        binning = ?style.binning,
        n_local = atoms.nlocal,
        n_all = nall
    )
    .entered();

    let filter = PairFilter::new(ctx, style);
    list.begin(nall);
    match style.binning {
        Binning::Nsq => {
            build_nsq(style, list, &filter)?;
            if style.ghost {
                build_nsq_ghosts(list, &filter)?;
            }
        }
        Binning::Bin | Binning::Bytype => {
            let nbin = nbin.ok_or(PairError::MissingBins)?;
            let ns = nstencil.ok_or(PairError::MissingStencil)?;
            build_binned(style, list, nbin, ns, &filter)?;
            if style.ghost {
                build_binned_ghosts(list, nbin, ns, &filter)?;
            }
        }
    }
    debug!(
        inum = list.inum,
        gnum = list.gnum,
        n_neighbors = list.total_neighbors(),
        "neighbor list built"
    );
    Ok(())
}

fn build_binned(
    style: &PairStyle,
    list: &mut NeighList,
    nbin: &NBin,
    ns: &NStencil,
    filter: &PairFilter,
) -> Result<(), PairError> {
    let atoms = filter.ctx.atoms;
    let nlocal = atoms.nlocal;
    let bytype = ns.style().bytype;
    let props = ns.properties();

    for i in 0..nlocal {
        let itype = atoms.type_[i];
        let xi = &atoms.x[i];
        let mut chunk = list.page_mut().vget();
        let ktypes = if bytype { 1..=atoms.ntypes } else { itype..=itype };

        for ktype in ktypes {
            let Some(st) = ns.get(itype, ktype) else {
                continue;
            };
            // atom i relocated into the grid of type ktype
            let kbin = if ktype == itype {
                nbin.atom2bin(i)
            } else {
                nbin.coord2bin(xi, ktype)
                    .ok_or(PairError::OutOfRange { atom: i, itype: ktype })?
            };

            match style.kind {
                ListKind::Half { newton: true } => {
                    let half_home = props.is_none_or(|p| *p.half.get(itype, ktype));
                    if half_home && ktype == itype {
                        // later owned atoms of the home bin, then ghosts above i
                        for j in nbin.after(i) {
                            if j >= nlocal && !is_upper(xi, &atoms.x[j]) {
                                continue;
                            }
                            filter.push(&mut chunk, i, j)?;
                        }
                    } else if half_home {
                        for j in nbin.bin(ktype, kbin) {
                            if j < i || (j >= nlocal && !is_upper(xi, &atoms.x[j])) {
                                continue;
                            }
                            filter.push(&mut chunk, i, j)?;
                        }
                    }
                    for &s in st.offsets() {
                        for j in nbin.bin_offset(ktype, kbin, s) {
                            filter.push(&mut chunk, i, j)?;
                        }
                    }
                }
                ListKind::Half { newton: false } => {
                    for &s in st.offsets() {
                        for j in nbin.bin_offset(ktype, kbin, s) {
                            if j <= i {
                                continue;
                            }
                            filter.push(&mut chunk, i, j)?;
                        }
                    }
                }
                ListKind::Full => {
                    for &s in st.offsets() {
                        for j in nbin.bin_offset(ktype, kbin, s) {
                            if j == i {
                                continue;
                            }
                            filter.push(&mut chunk, i, j)?;
                        }
                    }
                }
            }
        }
        let slot = chunk.vgot();
        list.store(i, slot);
    }
    list.inum = nlocal;
    Ok(())
}

/// Lists of ghost atoms. Their bins may sit at the edge of the grid, so
/// stencil offsets are applied per axis with bounds checks.
fn build_binned_ghosts(
    list: &mut NeighList,
    nbin: &NBin,
    ns: &NStencil,
    filter: &PairFilter,
) -> Result<(), PairError> {
    let atoms = filter.ctx.atoms;
    let (nlocal, nall) = (atoms.nlocal, atoms.nall());
    let bytype = ns.style().bytype;

    for i in nlocal..nall {
        let itype = atoms.type_[i];
        let mut chunk = list.page_mut().vget();
        let ktypes = if bytype { 1..=atoms.ntypes } else { itype..=itype };
        for ktype in ktypes {
            let Some(st) = ns.get(itype, ktype) else {
                continue;
            };
            let g = nbin.grid(ktype);
            let Some(home) = g.coord2bin_xyz(&atoms.x[i]) else {
                continue;
            };
            for o in st.xyz() {
                let mut b = [0usize; 3];
                let inside = (0..3).all(|d| {
                    let v = home[d] as i64 + o[d] as i64;
                    b[d] = v.max(0) as usize;
                    v >= 0 && (v as usize) < g.mbin[d]
                });
                if !inside {
                    continue;
                }
                for j in nbin.bin(ktype, g.index(b)) {
                    if j == i {
                        continue;
                    }
                    filter.push_ghost(&mut chunk, i, j)?;
                }
            }
        }
        let slot = chunk.vgot();
        list.store(i, slot);
    }
    list.gnum = nall - nlocal;
    Ok(())
}

fn build_nsq(
    style: &PairStyle,
    list: &mut NeighList,
    filter: &PairFilter,
) -> Result<(), PairError> {
    let atoms = filter.ctx.atoms;
    let (nlocal, nall) = (atoms.nlocal, atoms.nall());

    for i in 0..nlocal {
        let mut chunk = list.page_mut().vget();
        match style.kind {
            ListKind::Half { newton: false } => {
                for j in (i + 1)..nall {
                    filter.push(&mut chunk, i, j)?;
                }
            }
            ListKind::Half { newton: true } => {
                for j in (i + 1)..nall {
                    if j >= nlocal && !nsq_keeps_ghost(atoms, i, j) {
                        continue;
                    }
                    filter.push(&mut chunk, i, j)?;
                }
            }
            ListKind::Full => {
                for j in (0..nall).filter(|&j| j != i) {
                    filter.push(&mut chunk, i, j)?;
                }
            }
        }
        let slot = chunk.vgot();
        list.store(i, slot);
    }
    list.inum = nlocal;
    Ok(())
}

fn build_nsq_ghosts(list: &mut NeighList, filter: &PairFilter) -> Result<(), PairError> {
    let atoms = filter.ctx.atoms;
    let (nlocal, nall) = (atoms.nlocal, atoms.nall());
    for i in nlocal..nall {
        let mut chunk = list.page_mut().vget();
        for j in (0..nall).filter(|&j| j != i) {
            filter.push_ghost(&mut chunk, i, j)?;
        }
        let slot = chunk.vgot();
        list.store(i, slot);
    }
    list.gnum = nall - nlocal;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SubDomain;
    use crate::exclusion::{SpecialBonds, SpecialFlag, sbmask};
    use crate::nbin::{BinContext, NBinStyle};
    use crate::nstencil::StencilContext;
    use nalgebra::Vector3;
    use std::collections::BTreeSet;

    struct Fixture {
        simbox: SimBox,
        cutneighsq: TypeTable<f64>,
        cuttype: Vec<f64>,
        cutmax: f64,
        flags: SpecialFlags,
        exclusions: Exclusions,
    }

    impl Fixture {
        fn new(simbox: SimBox, cut: &TypeTable<f64>) -> Self {
            let cutneighsq = cut.map(|c| c * c);
            let cuttype = (1..=cut.ntypes()).map(|i| cut.row_max(i)).collect();
            Self {
                simbox,
                cutmax: cut.max(),
                cutneighsq,
                cuttype,
                flags: SpecialFlags::default(),
                exclusions: Exclusions::default(),
            }
        }

        fn build(&self, atoms: &Atoms, style: PairStyle) -> Result<NeighList, PairError> {
            let sub = SubDomain::whole(&self.simbox);
            let mut list = NeighList::new(200, 4000)?;
            let ctx = PairContext {
                atoms,
                simbox: &self.simbox,
                cutneighsq: &self.cutneighsq,
                skin: 0.0,
                special_flags: &self.flags,
                exclusions: &self.exclusions,
            };
            let Some(sstyle) = style.stencil_style() else {
                build(&style, &mut list, None, None, ctx)?;
                return Ok(list);
            };
            let mut nbin = NBin::new(sstyle.bin_style());
            let bctx = BinContext {
                simbox: &self.simbox,
                sub: &sub,
                cutghost: self.cutmax,
                cutneighmax: self.cutmax,
                cuttype: &self.cuttype,
                binsize_user: None,
            };
            nbin.setup_bins(&bctx).unwrap();
            nbin.bin_atoms(atoms).unwrap();
            let mut ns = NStencil::new(sstyle);
            let sctx = StencilContext {
                cutneighmax: self.cutmax,
                cutghost: self.cutmax,
                cutneighsq: &self.cutneighsq,
                cuttype: &self.cuttype,
            };
            ns.create(&nbin, &sctx, 0).unwrap();
            build(&style, &mut list, Some(&nbin), Some(&ns), ctx)?;
            Ok(list)
        }
    }

    fn unordered(list: &NeighList) -> Vec<(usize, usize)> {
        let mut v: Vec<_> = list.pairs().map(|(i, j, _)| (i.min(j), i.max(j))).collect();
        v.sort();
        v
    }

    fn four_atoms(x2: f64) -> Atoms {
        let mut a = Atoms::new(1);
        for x in [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.9, 0.0, 0.0),
            Vector3::new(x2, 0.0, 0.0),
            Vector3::new(0.0, 0.0, 5.0),
        ] {
            a.add_local(x, 1).unwrap();
        }
        a
    }

    const ALL_HALF: [PairStyle; 6] = [
        PairStyle {
            kind: ListKind::Half { newton: true },
            binning: Binning::Bin,
            size: false,
            history: false,
            ghost: false,
        },
        PairStyle {
            kind: ListKind::Half { newton: false },
            binning: Binning::Bin,
            size: false,
            history: false,
            ghost: false,
        },
        PairStyle {
            kind: ListKind::Half { newton: true },
            binning: Binning::Bytype,
            size: false,
            history: false,
            ghost: false,
        },
        PairStyle {
            kind: ListKind::Half { newton: false },
            binning: Binning::Bytype,
            size: false,
            history: false,
            ghost: false,
        },
        PairStyle {
            kind: ListKind::Half { newton: true },
            binning: Binning::Nsq,
            size: false,
            history: false,
            ghost: false,
        },
        PairStyle {
            kind: ListKind::Half { newton: false },
            binning: Binning::Nsq,
            size: false,
            history: false,
            ghost: false,
        },
    ];

    #[test]
    fn test_four_atom_scenario() {
        let b = SimBox::cube(10.0, false).unwrap();
        for style in ALL_HALF {
            let f = Fixture::new(b.clone(), &TypeTable::new(1, 1.0));
            let l = f.build(&four_atoms(2.0), style).unwrap();
            assert_eq!(unordered(&l), vec![(0, 1)], "{style:?}");
            assert_eq!(l.numneigh[3], 0);

            let f = Fixture::new(b.clone(), &TypeTable::new(1, 1.05));
            let l = f.build(&four_atoms(2.0), style).unwrap();
            assert_eq!(unordered(&l), vec![(0, 1)], "{style:?}");

            // 0-2 stays out at 2.0; 1-2 at 1.1 comes in
            let f = Fixture::new(b.clone(), &TypeTable::new(1, 1.2));
            let l = f.build(&four_atoms(2.0), style).unwrap();
            assert_eq!(unordered(&l), vec![(0, 1), (1, 2)], "{style:?}");

            let l = f.build(&four_atoms(1.5), style).unwrap();
            assert_eq!(unordered(&l), vec![(0, 1), (1, 2)], "{style:?}");
        }
    }

    #[test]
    fn test_full_list_is_symmetric() {
        let b = SimBox::cube(10.0, false).unwrap();
        let f = Fixture::new(b, &TypeTable::new(1, 1.2));
        for binning in [Binning::Bin, Binning::Bytype, Binning::Nsq] {
            let l = f.build(&four_atoms(1.5), PairStyle::new(ListKind::Full, binning)).unwrap();
            let set: BTreeSet<_> = l.pairs().map(|(i, j, _)| (i, j)).collect();
            assert_eq!(set.len(), 4);
            assert!(set.iter().all(|&(i, j)| set.contains(&(j, i))));
        }
    }

    #[test]
    fn test_half_newton_with_ghost_images() {
        // atom 1's periodic image sits as ghost 2 next to atom 0
        let b = SimBox::cube(10.0, true).unwrap();
        let mut a = Atoms::new(1);
        a.add_local(Vector3::new(0.2, 5.0, 5.0), 1).unwrap();
        a.add_local(Vector3::new(9.8, 5.0, 5.0), 1).unwrap();
        a.add_ghost_copy(1, Vector3::new(-0.2, 5.0, 5.0), [-1, 0, 0]).unwrap();
        a.add_ghost_copy(0, Vector3::new(10.2, 5.0, 5.0), [1, 0, 0]).unwrap();
        let f = Fixture::new(b, &TypeTable::new(1, 1.0));

        for binning in [Binning::Bin, Binning::Nsq] {
            let newton = f
                .build(&a, PairStyle::new(ListKind::Half { newton: true }, binning))
                .unwrap();
            assert_eq!(newton.total_neighbors(), 1, "{binning:?}");

            let newtoff = f
                .build(&a, PairStyle::new(ListKind::Half { newton: false }, binning))
                .unwrap();
            assert_eq!(unordered(&newtoff), vec![(0, 2), (1, 3)], "{binning:?}");
        }
    }

    #[test]
    fn test_full_ghost_lists() {
        let b = SimBox::cube(10.0, true).unwrap();
        let mut a = Atoms::new(1);
        a.add_local(Vector3::new(0.2, 5.0, 5.0), 1).unwrap();
        a.add_local(Vector3::new(9.8, 5.0, 5.0), 1).unwrap();
        a.add_ghost_copy(1, Vector3::new(-0.2, 5.0, 5.0), [-1, 0, 0]).unwrap();
        a.add_ghost_copy(0, Vector3::new(10.2, 5.0, 5.0), [1, 0, 0]).unwrap();
        let f = Fixture::new(b, &TypeTable::new(1, 1.0));
        for binning in [Binning::Bin, Binning::Nsq] {
            let mut style = PairStyle::new(ListKind::Full, binning);
            style.ghost = true;
            let l = f.build(&a, style).unwrap();
            assert_eq!(l.inum, 2);
            assert_eq!(l.gnum, 2);
            assert_eq!(l.ilist, vec![0, 1, 2, 3]);
            assert_eq!(l.neighbors(2), &[0]);
            assert_eq!(l.neighbors(3), &[1]);
        }
    }

    #[test]
    fn test_bytype_respects_pair_cutoffs() {
        let b = SimBox::cube(10.0, false).unwrap();
        let mut cut = TypeTable::new(2, 0.0);
        cut.set(1, 1, 3.0);
        cut.set_sym(1, 2, 1.0);
        cut.set(2, 2, 1.5);
        let f = Fixture::new(b, &cut);
        let mut a = Atoms::new(2);
        a.add_local(Vector3::new(2.0, 2.0, 2.0), 1).unwrap();
        a.add_local(Vector3::new(4.5, 2.0, 2.0), 1).unwrap();
        a.add_local(Vector3::new(3.2, 2.0, 2.0), 2).unwrap();
        a.add_local(Vector3::new(4.0, 2.0, 2.0), 2).unwrap();
        // 0-1: 2.5 (<3.0), 0-2: 1.2 (>1.0), 1-2: 1.3, 1-3: 0.5, 2-3: 0.8 (<1.5)
        let expect = vec![(0, 1), (1, 3), (2, 3)];
        for style in ALL_HALF {
            let l = f.build(&a, style).unwrap();
            assert_eq!(unordered(&l), expect, "{style:?}");
        }
    }

    #[test]
    fn test_special_bonds_exclude_and_flag() {
        let b = SimBox::cube(10.0, false).unwrap();
        let mut f = Fixture::new(b, &TypeTable::new(1, 2.0));
        let mut a = Atoms::new(1);
        for x in [1.0, 2.0, 3.0] {
            a.add_local(Vector3::new(x, 1.0, 1.0), 1).unwrap();
        }
        let mut sb = SpecialBonds::new(3);
        sb.add_pair(&a, 0, 1, 1);
        sb.add_pair(&a, 1, 2, 1);
        sb.add_pair(&a, 0, 2, 2);
        a.special = Some(sb);
        f.flags = SpecialFlags([SpecialFlag::Exclude, SpecialFlag::Flag, SpecialFlag::Flag]);

        let l = f
            .build(&a, PairStyle::new(ListKind::Half { newton: true }, Binning::Bin))
            .unwrap();
        let pairs: Vec<_> = l.pairs().collect();
        assert_eq!(pairs, vec![(0, 2, 2)]);
        assert_eq!(sbmask(l.neighbors(0)[0]), 2);
    }

    #[test]
    fn test_size_history_bits() {
        let b = SimBox::cube(10.0, false).unwrap();
        let f = Fixture::new(b, &TypeTable::new(1, 1.5));
        let mut a = Atoms::new(1);
        for x in [1.0, 1.9, 3.0] {
            a.add_local(Vector3::new(x, 1.0, 1.0), 1).unwrap();
        }
        for i in 0..3 {
            a.set_radius(i, 0.5).unwrap();
        }
        let mut style = PairStyle::new(ListKind::Half { newton: true }, Binning::Bin);
        style.size = true;
        style.history = true;
        let l = f.build(&a, style).unwrap();
        // 0-1 overlap; 1-2 at 1.1 is beyond the radius sum with zero skin
        assert_eq!(l.neighbors(0), &[1 ^ HISTORY_MASK]);
        assert!(l.neighbors(1).is_empty());
    }

    #[test]
    fn test_overflow_propagates() {
        let b = SimBox::cube(10.0, false).unwrap();
        let f = Fixture::new(b, &TypeTable::new(1, 3.0));
        let mut a = Atoms::new(1);
        for k in 0..300 {
            a.add_local(Vector3::new(5.0 + 0.001 * k as f64, 5.0, 5.0), 1).unwrap();
        }
        let err = f.build(&a, PairStyle::new(ListKind::Full, Binning::Bin));
        assert_eq!(err.unwrap_err(), PairError::Page(PageError::Overflow));
    }

    #[test]
    fn test_style_validation() {
        let mut s = PairStyle::new(ListKind::Half { newton: true }, Binning::Bin);
        s.ghost = true;
        assert_eq!(s.validate(), Err(ConfigError::HalfGhostList));
        let mut s = PairStyle::new(ListKind::Full, Binning::Bin);
        s.history = true;
        assert_eq!(s.validate(), Err(ConfigError::HistoryWithoutSize));
        assert!(PairStyle::new(ListKind::Full, Binning::Nsq).stencil_style().is_none());
        let st = PairStyle::new(ListKind::Half { newton: true }, Binning::Bytype)
            .stencil_style()
            .unwrap();
        assert!(st.half && st.bytype);
        assert_eq!(st.bin_style(), NBinStyle::Bytype);
    }
}
