//! Owner of all neighbor lists of one rank: turns requests into pair
//! styles, shares bins and stencils between lists, and decides when to
//! rebuild.

use crate::atom::{AtomError, Atoms};
use crate::config::{Binning, ConfigError, NeighSettings};
use crate::domain::{DomainError, SimBox, SubDomain};
use crate::exclusion::{Exclusions, SpecialFlags};
use crate::ghost::GhostError;
use crate::nbin::{BinContext, BinError, NBin, NBinStyle};
use crate::neigh_list::NeighList;
use crate::npair::{self, ListKind, PairContext, PairError, PairStyle};
use crate::npair_derived::{SkipFlags, build_halffull, build_skip};
use crate::nstencil::{NStencil, StencilContext, StencilError, StencilStyle};
use crate::page::PageError;
use crate::table::TypeTable;
use nalgebra::Vector3;
use thiserror::Error;
use tracing::{debug, info, info_span};

#[derive(Error, Debug, PartialEq)]
pub enum NeighborError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Atom(#[from] AtomError),
    #[error(transparent)]
    Page(#[from] PageError),
    #[error(transparent)]
    Bin(#[from] BinError),
    #[error(transparent)]
    Stencil(#[from] StencilError),
    #[error(transparent)]
    Pair(#[from] PairError),
    #[error(transparent)]
    Ghost(#[from] GhostError),
    #[error("Atoms carry {got} types but the cutoff table has {expected}")]
    NtypesMismatch { expected: usize, got: usize },
}

/// Handle of a requested list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListId(pub usize);

#[derive(Clone, Debug, PartialEq)]
pub enum ListSource {
    /// Built directly from bins or all pairs.
    Pairs,
    /// Half list taken from a full parent.
    Halffull(ListId),
    /// Parent list with some types dropped.
    Skip(ListId, SkipFlags),
}

/// What a consumer (pair style, fix, compute) asks for.
#[derive(Clone, Debug, PartialEq)]
pub struct NeighRequest {
    pub full: bool,
    pub size: bool,
    pub history: bool,
    pub ghost: bool,
    pub source: ListSource,
}

impl NeighRequest {
    pub fn half() -> Self {
        Self {
            full: false,
            size: false,
            history: false,
            ghost: false,
            source: ListSource::Pairs,
        }
    }

    pub fn full() -> Self {
        Self {
            full: true,
            ..Self::half()
        }
    }

    pub fn halffull(parent: ListId) -> Self {
        Self {
            source: ListSource::Halffull(parent),
            ..Self::half()
        }
    }

    pub fn skip(parent: ListId, flags: SkipFlags) -> Self {
        Self {
            source: ListSource::Skip(parent, flags),
            ..Self::half()
        }
    }

    pub fn with_size(mut self) -> Self {
        self.size = true;
        self
    }

    pub fn with_history(mut self) -> Self {
        self.history = true;
        self
    }

    pub fn with_ghost(mut self) -> Self {
        self.ghost = true;
        self
    }
}

#[derive(Debug)]
enum Plan {
    Pairs {
        style: PairStyle,
        bin: Option<usize>,
        stencil: Option<usize>,
    },
    Halffull {
        parent: usize,
        newton: bool,
    },
    Skip {
        parent: usize,
        flags: SkipFlags,
    },
}

/// Cutoffs derived from the force cutoffs and the skin.
#[derive(Clone, Debug, PartialEq)]
pub struct Cutoffs {
    pub cutneighsq: TypeTable<f64>,
    /// Largest neighbor cutoff of each type, indexed by `type - 1`.
    pub cuttype: Vec<f64>,
    pub cutneighmax: f64,
    pub cutghost: f64,
}

impl Cutoffs {
    /// A pair with no force cutoff gets no skin either.
    pub fn new(cutforce: &TypeTable<f64>, skin: f64) -> Result<Self, ConfigError> {
        for (itype, jtype, &cutoff) in cutforce.iter() {
            if !cutoff.is_finite() || cutoff < 0.0 {
                return Err(ConfigError::InvalidCutoff { itype, jtype, cutoff });
            }
        }
        let cutneighsq = cutforce.map(|&c| if c > 0.0 { (c + skin) * (c + skin) } else { 0.0 });
        let cuttype: Vec<f64> = (1..=cutneighsq.ntypes())
            .map(|t| cutneighsq.row_max(t).sqrt())
            .collect();
        let cutneighmax = cuttype.iter().copied().fold(0.0, f64::max);
        Ok(Self {
            cutneighsq,
            cuttype,
            cutneighmax,
            cutghost: cutneighmax,
        })
    }
}

pub struct Neighbor {
    settings: NeighSettings,
    simbox: SimBox,
    sub: SubDomain,
    cutforce: TypeTable<f64>,
    cutoffs: Cutoffs,
    special_flags: SpecialFlags,
    exclusions: Exclusions,
    requests: Vec<NeighRequest>,
    plans: Vec<Plan>,
    lists: Vec<NeighList>,
    nbins: Vec<NBin>,
    nstencils: Vec<NStencil>,
    bins_stale: bool,
    xhold: Vec<Vector3<f64>>,
    ago: Option<u64>,
    ncalls: u64,
    last_build: Option<u64>,
}

impl Neighbor {
    pub fn new(
        settings: NeighSettings,
        simbox: SimBox,
        sub: SubDomain,
        cutforce: TypeTable<f64>,
    ) -> Result<Self, NeighborError> {
        settings.validate()?;
        let cutoffs = Cutoffs::new(&cutforce, settings.skin)?;
        Ok(Self {
            settings,
            simbox,
            sub,
            cutforce,
            cutoffs,
            special_flags: SpecialFlags::default(),
            exclusions: Exclusions::default(),
            requests: Vec::new(),
            plans: Vec::new(),
            lists: Vec::new(),
            nbins: Vec::new(),
            nstencils: Vec::new(),
            bins_stale: true,
            xhold: Vec::new(),
            ago: None,
            ncalls: 0,
            last_build: None,
        })
    }

    pub fn settings(&self) -> &NeighSettings {
        &self.settings
    }

    pub fn cutoffs(&self) -> &Cutoffs {
        &self.cutoffs
    }

    pub fn cutforce(&self) -> &TypeTable<f64> {
        &self.cutforce
    }

    pub fn simbox(&self) -> &SimBox {
        &self.simbox
    }

    pub fn ntypes(&self) -> usize {
        self.cutforce.ntypes()
    }

    pub fn set_special_flags(&mut self, flags: SpecialFlags) {
        self.special_flags = flags;
    }

    pub fn exclusions_mut(&mut self) -> &mut Exclusions {
        &mut self.exclusions
    }

    /// Ghost atoms must cover at least this distance beyond the sub-domain.
    pub fn cutghost(&self) -> f64 {
        self.cutoffs.cutghost
    }

    /// Registers a list; it exists after the next `init`.
    pub fn request(&mut self, req: NeighRequest) -> ListId {
        self.requests.push(req);
        self.plans.clear();
        ListId(self.requests.len() - 1)
    }

    /// Chooses a pair style for every request and creates the lists, bins
    /// and stencils they need. Bins and stencils are shared by all lists of
    /// the same style.
    pub fn init(&mut self) -> Result<(), NeighborError> {
        let _span = info_span!("Neighbor::init", n_requests = self.requests.len()).entered();
        if self.simbox.is_triclinic() && self.settings.binning != Binning::Nsq {
            return Err(ConfigError::Triclinic.into());
        }
        let ntypes = self.ntypes();
        self.exclusions.init(ntypes);

        let mut plans: Vec<Plan> = Vec::with_capacity(self.requests.len());
        let mut bin_styles: Vec<NBinStyle> = Vec::new();
        let mut stencil_styles: Vec<StencilStyle> = Vec::new();
        for (id, req) in self.requests.iter().enumerate() {
            let parent_of = |p: ListId| -> Result<usize, ConfigError> {
                if p.0 >= id {
                    return Err(ConfigError::UnknownParent(id));
                }
                Ok(p.0)
            };
            let plan = match &req.source {
                ListSource::Pairs => {
                    let kind = if req.full {
                        ListKind::Full
                    } else {
                        ListKind::Half {
                            newton: self.settings.newton_pair,
                        }
                    };
                    let style = PairStyle {
                        kind,
                        binning: self.settings.binning,
                        size: req.size,
                        history: req.history,
                        ghost: req.ghost,
                    };
                    style.validate()?;
                    let (bin, stencil) = match style.stencil_style() {
                        Some(ss) => (
                            Some(position_or_push(&mut bin_styles, ss.bin_style())),
                            Some(position_or_push(&mut stencil_styles, ss)),
                        ),
                        None => (None, None),
                    };
                    Plan::Pairs { style, bin, stencil }
                }
                ListSource::Halffull(p) => {
                    let parent = parent_of(*p)?;
                    let parent_full = match &self.requests[parent].source {
                        ListSource::Pairs => self.requests[parent].full,
                        _ => false,
                    };
                    if !parent_full {
                        return Err(ConfigError::ParentNotFull(id).into());
                    }
                    Plan::Halffull {
                        parent,
                        newton: self.settings.newton_pair,
                    }
                }
                ListSource::Skip(p, flags) => {
                    let parent = parent_of(*p)?;
                    if flags.iskip.len() != ntypes || flags.ijskip.ntypes() != ntypes {
                        return Err(ConfigError::SkipTypes {
                            expected: ntypes,
                            got: flags.iskip.len(),
                        }
                        .into());
                    }
                    Plan::Skip {
                        parent,
                        flags: flags.clone(),
                    }
                }
            };
            debug!(list = id, plan = ?plan, "neighbor list plan");
            plans.push(plan);
        }

        let mut lists = Vec::with_capacity(plans.len());
        for _ in &plans {
            lists.push(NeighList::new(self.settings.one_atom, self.settings.page)?);
        }
        self.nbins = bin_styles.into_iter().map(NBin::new).collect();
        self.nstencils = stencil_styles.into_iter().map(NStencil::new).collect();
        self.plans = plans;
        self.lists = lists;
        self.bins_stale = true;
        self.ago = None;
        info!(
            n_lists = self.lists.len(),
            n_bins = self.nbins.len(),
            n_stencils = self.nstencils.len(),
            cutneighmax = self.cutoffs.cutneighmax,
            "neighbor init"
        );
        Ok(())
    }

    /// Resizes bins for the current box; existing stencils become stale.
    pub fn setup_bins(&mut self) -> Result<(), NeighborError> {
        let ctx = BinContext {
            simbox: &self.simbox,
            sub: &self.sub,
            cutghost: self.cutoffs.cutghost,
            cutneighmax: self.cutoffs.cutneighmax,
            cuttype: &self.cutoffs.cuttype,
            binsize_user: self.settings.binsize_user,
        };
        for nb in &mut self.nbins {
            nb.setup_bins(&ctx)?;
        }
        for ns in &mut self.nstencils {
            ns.mark_stale();
        }
        self.bins_stale = false;
        Ok(())
    }

    /// New box or sub-domain; bins are set up again before the next build.
    pub fn reset_box(&mut self, simbox: SimBox, sub: SubDomain) {
        self.simbox = simbox;
        self.sub = sub;
        self.bins_stale = true;
    }

    /// Whether the lists must be rebuilt at this step. Counts steps since
    /// the last build, so call it once per step.
    pub fn decide(&mut self, atoms: &Atoms) -> bool {
        let Some(ago) = self.ago.as_mut() else {
            return true;
        };
        *ago += 1;
        let ago = *ago;
        if ago < self.settings.delay || ago % self.settings.every != 0 {
            return false;
        }
        if self.settings.once {
            return false;
        }
        if !self.settings.check {
            return true;
        }
        self.check_distance(atoms)
    }

    /// True if any owned atom moved more than half the skin since the last
    /// build, or the owned atoms changed.
    pub fn check_distance(&self, atoms: &Atoms) -> bool {
        if atoms.nlocal != self.xhold.len() {
            return true;
        }
        let delta = 0.5 * self.settings.skin;
        let deltasq = delta * delta;
        atoms.x[..atoms.nlocal]
            .iter()
            .zip(&self.xhold)
            .any(|(x, h)| (x - h).norm_squared() > deltasq)
    }

    /// Bins the atoms and builds every list, parents before children.
    pub fn build(&mut self, step: u64, atoms: &Atoms) -> Result<(), NeighborError> {
        if self.plans.len() != self.requests.len() {
            return Err(ConfigError::NotInitialized.into());
        }
        if atoms.ntypes != self.ntypes() {
            return Err(NeighborError::NtypesMismatch {
                expected: self.ntypes(),
                got: atoms.ntypes,
            });
        }
        atoms.validate()?;
        let _span =
            info_span!("Neighbor::build", step, n_local = atoms.nlocal, n_all = atoms.nall())
                .entered();

        if self.bins_stale {
            self.setup_bins()?;
        }
        for nb in &mut self.nbins {
            nb.bin_atoms(atoms)?;
        }
        let sctx = StencilContext {
            cutneighmax: self.cutoffs.cutneighmax,
            cutghost: self.cutoffs.cutghost,
            cutneighsq: &self.cutoffs.cutneighsq,
            cuttype: &self.cutoffs.cuttype,
        };
        for ns in &mut self.nstencils {
            if !ns.is_stale() {
                continue;
            }
            let bin_style = ns.style().bin_style();
            let nb = self
                .nbins
                .iter()
                .find(|n| n.style() == bin_style)
                .ok_or(BinError::NotSetup)?;
            ns.create(nb, &sctx, step)?;
        }

        let ctx = PairContext {
            atoms,
            simbox: &self.simbox,
            cutneighsq: &self.cutoffs.cutneighsq,
            skin: self.settings.skin,
            special_flags: &self.special_flags,
            exclusions: &self.exclusions,
        };
        for (idx, plan) in self.plans.iter().enumerate() {
            let (done, rest) = self.lists.split_at_mut(idx);
            let list = &mut rest[0];
            match plan {
                Plan::Pairs { style, bin, stencil } => {
                    let nb = bin.and_then(|b| self.nbins.get(b));
                    let ns = stencil.and_then(|s| self.nstencils.get(s));
                    npair::build(style, list, nb, ns, ctx)?;
                }
                Plan::Halffull { parent, newton } => {
                    build_halffull(&done[*parent], list, atoms, *newton)?;
                }
                Plan::Skip { parent, flags } => {
                    build_skip(&done[*parent], list, atoms, flags)?;
                }
            }
        }

        self.xhold.clear();
        self.xhold.extend_from_slice(&atoms.x[..atoms.nlocal]);
        self.ago = Some(0);
        self.ncalls += 1;
        self.last_build = Some(step);
        Ok(())
    }

    pub fn list(&self, id: ListId) -> Option<&NeighList> {
        self.lists.get(id.0)
    }

    pub fn nlists(&self) -> usize {
        self.lists.len()
    }

    /// Number of builds so far.
    pub fn ncalls(&self) -> u64 {
        self.ncalls
    }

    pub fn last_build(&self) -> Option<u64> {
        self.last_build
    }

    pub fn memory_usage(&self) -> usize {
        self.lists.iter().map(NeighList::memory_usage).sum::<usize>()
            + self.nbins.iter().map(NBin::memory_usage).sum::<usize>()
            + self.xhold.capacity() * std::mem::size_of::<Vector3<f64>>()
    }
}

fn position_or_push<T: PartialEq>(v: &mut Vec<T>, item: T) -> usize {
    match v.iter().position(|x| *x == item) {
        Some(i) => i,
        None => {
            v.push(item);
            v.len() - 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ghost::add_periodic_ghosts;
    use approx::assert_relative_eq;
    use std::collections::BTreeSet;

    fn lattice(n: usize, spacing: f64) -> Atoms {
        let mut a = Atoms::new(2);
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    let x = Vector3::new(i as f64, j as f64, k as f64) * spacing
                        + Vector3::repeat(0.25);
                    a.add_local(x, 1 + (i + j + k) % 2).unwrap();
                }
            }
        }
        a
    }

    fn neighbor(binning: Binning, newton: bool, cut: f64, box_len: f64) -> Neighbor {
        let simbox = SimBox::cube(box_len, true).unwrap();
        let sub = SubDomain::whole(&simbox);
        let settings = NeighSettings::default()
            .with_binning(binning)
            .with_newton(newton)
            .with_one_atom(500, 50_000);
        Neighbor::new(settings, simbox, sub, TypeTable::new(2, cut)).unwrap()
    }

    fn tag_pairs(list: &NeighList, atoms: &Atoms) -> BTreeSet<(i64, i64)> {
        list.pairs()
            .filter(|&(i, _, _)| i < atoms.nlocal)
            .map(|(i, j, _)| {
                let (a, b) = (atoms.tag[i], atoms.tag[j]);
                (a.min(b), a.max(b))
            })
            .collect()
    }

    #[test]
    fn test_cutoffs_from_force_table() {
        let mut cf = TypeTable::new(2, 1.0);
        cf.set_sym(1, 2, 0.0);
        cf.set(2, 2, 2.0);
        let c = Cutoffs::new(&cf, 0.5).unwrap();
        assert_relative_eq!(*c.cutneighsq.get(1, 1), 2.25);
        assert_relative_eq!(*c.cutneighsq.get(1, 2), 0.0);
        assert_relative_eq!(c.cuttype[1], 2.5);
        assert_relative_eq!(c.cutneighmax, 2.5);

        cf.set(1, 1, -1.0);
        assert!(matches!(
            Cutoffs::new(&cf, 0.5),
            Err(ConfigError::InvalidCutoff { itype: 1, jtype: 1, .. })
        ));
    }

    #[test]
    fn test_binned_styles_agree_with_nsq() {
        let mut atoms = lattice(5, 1.1);
        let mut reference = None;
        for binning in [Binning::Bin, Binning::Bytype, Binning::Nsq] {
            for newton in [true, false] {
                let mut nb = neighbor(binning, newton, 1.2, 5.5);
                let half = nb.request(NeighRequest::half());
                let full = nb.request(NeighRequest::full());
                let hf = nb.request(NeighRequest::halffull(full));
                nb.init().unwrap();
                add_periodic_ghosts(&mut atoms, nb.simbox(), nb.cutghost()).unwrap();
                nb.build(0, &atoms).unwrap();

                let h = tag_pairs(nb.list(half).unwrap(), &atoms);
                assert_eq!(h, tag_pairs(nb.list(full).unwrap(), &atoms));
                assert_eq!(h, tag_pairs(nb.list(hf).unwrap(), &atoms));
                match &reference {
                    None => reference = Some(h),
                    Some(r) => assert_eq!(&h, r, "{binning:?} newton={newton}"),
                }
            }
        }
        // nearest neighbors of a simple cubic lattice, 6 bonds per site
        assert_eq!(reference.unwrap().len(), 125 * 3);
    }

    #[test]
    fn test_skip_list_keeps_one_type() {
        let mut atoms = lattice(4, 1.0);
        let mut nb = neighbor(Binning::Bin, true, 1.5, 4.0);
        let full = nb.request(NeighRequest::full());
        let skip = nb.request(NeighRequest::skip(full, SkipFlags::only_types(2, &[1])));
        nb.init().unwrap();
        add_periodic_ghosts(&mut atoms, nb.simbox(), nb.cutghost()).unwrap();
        nb.build(0, &atoms).unwrap();
        let list = nb.list(skip).unwrap();
        assert_eq!(list.inum, 32);
        assert!(list.pairs().all(|(i, j, _)| atoms.type_[i] == 1 && atoms.type_[j] == 1));
        assert!(list.total_neighbors() > 0);
    }

    #[test]
    fn test_init_errors() {
        let mut nb = neighbor(Binning::Bin, true, 1.0, 5.0);
        let h = nb.request(NeighRequest::half());
        nb.request(NeighRequest::halffull(h));
        assert_eq!(nb.init(), Err(ConfigError::ParentNotFull(1).into()));

        let mut nb = neighbor(Binning::Bin, true, 1.0, 5.0);
        nb.request(NeighRequest::halffull(ListId(3)));
        assert_eq!(nb.init(), Err(ConfigError::UnknownParent(0).into()));

        let mut nb = neighbor(Binning::Bin, true, 1.0, 5.0);
        nb.request(NeighRequest::half().with_ghost());
        assert_eq!(nb.init(), Err(ConfigError::HalfGhostList.into()));

        let mut nb = neighbor(Binning::Bin, true, 1.0, 5.0);
        let f = nb.request(NeighRequest::full());
        nb.request(NeighRequest::skip(f, SkipFlags::none(3)));
        assert_eq!(
            nb.init(),
            Err(ConfigError::SkipTypes { expected: 2, got: 3 }.into())
        );

        let simbox = SimBox::cube(5.0, true).unwrap().with_triclinic(true);
        let sub = SubDomain::whole(&simbox);
        let mut nb =
            Neighbor::new(NeighSettings::default(), simbox, sub, TypeTable::new(1, 1.0)).unwrap();
        nb.request(NeighRequest::half());
        assert_eq!(nb.init(), Err(ConfigError::Triclinic.into()));

        let mut nb = neighbor(Binning::Bin, true, 1.0, 5.0);
        nb.request(NeighRequest::half());
        assert_eq!(nb.build(0, &Atoms::new(2)), Err(ConfigError::NotInitialized.into()));
    }

    #[test]
    fn test_shared_bins_and_stencils() {
        let mut nb = neighbor(Binning::Bin, true, 1.0, 5.0);
        nb.request(NeighRequest::half());
        nb.request(NeighRequest::half().with_size());
        nb.request(NeighRequest::full());
        nb.init().unwrap();
        assert_eq!(nb.nbins.len(), 1);
        // half newton and full need different stencils
        assert_eq!(nb.nstencils.len(), 2);

        let mut nb = neighbor(Binning::Nsq, true, 1.0, 5.0);
        nb.request(NeighRequest::half());
        nb.init().unwrap();
        assert!(nb.nbins.is_empty() && nb.nstencils.is_empty());
    }

    #[test]
    fn test_decide_follows_every_delay_and_check() {
        let mut atoms = lattice(2, 2.0);
        let mut nb = neighbor(Binning::Bin, true, 1.0, 4.0);
        nb.settings.every = 2;
        nb.settings.delay = 4;
        nb.request(NeighRequest::half());
        nb.init().unwrap();
        assert!(nb.decide(&atoms));
        add_periodic_ghosts(&mut atoms, nb.simbox(), nb.cutghost()).unwrap();
        nb.build(0, &atoms).unwrap();

        atoms.x[0].x += 1.0;
        // steps 1..3 are inside the delay, 5 is not a multiple of every
        let decisions: Vec<bool> = (1..=6).map(|_| nb.decide(&atoms)).collect();
        assert_eq!(decisions, vec![false, false, false, true, false, true]);

        atoms.x[0].x -= 1.0;
        nb.build(6, &atoms).unwrap();
        assert_eq!(nb.last_build(), Some(6));
        assert_eq!(nb.ncalls(), 2);
        let decisions: Vec<bool> = (1..=6).map(|_| nb.decide(&atoms)).collect();
        assert!(decisions.iter().all(|&d| !d));

        nb.settings.check = false;
        nb.settings.delay = 0;
        nb.settings.every = 1;
        assert!(nb.decide(&atoms));
        nb.settings.once = true;
        assert!(!nb.decide(&atoms));
    }

    #[test]
    fn test_reset_box_rebins() {
        let mut atoms = lattice(3, 1.0);
        let mut nb = neighbor(Binning::Bin, true, 1.0, 3.0);
        let h = nb.request(NeighRequest::half());
        nb.init().unwrap();
        add_periodic_ghosts(&mut atoms, nb.simbox(), nb.cutghost()).unwrap();
        nb.build(0, &atoms).unwrap();
        assert_eq!(tag_pairs(nb.list(h).unwrap(), &atoms).len(), 27 * 3);

        let simbox = SimBox::cube(6.0, true).unwrap();
        let sub = SubDomain::whole(&simbox);
        nb.reset_box(simbox, sub);
        for x in &mut atoms.x[..27] {
            *x *= 2.0;
        }
        add_periodic_ghosts(&mut atoms, nb.simbox(), nb.cutghost()).unwrap();
        nb.build(1, &atoms).unwrap();
        assert_eq!(nb.list(h).unwrap().total_neighbors(), 0);
        assert!(nb.nstencils.iter().all(|s| s.last_stencil() == Some(1)));
    }
}
