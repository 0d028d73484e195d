//! Pair exclusion and special-bond tagging of neighbor entries.
//!
//! A neighbor entry is a `u32`. The low 30 bits hold the atom index, the top
//! two bits hold either the special-bond class (1-2, 1-3, 1-4) or, for size
//! lists with history, the "touching" marker.

use crate::atom::Atoms;
use crate::table::TypeTable;

pub const SBBITS: u32 = 30;
pub const NEIGHMASK: u32 = 0x3FFF_FFFF;
pub const HISTORY_MASK: u32 = 3 << SBBITS;

/// Largest atom index that fits below the tag bits.
pub const MAX_NEIGH_INDEX: usize = NEIGHMASK as usize;

#[inline(always)]
pub fn sbmask(j: u32) -> u32 {
    (j >> SBBITS) & 3
}

#[inline(always)]
pub fn neigh_index(j: u32) -> usize {
    (j & NEIGHMASK) as usize
}

/// Bonded partners of each owned atom, by tag: 1-2, 1-3 and 1-4 neighbors.
#[derive(Clone, Debug, Default)]
pub struct SpecialBonds {
    partners: Vec<[Vec<i64>; 3]>,
}

impl SpecialBonds {
    pub fn new(n: usize) -> Self {
        Self {
            partners: vec![Default::default(); n],
        }
    }

    pub fn len(&self) -> usize {
        self.partners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partners.is_empty()
    }

    /// Records `tag` as a partner of atom `i` in class `which` (1, 2 or 3).
    pub fn add(&mut self, i: usize, which: usize, tag: i64) {
        if i >= self.partners.len() {
            self.partners.resize(i + 1, Default::default());
        }
        self.partners[i][which - 1].push(tag);
    }

    /// Records a bond between atoms `i` and `j` (both local) in both directions.
    pub fn add_pair(&mut self, atoms: &Atoms, i: usize, j: usize, which: usize) {
        self.add(i, which, atoms.tag[j]);
        self.add(j, which, atoms.tag[i]);
    }

    /// Class (1..=3) under which `tag` is a partner of `i`; the closest class wins.
    pub fn class_of(&self, i: usize, tag: i64) -> Option<u32> {
        let p = self.partners.get(i)?;
        p.iter()
            .position(|list| list.contains(&tag))
            .map(|k| k as u32 + 1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpecialFlag {
    /// Pair is dropped from the list.
    Exclude,
    /// Pair is stored as if unbonded.
    Include,
    /// Pair is stored with its class in the top bits.
    Flag,
}

impl SpecialFlag {
    /// Policy from the LJ and Coulomb weights of one bond class.
    pub fn from_weights(lj: f64, coul: f64) -> Self {
        if lj == 0.0 && coul == 0.0 {
            SpecialFlag::Exclude
        } else if lj == 1.0 && coul == 1.0 {
            SpecialFlag::Include
        } else {
            SpecialFlag::Flag
        }
    }
}

/// Policy for the 1-2, 1-3 and 1-4 classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpecialFlags(pub [SpecialFlag; 3]);

impl Default for SpecialFlags {
    fn default() -> Self {
        SpecialFlags([SpecialFlag::Exclude; 3])
    }
}

impl SpecialFlags {
    pub fn from_weights(lj: [f64; 3], coul: [f64; 3]) -> Self {
        SpecialFlags(std::array::from_fn(|k| SpecialFlag::from_weights(lj[k], coul[k])))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpecialOutcome {
    None,
    Exclude,
    Flag(u32),
}

pub fn find_special(
    special: &SpecialBonds,
    flags: &SpecialFlags,
    i: usize,
    tag_j: i64,
) -> SpecialOutcome {
    match special.class_of(i, tag_j) {
        None => SpecialOutcome::None,
        Some(which) => match flags.0[(which - 1) as usize] {
            SpecialFlag::Exclude => SpecialOutcome::Exclude,
            SpecialFlag::Include => SpecialOutcome::None,
            SpecialFlag::Flag => SpecialOutcome::Flag(which),
        },
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoleculeMode {
    /// Exclude pairs in the same molecule.
    Intra,
    /// Exclude pairs in different molecules.
    Inter,
}

/// User exclusions: by type pair, by group pair and by molecule membership.
#[derive(Clone, Debug, Default)]
pub struct Exclusions {
    types: Vec<(usize, usize)>,
    groups: Vec<(u32, u32)>,
    molecules: Vec<(u32, MoleculeMode)>,
    type_table: Option<TypeTable<bool>>,
}

impl Exclusions {
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.groups.is_empty() && self.molecules.is_empty()
    }

    pub fn exclude_types(&mut self, itype: usize, jtype: usize) {
        self.types.push((itype, jtype));
        self.type_table = None;
    }

    /// Excludes pairs with one atom in each group (group bits of `Atoms::mask`).
    pub fn exclude_groups(&mut self, group1: u32, group2: u32) {
        self.groups.push((group1, group2));
    }

    pub fn exclude_molecule(&mut self, group: u32, mode: MoleculeMode) {
        self.molecules.push((group, mode));
    }

    /// Builds the symmetric type table; call once ntypes is known.
    pub fn init(&mut self, ntypes: usize) {
        let mut t = TypeTable::new(ntypes, false);
        for &(i, j) in &self.types {
            if i >= 1 && j >= 1 && i <= ntypes && j <= ntypes {
                t.set_sym(i, j, true);
            }
        }
        self.type_table = Some(t);
    }

    pub fn excluded(&self, atoms: &Atoms, i: usize, j: usize) -> bool {
        let (itype, jtype) = (atoms.type_[i], atoms.type_[j]);
        let by_type = match &self.type_table {
            Some(t) => *t.get(itype, jtype),
            None => self
                .types
                .iter()
                .any(|&(a, b)| (a == itype && b == jtype) || (a == jtype && b == itype)),
        };
        if by_type {
            return true;
        }
        let (mi, mj) = (atoms.mask[i], atoms.mask[j]);
        if self
            .groups
            .iter()
            .any(|&(g1, g2)| (mi & g1 != 0 && mj & g2 != 0) || (mi & g2 != 0 && mj & g1 != 0))
        {
            return true;
        }
        self.molecules.iter().any(|&(g, mode)| {
            mi & g != 0
                && mj & g != 0
                && match mode {
                    MoleculeMode::Intra => atoms.molecule[i] == atoms.molecule[j],
                    MoleculeMode::Inter => atoms.molecule[i] != atoms.molecule[j],
                }
        })
    }
}
