use crate::exclusion::{NEIGHMASK, neigh_index, sbmask};
use crate::page::{MyPage, PageError, Slot};

/// One neighbor list: for each atom in `ilist`, a slice of tagged neighbor
/// entries living in the list's page arena.
///
/// `ilist[..inum]` are owned atoms; for ghost lists `ilist[inum..inum+gnum]`
/// are the ghost atoms that also received lists.
#[derive(Debug)]
pub struct NeighList {
    pub inum: usize,
    pub gnum: usize,
    pub ilist: Vec<usize>,
    pub numneigh: Vec<usize>,
    firstneigh: Vec<Slot>,
    ipage: MyPage<u32>,
}

impl NeighList {
    pub fn new(one_atom: usize, page: usize) -> Result<Self, PageError> {
        Ok(Self {
            inum: 0,
            gnum: 0,
            ilist: Vec::new(),
            numneigh: Vec::new(),
            firstneigh: Vec::new(),
            ipage: MyPage::new(one_atom, page)?,
        })
    }

    /// Clears the list and sizes the per-atom arrays for `nmax` atoms.
    pub(crate) fn begin(&mut self, nmax: usize) {
        self.inum = 0;
        self.gnum = 0;
        self.ilist.clear();
        self.ipage.reset();
        self.numneigh.clear();
        self.numneigh.resize(nmax, 0);
        self.firstneigh.clear();
        self.firstneigh.resize(nmax, Slot::default());
    }

    pub(crate) fn page_mut(&mut self) -> &mut MyPage<u32> {
        &mut self.ipage
    }

    pub(crate) fn store(&mut self, i: usize, slot: Slot) {
        self.ilist.push(i);
        self.numneigh[i] = slot.len();
        self.firstneigh[i] = slot;
    }

    /// Raw tagged entries of atom `i`.
    pub fn neighbors(&self, i: usize) -> &[u32] {
        match self.firstneigh.get(i) {
            Some(&slot) => self.ipage.get(slot),
            None => &[],
        }
    }

    /// `(i, entries)` for every atom in `ilist`, owned first.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[u32])> {
        self.ilist.iter().map(move |&i| (i, self.neighbors(i)))
    }

    /// Decoded `(i, j, special)` triples.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize, u32)> + '_ {
        self.iter()
            .flat_map(|(i, js)| js.iter().map(move |&j| (i, neigh_index(j), sbmask(j))))
    }

    pub fn total_neighbors(&self) -> usize {
        self.ipage.ndatum()
    }

    pub fn memory_usage(&self) -> usize {
        self.ilist.capacity() * std::mem::size_of::<usize>()
            + self.numneigh.capacity() * std::mem::size_of::<usize>()
            + self.firstneigh.capacity() * std::mem::size_of::<Slot>()
            + self.ipage.size()
    }

    pub fn one_atom(&self) -> usize {
        self.ipage.maxchunk()
    }
}

/// Strips tag bits from a neighbor entry.
#[inline(always)]
pub fn untag(j: u32) -> u32 {
    j & NEIGHMASK
}
