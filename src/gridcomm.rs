//! Ghost-cell exchange for distributed grids.
//!
//! Each rank owns the grid points of `inbox` and stores them together with
//! ghost points out to `outbox`. `setup` works out once which flat indices
//! move between which ranks; `forward_comm` then fills ghosts from their
//! owners and `reverse_comm` sums ghost contributions back into owners.
//! What the values mean is left to a `GridKernel`.

use crate::comm::{CommError, Communicator, exchange_irregular};
use crate::decomp::{GridBox, ProcGrid};
use bytemuck::{Pod, Zeroable};
use std::ops::AddAssign;
use thiserror::Error;
use tracing::{debug, info, info_span, trace};

const TAG_PLANES: u32 = 100;
const TAG_SWAP: u32 = 110;
const TAG_FORWARD: u32 = 120;
const TAG_REVERSE: u32 = 121;

#[derive(Error, Debug, PartialEq)]
pub enum GridCommError {
    #[error(transparent)]
    Comm(#[from] CommError),
    #[error("Grid communication used before setup")]
    NotSetup,
    #[error("Invalid grid box: {0}")]
    InvalidBox(&'static str),
    #[error("Rank {rank} in the processor layout is outside a communicator of size {size}")]
    InvalidRank { rank: usize, size: usize },
    #[error("Rank {0} carries no RCB cut")]
    InvalidRcb(usize),
    #[error("Grid message from rank {peer} holds {got} values, expected {expected}")]
    SizeMismatch { peer: usize, expected: usize, got: usize },
    #[error("Grid overlap response from rank {peer} does not match any request")]
    ProtocolMismatch { peer: usize },
    #[error("Ghost exchange covers {got} grid points, the ghost region has {expected}")]
    GhostCoverage { expected: usize, got: usize },
}

/// Moves grid values in and out of communication buffers. Lists hold flat
/// indices into the caller's storage of the allocated box; buffers hold
/// `nper` values per listed point.
pub trait GridKernel {
    type Value: Pod;

    fn nper(&self) -> usize;
    fn pack_forward(&self, buf: &mut [Self::Value], list: &[usize]);
    fn unpack_forward(&mut self, buf: &[Self::Value], list: &[usize]);
    fn pack_reverse(&self, buf: &mut [Self::Value], list: &[usize]);
    fn unpack_reverse(&mut self, buf: &[Self::Value], list: &[usize]);
}

/// How ranks partition the global grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Layout {
    /// Cartesian processor grid; `procneigh[d]` is the lower and upper
    /// neighbor rank along dimension `d`.
    Regular { procneigh: [[usize; 2]; 3] },
    /// RCB tree; the dimension of the cut at which this rank starts an upper
    /// half, if any.
    Tiled { rcb_cut_dim: Option<usize> },
}

impl Layout {
    pub fn regular(grid: &ProcGrid, rank: usize) -> Self {
        Layout::Regular {
            procneigh: grid.procneigh(rank),
        }
    }
}

/// One step of the regular exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct Swap {
    pub sendproc: usize,
    pub recvproc: usize,
    pub packlist: Vec<usize>,
    pub unpacklist: Vec<usize>,
}

#[derive(Debug)]
struct RegularPlan {
    swaps: Vec<Swap>,
    /// Planes each neighbor needs from me, `[lo, hi]` per dimension.
    ghost: [[i32; 2]; 3],
}

#[derive(Debug)]
struct Exchange {
    proc: usize,
    list: Vec<usize>,
}

#[derive(Debug)]
struct CopyLists {
    packlist: Vec<usize>,
    unpacklist: Vec<usize>,
}

#[derive(Debug)]
struct TiledPlan {
    sends: Vec<Exchange>,
    recvs: Vec<Exchange>,
    copies: Vec<CopyLists>,
    adjacent: bool,
}

#[derive(Debug)]
enum Plan {
    Regular(RegularPlan),
    Tiled(TiledPlan),
}

#[derive(Clone, Copy, Debug)]
struct Overlap {
    proc: usize,
    bx: GridBox,
    pbc: [i32; 3],
}

#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct OverlapMsg {
    index: u32,
    bx: GridBox,
}

pub struct GridComm<'c, C: Communicator> {
    comm: &'c C,
    layout: Layout,
    global: [i32; 3],
    inbox: GridBox,
    outbox: GridBox,
    alloc: GridBox,
    plan: Option<Plan>,
}

impl<'c, C: Communicator> GridComm<'c, C> {
    pub fn new(
        comm: &'c C,
        global: [usize; 3],
        inbox: GridBox,
        outbox: GridBox,
        layout: Layout,
    ) -> Result<Self, GridCommError> {
        if global.contains(&0) {
            return Err(GridCommError::InvalidBox("global grid is empty"));
        }
        if inbox.is_empty() || !GridBox::global(global).contains_box(&inbox) {
            return Err(GridCommError::InvalidBox(
                "owned box must be non-empty and inside the global grid",
            ));
        }
        if !outbox.contains_box(&inbox) {
            return Err(GridCommError::InvalidBox("ghost box must contain the owned box"));
        }
        if let Layout::Regular { procneigh } = &layout
            && let Some(&rank) = procneigh.iter().flatten().find(|&&r| r >= comm.size())
        {
            return Err(GridCommError::InvalidRank {
                rank,
                size: comm.size(),
            });
        }
        if let Layout::Tiled { rcb_cut_dim: Some(d) } = layout
            && d > 2
        {
            return Err(GridCommError::InvalidRcb(comm.rank()));
        }
        Ok(Self {
            comm,
            layout,
            global: global.map(|n| n as i32),
            inbox,
            outbox,
            alloc: outbox,
            plan: None,
        })
    }

    /// Index lists address storage of `alloc` instead of the ghost box, for
    /// callers sharing one array between grids of different ghost depth.
    pub fn with_alloc_extent(mut self, alloc: GridBox) -> Result<Self, GridCommError> {
        if !alloc.contains_box(&self.outbox) {
            return Err(GridCommError::InvalidBox("allocated box must contain the ghost box"));
        }
        self.alloc = alloc;
        self.plan = None;
        Ok(self)
    }

    pub fn inbox(&self) -> &GridBox {
        &self.inbox
    }

    pub fn outbox(&self) -> &GridBox {
        &self.outbox
    }

    pub fn alloc(&self) -> &GridBox {
        &self.alloc
    }

    /// Builds the exchange plan. Collective. Returns the largest single
    /// buffer and the largest total of all buffers of one phase, in grid
    /// points.
    pub fn setup(&mut self) -> Result<(usize, usize), GridCommError> {
        let plan = match self.layout {
            Layout::Regular { procneigh } => Plan::Regular(self.setup_regular(procneigh)?),
            Layout::Tiled { rcb_cut_dim } => Plan::Tiled(self.setup_tiled(rcb_cut_dim)?),
        };
        let sizes = match &plan {
            Plan::Regular(p) => {
                let nbuf = p
                    .swaps
                    .iter()
                    .map(|s| s.packlist.len().max(s.unpacklist.len()))
                    .max()
                    .unwrap_or(0);
                (nbuf, nbuf)
            }
            Plan::Tiled(p) => {
                let nbuf1 = p
                    .copies
                    .iter()
                    .flat_map(|c| [c.packlist.len(), c.unpacklist.len()])
                    .chain(p.sends.iter().map(|s| s.list.len()))
                    .chain(p.recvs.iter().map(|r| r.list.len()))
                    .max()
                    .unwrap_or(0);
                let nbufs: usize = p.sends.iter().map(|s| s.list.len()).sum();
                let nbufr: usize = p.recvs.iter().map(|r| r.list.len()).sum();
                (nbuf1, nbufs.max(nbufr))
            }
        };
        self.plan = Some(plan);
        Ok(sizes)
    }

    /// Flat indices of `b` in the allocated box, z slowest.
    fn indices(&self, b: &GridBox) -> Result<Vec<usize>, GridCommError> {
        if b.is_empty() {
            return Ok(Vec::new());
        }
        if !self.alloc.contains_box(b) {
            return Err(GridCommError::InvalidBox(
                "exchanged region lies outside the allocated box",
            ));
        }
        let a = &self.alloc;
        let nx = a.extent(0);
        let ny = a.extent(1);
        let mut list = Vec::with_capacity(b.count());
        for iz in b.lo[2]..=b.hi[2] {
            for iy in b.lo[1]..=b.hi[1] {
                for ix in b.lo[0]..=b.hi[0] {
                    list.push(
                        (iz - a.lo[2]) as usize * ny * nx
                            + (iy - a.lo[1]) as usize * nx
                            + (ix - a.lo[0]) as usize,
                    );
                }
            }
        }
        Ok(list)
    }

    /// Planes `first..=last` of dimension `d`; earlier dimensions span the
    /// ghost box since their ghosts are already filled, later ones the
    /// owned box.
    fn slab(&self, d: usize, first: i32, last: i32) -> GridBox {
        let mut b = GridBox::default();
        for e in 0..3 {
            let src = if e < d { &self.outbox } else { &self.inbox };
            b.lo[e] = src.lo[e];
            b.hi[e] = src.hi[e];
        }
        b.lo[d] = first;
        b.hi[d] = last;
        b
    }

    fn setup_regular(&self, procneigh: [[usize; 2]; 3]) -> Result<RegularPlan, GridCommError> {
        let _span = info_span!("GridComm::setup_regular", rank = self.comm.rank()).entered();
        let (inb, outb) = (&self.inbox, &self.outbox);

        // planes my lower (upper) neighbor needs from me, learned from it
        let mut ghost = [[0i32; 2]; 3];
        for d in 0..3 {
            let [lo, hi] = procneigh[d];
            let tag = TAG_PLANES + 2 * d as u32;
            ghost[d][1] = self.sendrecv_count(inb.lo[d] - outb.lo[d], lo, hi, tag)?;
            ghost[d][0] = self.sendrecv_count(outb.hi[d] - inb.hi[d], hi, lo, tag + 1)?;
        }

        let mut swaps = Vec::new();
        for d in 0..3 {
            let [lo, hi] = procneigh[d];

            // toward lower neighbor: send my lowest planes, then relay what
            // arrives from above until it has all it asked for
            let mut nsent = 0;
            let mut sendfirst = inb.lo[d];
            let mut sendlast = inb.hi[d];
            let mut recvfirst = inb.hi[d] + 1;
            loop {
                let sendplanes = (sendlast - sendfirst + 1).min(ghost[d][0] - nsent).max(0);
                let packlist = self.indices(&self.slab(d, sendfirst, sendfirst + sendplanes - 1))?;
                let recvplanes = self.sendrecv_count(sendplanes, lo, hi, TAG_SWAP + d as u32)?;
                let unpacklist =
                    self.indices(&self.slab(d, recvfirst, recvfirst + recvplanes - 1))?;
                swaps.push(Swap {
                    sendproc: lo,
                    recvproc: hi,
                    packlist,
                    unpacklist,
                });
                nsent += sendplanes;
                sendfirst += sendplanes;
                sendlast += recvplanes;
                recvfirst += recvplanes;
                if !self.any_rank(nsent < ghost[d][0])? {
                    break;
                }
                if !self.any_rank(sendplanes > 0)? {
                    return Err(GridCommError::InvalidBox(
                        "ghost region deeper than the global grid allows",
                    ));
                }
            }

            // toward upper neighbor, mirrored
            let mut nsent = 0;
            let mut sendfirst = inb.lo[d];
            let mut sendlast = inb.hi[d];
            let mut recvlast = inb.lo[d] - 1;
            loop {
                let sendplanes = (sendlast - sendfirst + 1).min(ghost[d][1] - nsent).max(0);
                let packlist = self.indices(&self.slab(d, sendlast - sendplanes + 1, sendlast))?;
                let recvplanes = self.sendrecv_count(sendplanes, hi, lo, TAG_SWAP + d as u32)?;
                let unpacklist = self.indices(&self.slab(d, recvlast - recvplanes + 1, recvlast))?;
                swaps.push(Swap {
                    sendproc: hi,
                    recvproc: lo,
                    packlist,
                    unpacklist,
                });
                nsent += sendplanes;
                sendfirst -= recvplanes;
                sendlast -= sendplanes;
                recvlast -= recvplanes;
                if !self.any_rank(nsent < ghost[d][1])? {
                    break;
                }
                if !self.any_rank(sendplanes > 0)? {
                    return Err(GridCommError::InvalidBox(
                        "ghost region deeper than the global grid allows",
                    ));
                }
            }
        }
        info!(n_swaps = swaps.len(), ghost = ?ghost, "regular grid exchange");
        Ok(RegularPlan { swaps, ghost })
    }

    fn sendrecv_count(
        &self,
        count: i32,
        dest: usize,
        source: usize,
        tag: u32,
    ) -> Result<i32, GridCommError> {
        let got = self.comm.sendrecv(&[count], dest, source, tag)?;
        got.first().copied().ok_or(GridCommError::SizeMismatch {
            peer: source,
            expected: 1,
            got: 0,
        })
    }

    fn any_rank(&self, flag: bool) -> Result<bool, GridCommError> {
        Ok(self.comm.allreduce(u32::from(flag), |a, b| a + b)? > 0)
    }

    fn setup_tiled(&self, rcb_cut_dim: Option<usize>) -> Result<TiledPlan, GridCommError> {
        let me = self.comm.rank();
        let _span = info_span!("GridComm::setup_tiled", rank = me).entered();

        let mine = match rcb_cut_dim {
            Some(d) => [d as i32, self.inbox.lo[d]],
            None => [-1, self.inbox.lo[0]],
        };
        let rcbinfo: Vec<[i32; 2]> = self
            .comm
            .allgather(std::slice::from_ref(&mine))?
            .into_iter()
            .enumerate()
            .map(|(p, v)| v.first().copied().ok_or(GridCommError::InvalidRcb(p)))
            .collect::<Result<_, _>>()?;

        let mut overlaps = Vec::new();
        self.ghost_box_drop(self.outbox, [0; 3], &rcbinfo, &mut overlaps)?;

        let requests: Vec<(usize, OverlapMsg)> = overlaps
            .iter()
            .enumerate()
            .filter(|(_, o)| o.proc != me)
            .map(|(m, o)| (o.proc, OverlapMsg { index: m as u32, bx: o.bx }))
            .collect();
        let received = exchange_irregular(self.comm, &requests)?;

        // answer each request with the part of it I own
        let mut sends = Vec::with_capacity(received.len());
        let mut responses = Vec::with_capacity(received.len());
        for (source, req) in received {
            let owned = GridBox {
                lo: std::array::from_fn(|d| req.bx.lo[d].max(self.inbox.lo[d])),
                hi: std::array::from_fn(|d| req.bx.hi[d].min(self.inbox.hi[d])),
            };
            sends.push(Exchange {
                proc: source,
                list: self.indices(&owned)?,
            });
            responses.push((source, OverlapMsg { index: req.index, bx: owned }));
        }
        let answered = exchange_irregular(self.comm, &responses)?;

        let mut recvs = Vec::with_capacity(answered.len());
        let mut adjacent = true;
        for (source, resp) in answered {
            let o = overlaps
                .get(resp.index as usize)
                .filter(|o| o.proc == source)
                .ok_or(GridCommError::ProtocolMismatch { peer: source })?;
            let b = self.unwrap_image(&resp.bx, o.pbc);
            recvs.push(Exchange {
                proc: source,
                list: self.indices(&b)?,
            });
            let inb = &self.inbox;
            if !b.is_empty()
                && (0..3).all(|d| b.lo[d] != inb.hi[d] + 1 && b.hi[d] != inb.lo[d] - 1)
            {
                adjacent = false;
            }
        }

        let mut copies = Vec::new();
        for o in overlaps.iter().filter(|o| o.proc == me) {
            let Some(owned) = o.bx.intersect(&self.inbox) else {
                continue;
            };
            copies.push(CopyLists {
                packlist: self.indices(&owned)?,
                unpacklist: self.indices(&self.unwrap_image(&owned, o.pbc))?,
            });
        }

        let expected = self.outbox.count() - self.inbox.count();
        let got = recvs.iter().map(|r| r.list.len()).sum::<usize>()
            + copies.iter().map(|c| c.unpacklist.len()).sum::<usize>();
        if got != expected {
            return Err(GridCommError::GhostCoverage { expected, got });
        }
        info!(
            n_overlap = overlaps.len(),
            n_send = sends.len(),
            n_recv = recvs.len(),
            n_copy = copies.len(),
            adjacent,
            "tiled grid exchange"
        );
        Ok(TiledPlan {
            sends,
            recvs,
            copies,
            adjacent,
        })
    }

    fn unwrap_image(&self, b: &GridBox, pbc: [i32; 3]) -> GridBox {
        b.shift(std::array::from_fn(|d| pbc[d] * self.global[d]))
    }

    /// Splits `b` at periodic boundaries and records every rank each
    /// piece overlaps, except my own owned region.
    fn ghost_box_drop(
        &self,
        b: GridBox,
        pbc: [i32; 3],
        rcbinfo: &[[i32; 2]],
        out: &mut Vec<Overlap>,
    ) -> Result<(), GridCommError> {
        let n = self.global;
        for d in 0..3 {
            if b.lo[d] < 0 {
                let mut inside = b;
                inside.lo[d] = 0;
                let mut wrapped = b;
                wrapped.lo[d] = b.lo[d] + n[d];
                wrapped.hi[d] = n[d] - 1;
                let mut wpbc = pbc;
                wpbc[d] -= 1;
                self.ghost_box_drop(inside, pbc, rcbinfo, out)?;
                return self.ghost_box_drop(wrapped, wpbc, rcbinfo, out);
            }
            if b.hi[d] >= n[d] {
                let mut inside = b;
                inside.hi[d] = n[d] - 1;
                let mut wrapped = b;
                wrapped.lo[d] = 0;
                wrapped.hi[d] = b.hi[d] - n[d];
                let mut wpbc = pbc;
                wpbc[d] += 1;
                self.ghost_box_drop(inside, pbc, rcbinfo, out)?;
                return self.ghost_box_drop(wrapped, wpbc, rcbinfo, out);
            }
        }

        let mut procs = Vec::new();
        box_drop_grid(&b, 0, rcbinfo.len() - 1, rcbinfo, &mut procs)?;
        let me = self.comm.rank();
        for proc in procs {
            if proc == me && pbc == [0; 3] {
                continue;
            }
            trace!(proc, bx = ?b, pbc = ?pbc, "ghost overlap");
            out.push(Overlap { proc, bx: b, pbc });
        }
        Ok(())
    }

    /// True on every rank if all ranks get their ghosts from ranks that
    /// touch their owned box. Collective.
    pub fn ghost_adjacent(&self) -> Result<bool, GridCommError> {
        let mine = match self.plan.as_ref().ok_or(GridCommError::NotSetup)? {
            Plan::Regular(p) => (0..3).all(|d| {
                let width = self.inbox.extent(d) as i32;
                p.ghost[d][0] <= width && p.ghost[d][1] <= width
            }),
            Plan::Tiled(p) => p.adjacent,
        };
        Ok(self.comm.allreduce(u32::from(mine), u32::min)? == 1)
    }

    /// Swaps of the regular exchange in replay order; empty for tiled.
    pub fn swaps(&self) -> &[Swap] {
        match &self.plan {
            Some(Plan::Regular(p)) => &p.swaps,
            _ => &[],
        }
    }

    /// Planes each neighbor needs from this rank, `[lo, hi]` per
    /// dimension, once a regular plan exists.
    pub fn ghost_planes(&self) -> Option<[[i32; 2]; 3]> {
        match &self.plan {
            Some(Plan::Regular(p)) => Some(p.ghost),
            _ => None,
        }
    }

    /// Copies owned values into every ghost copy of them. Collective.
    pub fn forward_comm<K: GridKernel>(&self, kernel: &mut K) -> Result<(), GridCommError> {
        let me = self.comm.rank();
        let nper = kernel.nper();
        match self.plan.as_ref().ok_or(GridCommError::NotSetup)? {
            Plan::Regular(p) => {
                for swap in &p.swaps {
                    let buf = pack(kernel, &swap.packlist, nper, K::pack_forward);
                    let recv = if swap.sendproc == me {
                        buf
                    } else {
                        self.comm.send(swap.sendproc, TAG_FORWARD, &buf)?;
                        self.comm.recv(swap.recvproc, TAG_FORWARD)?
                    };
                    check_len(&recv, swap.unpacklist.len() * nper, swap.recvproc)?;
                    kernel.unpack_forward(&recv, &swap.unpacklist);
                }
            }
            Plan::Tiled(p) => {
                for s in &p.sends {
                    let buf = pack(kernel, &s.list, nper, K::pack_forward);
                    self.comm.send(s.proc, TAG_FORWARD, &buf)?;
                }
                for c in &p.copies {
                    let buf = pack(kernel, &c.packlist, nper, K::pack_forward);
                    kernel.unpack_forward(&buf, &c.unpacklist);
                }
                for r in &p.recvs {
                    let buf: Vec<K::Value> = self.comm.recv(r.proc, TAG_FORWARD)?;
                    check_len(&buf, r.list.len() * nper, r.proc)?;
                    kernel.unpack_forward(&buf, &r.list);
                }
            }
        }
        debug!(rank = me, "grid forward comm");
        Ok(())
    }

    /// Returns ghost contributions to their owners, replaying the forward
    /// exchange backwards. Collective.
    pub fn reverse_comm<K: GridKernel>(&self, kernel: &mut K) -> Result<(), GridCommError> {
        let me = self.comm.rank();
        let nper = kernel.nper();
        match self.plan.as_ref().ok_or(GridCommError::NotSetup)? {
            Plan::Regular(p) => {
                for swap in p.swaps.iter().rev() {
                    let buf = pack(kernel, &swap.unpacklist, nper, K::pack_reverse);
                    let recv = if swap.recvproc == me {
                        buf
                    } else {
                        self.comm.send(swap.recvproc, TAG_REVERSE, &buf)?;
                        self.comm.recv(swap.sendproc, TAG_REVERSE)?
                    };
                    check_len(&recv, swap.packlist.len() * nper, swap.sendproc)?;
                    kernel.unpack_reverse(&recv, &swap.packlist);
                }
            }
            Plan::Tiled(p) => {
                for r in &p.recvs {
                    let buf = pack(kernel, &r.list, nper, K::pack_reverse);
                    self.comm.send(r.proc, TAG_REVERSE, &buf)?;
                }
                for c in &p.copies {
                    let buf = pack(kernel, &c.unpacklist, nper, K::pack_reverse);
                    kernel.unpack_reverse(&buf, &c.packlist);
                }
                for s in &p.sends {
                    let buf: Vec<K::Value> = self.comm.recv(s.proc, TAG_REVERSE)?;
                    check_len(&buf, s.list.len() * nper, s.proc)?;
                    kernel.unpack_reverse(&buf, &s.list);
                }
            }
        }
        debug!(rank = me, "grid reverse comm");
        Ok(())
    }
}

fn pack<K: GridKernel>(
    kernel: &K,
    list: &[usize],
    nper: usize,
    f: fn(&K, &mut [K::Value], &[usize]),
) -> Vec<K::Value> {
    let mut buf = vec![K::Value::zeroed(); list.len() * nper];
    f(kernel, &mut buf, list);
    buf
}

fn check_len<T>(buf: &[T], expected: usize, peer: usize) -> Result<(), GridCommError> {
    if buf.len() != expected {
        return Err(GridCommError::SizeMismatch {
            peer,
            expected,
            got: buf.len(),
        });
    }
    Ok(())
}

/// Ranks whose owned box `b` overlaps, found by descending the RCB tree.
/// A box only touching a cut does not cross it.
fn box_drop_grid(
    b: &GridBox,
    lower: usize,
    upper: usize,
    rcbinfo: &[[i32; 2]],
    out: &mut Vec<usize>,
) -> Result<(), GridCommError> {
    if lower == upper {
        out.push(lower);
        return Ok(());
    }
    let mid = lower + (upper - lower) / 2 + 1;
    let [dim, cut] = rcbinfo[mid];
    if !(0..3).contains(&dim) {
        return Err(GridCommError::InvalidRcb(mid));
    }
    let d = dim as usize;
    if b.lo[d] < cut {
        box_drop_grid(b, lower, mid - 1, rcbinfo, out)?;
    }
    if b.hi[d] >= cut {
        box_drop_grid(b, mid, upper, rcbinfo, out)?;
    }
    Ok(())
}

/// Dense grid storage over an allocated box, `nper` values per point.
/// Forward exchange copies values; reverse exchange adds them.
#[derive(Clone, Debug, PartialEq)]
pub struct GridBuffer<T> {
    alloc: GridBox,
    nper: usize,
    data: Vec<T>,
}

impl<T: Pod + AddAssign> GridBuffer<T> {
    pub fn new(alloc: GridBox, nper: usize) -> Self {
        Self {
            alloc,
            nper,
            data: vec![T::zeroed(); alloc.count() * nper],
        }
    }

    pub fn alloc(&self) -> &GridBox {
        &self.alloc
    }

    /// Flat point index of `p`, matching the exchange index lists.
    pub fn index(&self, p: [i32; 3]) -> Option<usize> {
        if !self.alloc.contains(p) {
            return None;
        }
        let a = &self.alloc;
        let (nx, ny) = (a.extent(0), a.extent(1));
        Some(
            (p[2] - a.lo[2]) as usize * ny * nx
                + (p[1] - a.lo[1]) as usize * nx
                + (p[0] - a.lo[0]) as usize,
        )
    }

    pub fn get(&self, p: [i32; 3]) -> Option<&[T]> {
        let i = self.index(p)?;
        Some(&self.data[i * self.nper..(i + 1) * self.nper])
    }

    pub fn get_mut(&mut self, p: [i32; 3]) -> Option<&mut [T]> {
        let i = self.index(p)?;
        let nper = self.nper;
        Some(&mut self.data[i * nper..(i + 1) * nper])
    }

    /// Sets every value of every point of `b` from `f(point)`.
    pub fn fill(&mut self, b: &GridBox, f: impl Fn([i32; 3]) -> T) {
        for iz in b.lo[2]..=b.hi[2] {
            for iy in b.lo[1]..=b.hi[1] {
                for ix in b.lo[0]..=b.hi[0] {
                    let p = [ix, iy, iz];
                    let v = f(p);
                    if let Some(vals) = self.get_mut(p) {
                        vals.fill(v);
                    }
                }
            }
        }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    fn copy_out(&self, buf: &mut [T], list: &[usize]) {
        let n = self.nper;
        for (chunk, &i) in buf.chunks_exact_mut(n).zip(list) {
            chunk.copy_from_slice(&self.data[i * n..(i + 1) * n]);
        }
    }
}

impl<T: Pod + AddAssign> GridKernel for GridBuffer<T> {
    type Value = T;

    fn nper(&self) -> usize {
        self.nper
    }

    fn pack_forward(&self, buf: &mut [T], list: &[usize]) {
        self.copy_out(buf, list);
    }

    fn unpack_forward(&mut self, buf: &[T], list: &[usize]) {
        let n = self.nper;
        for (chunk, &i) in buf.chunks_exact(n).zip(list) {
            self.data[i * n..(i + 1) * n].copy_from_slice(chunk);
        }
    }

    fn pack_reverse(&self, buf: &mut [T], list: &[usize]) {
        self.copy_out(buf, list);
    }

    fn unpack_reverse(&mut self, buf: &[T], list: &[usize]) {
        let n = self.nper;
        for (chunk, &i) in buf.chunks_exact(n).zip(list) {
            for (dst, &src) in self.data[i * n..(i + 1) * n].iter_mut().zip(chunk) {
                *dst += src;
            }
        }
    }
}
