//! Bin stencils: the relative bins searched from a home bin.
//!
//! Half stencils keep the offsets "above" the home bin, ordered by z, then y,
//! then x. `is_upper` applies the same order to coordinates and decides which
//! side of a same-bin owned/ghost pair stores it. Both must agree or pairs
//! are dropped or doubled.

use crate::nbin::{BinGeometry, NBin, NBinStyle};
use crate::table::TypeTable;
use nalgebra::Vector3;
use thiserror::Error;
use tracing::{debug, info_span};

#[derive(Error, Debug, PartialEq)]
pub enum StencilError {
    #[error("Stencil cutoff {cutoff} exceeds the ghost cutoff {cutghost} the bins were sized for")]
    CutoffExceedsBins { cutoff: f64, cutghost: f64 },
    #[error("Stencil style requires {0:?} bins")]
    BinStyleMismatch(NBinStyle),
    #[error("Stencil created before bins were set up")]
    BinsNotSetup,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilStyle {
    /// Half stencil for half lists with Newton on; otherwise a full stencil.
    pub half: bool,
    pub bytype: bool,
}

impl StencilStyle {
    pub fn bin_style(&self) -> NBinStyle {
        if self.bytype {
            NBinStyle::Bytype
        } else {
            NBinStyle::Standard
        }
    }
}

/// Minimum squared distance between a point in the home bin and any point of
/// the bin at offset `(i, j, k)`.
pub fn bin_distance(i: i32, j: i32, k: i32, g: &BinGeometry) -> f64 {
    let axis = |n: i32, size: f64| -> f64 {
        match n {
            n if n > 0 => (n - 1) as f64 * size,
            0 => 0.0,
            n => (n + 1) as f64 * size,
        }
    };
    let dx = axis(i, g.binsize[0]);
    let dy = axis(j, g.binsize[1]);
    let dz = axis(k, g.binsize[2]);
    dx * dx + dy * dy + dz * dz
}

/// True for the offsets a half stencil keeps: strictly above the home bin in
/// z, then y, then x order.
#[inline]
pub fn in_half_stencil(i: i32, j: i32, k: i32) -> bool {
    k > 0 || (k == 0 && (j > 0 || (j == 0 && i > 0)))
}

/// True if `xj` is at or above `xi` in z, then y, then x order.
#[inline]
pub fn is_upper(xi: &Vector3<f64>, xj: &Vector3<f64>) -> bool {
    if xj.z != xi.z {
        return xj.z > xi.z;
    }
    if xj.y != xi.y {
        return xj.y > xi.y;
    }
    xj.x >= xi.x
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stencil {
    offsets: Vec<isize>,
    xyz: Vec<[i32; 3]>,
    extent: [i32; 3],
}

impl Stencil {
    /// Stencil covering `cut` in grid `g`.
    pub fn build(g: &BinGeometry, cut: f64, half: bool) -> Self {
        let cutsq = cut * cut;
        let mut extent = [0i32; 3];
        for (d, e) in extent.iter_mut().enumerate() {
            if d == 2 && g.dimension == 2 {
                break;
            }
            let mut s = (cut * g.bininv[d]) as i32;
            if (s as f64) * g.binsize[d] < cut {
                s += 1;
            }
            *e = s;
        }
        let [sx, sy, sz] = extent;
        let kmin = if half { 0 } else { -sz };

        let mut st = Stencil {
            offsets: Vec::new(),
            xyz: Vec::new(),
            extent,
        };
        for k in kmin..=sz {
            for j in -sy..=sy {
                for i in -sx..=sx {
                    if half && !in_half_stencil(i, j, k) {
                        continue;
                    }
                    if bin_distance(i, j, k, g) < cutsq {
                        st.offsets.push(g.offset(i, j, k));
                        st.xyz.push([i, j, k]);
                    }
                }
            }
        }
        st
    }

    pub fn offsets(&self) -> &[isize] {
        &self.offsets
    }

    pub fn xyz(&self) -> &[[i32; 3]] {
        &self.xyz
    }

    pub fn extent(&self) -> [i32; 3] {
        self.extent
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Per type-pair stencil policy of the bytype variant. `half`, `skip` and
/// `bin_type` are not symmetric.
#[derive(Clone, Debug, PartialEq)]
pub struct StencilProperties {
    pub half: TypeTable<bool>,
    pub skip: TypeTable<bool>,
    pub bin_type: TypeTable<usize>,
    pub cut: TypeTable<f64>,
}

impl StencilProperties {
    /// `cuttype` is indexed by `type - 1`.
    pub fn new(half_newton: bool, cutneighsq: &TypeTable<f64>, cuttype: &[f64]) -> Self {
        let n = cutneighsq.ntypes();
        let cut = cutneighsq.map(|c| c.sqrt());
        if !half_newton {
            return Self {
                half: TypeTable::new(n, false),
                skip: TypeTable::new(n, false),
                bin_type: TypeTable::from_fn(n, |_, j| j),
                cut,
            };
        }

        // smaller -> larger searches the larger type's grid with a full
        // stencil; larger -> smaller is skipped; equal sizes use half stencils
        let mut half = TypeTable::new(n, false);
        let mut skip = TypeTable::new(n, false);
        let mut bin_type = TypeTable::new(n, 0usize);
        for i in 1..=n {
            for j in 1..=n {
                let (ci, cj) = (cuttype[i - 1], cuttype[j - 1]);
                if i == j {
                    half.set(i, j, true);
                    bin_type.set(i, j, i);
                } else if ci > cj {
                    skip.set(i, j, true);
                } else if ci == cj {
                    half.set(i, j, true);
                    bin_type.set(i, j, i);
                } else {
                    bin_type.set(i, j, j);
                }
            }
        }
        Self {
            half,
            skip,
            bin_type,
            cut,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StencilContext<'a> {
    pub cutneighmax: f64,
    pub cutghost: f64,
    pub cutneighsq: &'a TypeTable<f64>,
    /// Indexed by `type - 1`.
    pub cuttype: &'a [f64],
}

#[derive(Debug)]
enum Stencils {
    Single(Stencil),
    PerPair {
        props: StencilProperties,
        table: TypeTable<Option<Stencil>>,
    },
}

/// Cached stencils of one style; stale after bins are set up again.
#[derive(Debug)]
pub struct NStencil {
    style: StencilStyle,
    stencils: Option<Stencils>,
    last_stencil: Option<u64>,
    stale: bool,
}

impl NStencil {
    pub fn new(style: StencilStyle) -> Self {
        Self {
            style,
            stencils: None,
            last_stencil: None,
            stale: true,
        }
    }

    pub fn style(&self) -> StencilStyle {
        self.style
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Step at which the stencils were last created.
    pub fn last_stencil(&self) -> Option<u64> {
        self.last_stencil
    }

    pub fn create(
        &mut self,
        nbin: &NBin,
        ctx: &StencilContext,
        step: u64,
    ) -> Result<(), StencilError> {
        if !nbin.is_setup() {
            return Err(StencilError::BinsNotSetup);
        }
        if nbin.style() != self.style.bin_style() {
            return Err(StencilError::BinStyleMismatch(self.style.bin_style()));
        }
        let _span =
            info_span!("NStencil::create", half = self.style.half, bytype = self.style.bytype)
                .entered();
        let check = |cut: f64| -> Result<(), StencilError> {
            if cut > ctx.cutghost * (1.0 + 1e-12) {
                return Err(StencilError::CutoffExceedsBins {
                    cutoff: cut,
                    cutghost: ctx.cutghost,
                });
            }
            Ok(())
        };

        let stencils = if self.style.bytype {
            let props = StencilProperties::new(self.style.half, ctx.cutneighsq, ctx.cuttype);
            let n = ctx.cutneighsq.ntypes();
            let mut table = TypeTable::new(n, None);
            for i in 1..=n {
                for j in 1..=n {
                    if *props.skip.get(i, j) {
                        continue;
                    }
                    let cut = *props.cut.get(i, j);
                    check(cut)?;
                    let g = nbin.grid(*props.bin_type.get(i, j));
                    let st = Stencil::build(g, cut, *props.half.get(i, j));
                    debug!(itype = i, jtype = j, n_stencil = st.len(), "stencil");
                    table.set(i, j, Some(st));
                }
            }
            Stencils::PerPair { props, table }
        } else {
            check(ctx.cutneighmax)?;
            let st = Stencil::build(nbin.grid(1), ctx.cutneighmax, self.style.half);
            debug!(n_stencil = st.len(), extent = ?st.extent(), "stencil");
            Stencils::Single(st)
        };
        self.stencils = Some(stencils);
        self.last_stencil = Some(step);
        self.stale = false;
        Ok(())
    }

    /// Stencil used by atoms of `itype` searching for atoms of `jtype`;
    /// `None` when that search is skipped or nothing was created yet.
    pub fn get(&self, itype: usize, jtype: usize) -> Option<&Stencil> {
        match self.stencils.as_ref()? {
            Stencils::Single(st) => Some(st),
            Stencils::PerPair { table, .. } => table.get(itype, jtype).as_ref(),
        }
    }

    pub fn properties(&self) -> Option<&StencilProperties> {
        match self.stencils.as_ref()? {
            Stencils::Single(_) => None,
            Stencils::PerPair { props, .. } => Some(props),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SimBox, SubDomain};
    use crate::nbin::BinContext;
    use std::collections::HashSet;

    fn grid(len: f64, binsize: f64, cutghost: f64) -> BinGeometry {
        let b = SimBox::cube(len, true).unwrap();
        let sub = SubDomain::whole(&b);
        let ctx = BinContext {
            simbox: &b,
            sub: &sub,
            cutghost,
            cutneighmax: cutghost,
            cuttype: &[cutghost],
            binsize_user: None,
        };
        BinGeometry::setup(&ctx, binsize).unwrap()
    }

    #[test]
    fn test_bin_distance_uses_near_corners() {
        let g = grid(10.0, 1.0, 2.0);
        assert_eq!(bin_distance(0, 0, 0, &g), 0.0);
        assert_eq!(bin_distance(1, -1, 1, &g), 0.0);
        assert_eq!(bin_distance(2, 0, 0, &g), 1.0);
        assert_eq!(bin_distance(-3, 2, 0, &g), 5.0);
    }

    #[test]
    fn test_half_stencil_is_half_of_full() {
        let g = grid(10.0, 1.0, 2.0);
        let full = Stencil::build(&g, 2.0, false);
        let half = Stencil::build(&g, 2.0, true);
        assert_eq!(full.extent(), [2, 2, 2]);
        assert_eq!(full.len(), 125);
        assert_eq!(half.len(), 62);

        let g = grid(10.0, 1.0, 1.5);
        let full = Stencil::build(&g, 1.5, false);
        let half = Stencil::build(&g, 1.5, true);
        assert_eq!(full.len(), 117);
        assert_eq!(half.len(), 58);

        let full_set: HashSet<_> = full.xyz().iter().copied().collect();
        let half_set: HashSet<_> = half.xyz().iter().copied().collect();
        for &[i, j, k] in full.xyz() {
            if [i, j, k] == [0, 0, 0] {
                assert!(!half_set.contains(&[0, 0, 0]));
                continue;
            }
            let up = half_set.contains(&[i, j, k]);
            let down = half_set.contains(&[-i, -j, -k]);
            assert!(up ^ down, "offset {:?}", [i, j, k]);
        }
        assert!(half_set.is_subset(&full_set));
    }

    #[test]
    fn test_2d_stencil_is_flat() {
        let b =
            SimBox::new_2d(Vector3::zeros(), Vector3::new(10.0, 10.0, 1.0), [true, true]).unwrap();
        let sub = SubDomain::whole(&b);
        let ctx = BinContext {
            simbox: &b,
            sub: &sub,
            cutghost: 2.0,
            cutneighmax: 2.0,
            cuttype: &[2.0],
            binsize_user: None,
        };
        let g = BinGeometry::setup(&ctx, 1.0).unwrap();
        let half = Stencil::build(&g, 2.0, true);
        assert!(half.xyz().iter().all(|o| o[2] == 0));
        assert_eq!(half.len(), 12);
        assert_eq!(Stencil::build(&g, 2.0, false).len(), 25);
    }

    #[test]
    fn test_is_upper_order() {
        let o = Vector3::new(1.0, 1.0, 1.0);
        assert!(is_upper(&o, &Vector3::new(0.0, 0.0, 2.0)));
        assert!(!is_upper(&o, &Vector3::new(5.0, 5.0, 0.5)));
        assert!(is_upper(&o, &Vector3::new(0.0, 1.5, 1.0)));
        assert!(!is_upper(&o, &Vector3::new(0.5, 1.0, 1.0)));
        assert!(is_upper(&o, &Vector3::new(1.5, 1.0, 1.0)));
    }

    #[test]
    fn test_properties_newton() {
        let mut cut = TypeTable::new(2, 0.0);
        cut.set(1, 1, 1.0);
        cut.set_sym(1, 2, 2.25);
        cut.set(2, 2, 4.0);
        let p = StencilProperties::new(true, &cut, &[1.5, 2.0]);
        assert!(*p.half.get(1, 1) && *p.half.get(2, 2));
        assert!(*p.skip.get(2, 1));
        assert!(!*p.skip.get(1, 2));
        assert!(!*p.half.get(1, 2));
        assert_eq!(*p.bin_type.get(1, 2), 2);
        assert_eq!(*p.cut.get(1, 2), 1.5);

        let p = StencilProperties::new(true, &cut, &[2.0, 2.0]);
        assert!(*p.half.get(1, 2) && *p.half.get(2, 1));
        assert_eq!(*p.bin_type.get(1, 2), 1);
        assert_eq!(*p.bin_type.get(2, 1), 2);

        let p = StencilProperties::new(false, &cut, &[1.5, 2.0]);
        assert!(!*p.skip.get(2, 1));
        assert_eq!(*p.bin_type.get(2, 1), 1);
        assert!(p.half.iter().all(|(_, _, &h)| !h));
    }

    #[test]
    fn test_create_caches_and_rejects_mismatch() {
        let b = SimBox::cube(10.0, true).unwrap();
        let sub = SubDomain::whole(&b);
        let cuttype = [2.0];
        let ctx = BinContext {
            simbox: &b,
            sub: &sub,
            cutghost: 2.0,
            cutneighmax: 2.0,
            cuttype: &cuttype,
            binsize_user: None,
        };
        let mut nb = NBin::new(NBinStyle::Standard);
        nb.setup_bins(&ctx).unwrap();
        let cutsq = TypeTable::new(1, 4.0);
        let sctx = StencilContext {
            cutneighmax: 2.0,
            cutghost: 2.0,
            cutneighsq: &cutsq,
            cuttype: &cuttype,
        };
        let mut ns = NStencil::new(StencilStyle { half: true, bytype: false });
        assert!(ns.is_stale());
        ns.create(&nb, &sctx, 7).unwrap();
        assert!(!ns.is_stale());
        assert_eq!(ns.last_stencil(), Some(7));
        assert_eq!(ns.get(1, 1).unwrap().len(), 62);

        let mut bad = NStencil::new(StencilStyle { half: true, bytype: true });
        assert_eq!(
            bad.create(&nb, &sctx, 0),
            Err(StencilError::BinStyleMismatch(NBinStyle::Bytype))
        );

        let too_far = StencilContext {
            cutneighmax: 3.0,
            ..sctx
        };
        assert!(matches!(
            ns.create(&nb, &too_far, 8),
            Err(StencilError::CutoffExceedsBins { .. })
        ));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_stencil_soundness(
                binsize in 0.4f64..2.0,
                cut in 0.5f64..3.0,
                p in prop::array::uniform3(0.0f64..10.0),
                dir in prop::array::uniform3(-1.0f64..1.0),
                frac in 0.0f64..0.999,
            ) {
                let norm = (dir[0] * dir[0] + dir[1] * dir[1] + dir[2] * dir[2]).sqrt();
                prop_assume!(norm > 1e-3);
                let g = grid(10.0, binsize, 3.5);
                let full = Stencil::build(&g, cut, false);
                let p = Vector3::from(p);
                let q = p + Vector3::from(dir) * (cut * frac / norm);
                let bp = g.coord2bin_xyz(&p).unwrap();
                let bq = g.coord2bin_xyz(&q).unwrap();
                let d = [
                    bq[0] as i32 - bp[0] as i32,
                    bq[1] as i32 - bp[1] as i32,
                    bq[2] as i32 - bp[2] as i32,
                ];
                prop_assert!(full.xyz().contains(&d), "missing offset {:?}", d);
            }
        }
    }
}
