use nalgebra::Vector3;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum DomainError {
    #[error("Box extent must be positive in every dimension (got {0:?})")]
    Degenerate([f64; 3]),
    #[error("Box bounds must be finite")]
    NonFinite,
    #[error("Subdomain [{lo:?}, {hi:?}] is not inside the box")]
    SubdomainOutside { lo: [f64; 3], hi: [f64; 3] },
}

/// Global simulation box. Orthogonal only; the `triclinic` flag is carried so
/// that style selection can refuse it up front.
#[derive(Clone, Debug)]
pub struct SimBox {
    lo: Vector3<f64>,
    hi: Vector3<f64>,
    prd: Vector3<f64>,
    pbc: Vector3<bool>,
    dimension: usize,
    triclinic: bool,
}

impl SimBox {
    pub fn new(
        lo: Vector3<f64>,
        hi: Vector3<f64>,
        pbc: Vector3<bool>,
    ) -> Result<Self, DomainError> {
        if lo.iter().chain(hi.iter()).any(|v| !v.is_finite()) {
            return Err(DomainError::NonFinite);
        }
        let prd = hi - lo;
        if prd.iter().any(|&d| d <= 0.0) {
            return Err(DomainError::Degenerate([prd.x, prd.y, prd.z]));
        }
        Ok(Self {
            lo,
            hi,
            prd,
            pbc,
            dimension: 3,
            triclinic: false,
        })
    }

    /// A 2-D box. The z extent is still needed for binning but z is never
    /// periodic and no stencil extends along it.
    pub fn new_2d(lo: Vector3<f64>, hi: Vector3<f64>, pbc: [bool; 2]) -> Result<Self, DomainError> {
        let mut b = Self::new(lo, hi, Vector3::new(pbc[0], pbc[1], false))?;
        b.dimension = 2;
        Ok(b)
    }

    pub fn cube(len: f64, periodic: bool) -> Result<Self, DomainError> {
        Self::new(
            Vector3::zeros(),
            Vector3::repeat(len),
            Vector3::repeat(periodic),
        )
    }

    pub fn with_triclinic(mut self, triclinic: bool) -> Self {
        self.triclinic = triclinic;
        self
    }

    pub fn lo(&self) -> &Vector3<f64> {
        &self.lo
    }

    pub fn hi(&self) -> &Vector3<f64> {
        &self.hi
    }

    pub fn prd(&self) -> &Vector3<f64> {
        &self.prd
    }

    pub fn pbc(&self) -> &Vector3<bool> {
        &self.pbc
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn is_triclinic(&self) -> bool {
        self.triclinic
    }

    pub fn wrap(&self, x: &Vector3<f64>) -> Vector3<f64> {
        let mut w = *x;
        for d in 0..3 {
            if self.pbc[d] {
                let frac = (x[d] - self.lo[d]) / self.prd[d];
                w[d] = self.lo[d] + (frac - frac.floor()) * self.prd[d];
            }
        }
        w
    }

    /// True if `del` is longer than half the period along any periodic axis,
    /// i.e. the two points cannot be the closest images of each other.
    pub fn minimum_image_check(&self, del: &Vector3<f64>) -> bool {
        (0..self.dimension).any(|d| self.pbc[d] && del[d].abs() > 0.5 * self.prd[d])
    }

    pub fn minimum_image(&self, del: &Vector3<f64>) -> Vector3<f64> {
        let mut out = *del;
        for d in 0..self.dimension {
            if self.pbc[d] {
                out[d] -= self.prd[d] * (del[d] / self.prd[d]).round();
            }
        }
        out
    }
}

/// The portion of the box owned by this rank.
#[derive(Clone, Debug, PartialEq)]
pub struct SubDomain {
    pub lo: Vector3<f64>,
    pub hi: Vector3<f64>,
}

impl SubDomain {
    pub fn new(simbox: &SimBox, lo: Vector3<f64>, hi: Vector3<f64>) -> Result<Self, DomainError> {
        let inside =
            (0..3).all(|d| lo[d] >= simbox.lo[d] && hi[d] <= simbox.hi[d] && lo[d] < hi[d]);
        if !inside {
            return Err(DomainError::SubdomainOutside {
                lo: [lo.x, lo.y, lo.z],
                hi: [hi.x, hi.y, hi.z],
            });
        }
        Ok(Self { lo, hi })
    }

    pub fn whole(simbox: &SimBox) -> Self {
        Self {
            lo: simbox.lo,
            hi: simbox.hi,
        }
    }

    pub fn contains(&self, x: &Vector3<f64>) -> bool {
        (0..3).all(|d| x[d] >= self.lo[d] && x[d] < self.hi[d])
    }
}
