use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

// Default heuristic values.
const DEFAULT_PARALLEL_THRESHOLD: usize = 4096;

pub const DEFAULT_SKIN: f64 = 0.3;
pub const DEFAULT_ONE_ATOM: usize = 2000;
pub const DEFAULT_PAGE: usize = 100_000;

static PARALLEL_THRESHOLD: AtomicUsize = AtomicUsize::new(DEFAULT_PARALLEL_THRESHOLD);

/// Atom count above which binning hashes coordinates with rayon.
pub fn get_parallel_threshold() -> usize {
    PARALLEL_THRESHOLD.load(Ordering::Relaxed)
}

pub fn set_parallel_threshold(val: usize) {
    PARALLEL_THRESHOLD.store(val, Ordering::Relaxed);
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Neighbor skin must be non-negative and finite (got {0})")]
    InvalidSkin(f64),
    #[error("Neighbor every must be positive")]
    ZeroEvery,
    #[error("Neighbor one must be positive")]
    ZeroOneAtom,
    #[error("Neighbor page size must be >= 10x the one atom setting")]
    PageTooSmall,
    #[error("Neighbor binsize must be positive (got {0})")]
    InvalidBinsize(f64),
    #[error("Invalid cutoff {cutoff} for types {itype},{jtype}")]
    InvalidCutoff { itype: usize, jtype: usize, cutoff: f64 },
    #[error("Triclinic boxes are not supported by the binned neighbor styles")]
    Triclinic,
    #[error("Neighbor ghost lists must be full lists")]
    HalfGhostList,
    #[error("Neighbor history requires a size list")]
    HistoryWithoutSize,
    #[error("Neighbor list request {0} refers to an unknown parent list")]
    UnknownParent(usize),
    #[error("Neighbor list request {0} needs a full parent list")]
    ParentNotFull(usize),
    #[error("Skip flags cover {got} atom types, expected {expected}")]
    SkipTypes { expected: usize, got: usize },
    #[error("Neighbor lists have not been initialized")]
    NotInitialized,
}

/// How atoms are grouped before candidate pairs are enumerated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Binning {
    /// One bin grid sized from the largest cutoff.
    Bin,
    /// One bin grid per atom type, sized from that type's largest cutoff.
    Bytype,
    /// No bins: every pair is checked.
    Nsq,
}

/// Settings of the neighbor subsystem (the `neighbor`/`neigh_modify` knobs).
#[derive(Clone, Debug)]
pub struct NeighSettings {
    pub skin: f64,
    pub every: u64,
    pub delay: u64,
    pub check: bool,
    pub once: bool,
    /// Fixed bin size for `Binning::Bin`. `Binning::Bytype` always sizes each
    /// type's grid from that type's cutoff.
    pub binsize_user: Option<f64>,
    pub one_atom: usize,
    pub page: usize,
    pub newton_pair: bool,
    pub binning: Binning,
}

impl Default for NeighSettings {
    fn default() -> Self {
        Self {
            skin: DEFAULT_SKIN,
            every: 1,
            delay: 0,
            check: true,
            once: false,
            binsize_user: None,
            one_atom: DEFAULT_ONE_ATOM,
            page: DEFAULT_PAGE,
            newton_pair: true,
            binning: Binning::Bin,
        }
    }
}

impl NeighSettings {
    pub fn with_skin(mut self, skin: f64) -> Self {
        self.skin = skin;
        self
    }

    pub fn with_binning(mut self, binning: Binning) -> Self {
        self.binning = binning;
        self
    }

    pub fn with_newton(mut self, newton_pair: bool) -> Self {
        self.newton_pair = newton_pair;
        self
    }

    pub fn with_one_atom(mut self, one_atom: usize, page: usize) -> Self {
        self.one_atom = one_atom;
        self.page = page;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.skin.is_finite() || self.skin < 0.0 {
            return Err(ConfigError::InvalidSkin(self.skin));
        }
        if self.every == 0 {
            return Err(ConfigError::ZeroEvery);
        }
        if self.one_atom == 0 {
            return Err(ConfigError::ZeroOneAtom);
        }
        if self.page < 10 * self.one_atom {
            return Err(ConfigError::PageTooSmall);
        }
        if let Some(b) = self.binsize_user
            && (!b.is_finite() || b <= 0.0)
        {
            return Err(ConfigError::InvalidBinsize(b));
        }
        Ok(())
    }
}
