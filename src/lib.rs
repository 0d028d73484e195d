//! Binned neighbor lists and ghost-cell grid communication for particle
//! simulations.
//!
//! The neighbor side follows the usual three stages: atoms are sorted into
//! bins (`nbin`), each bin is paired with the bins a stencil says may hold
//! neighbors (`nstencil`), and pair builders fill page-backed lists
//! (`npair`, `npair_derived`). `Neighbor` ties these together and decides
//! when a rebuild is due.
//!
//! The grid side (`gridcomm`) exchanges ghost cells of a distributed 3-D
//! grid over a `Communicator`, for regular or RCB-tiled decompositions.

pub mod api;
pub mod atom;
pub mod comm;
pub mod config;
pub mod decomp;
pub mod domain;
pub mod exclusion;
pub mod ghost;
pub mod gridcomm;
pub mod nbin;
pub mod neigh_list;
pub mod neighbor;
pub mod npair;
pub mod npair_derived;
pub mod nstencil;
pub mod page;
pub mod table;

pub use api::{NeighborList, build_neighborlists};
pub use atom::Atoms;
pub use comm::{Communicator, ThreadComm, run_world};
pub use config::{Binning, NeighSettings};
pub use decomp::{GridBox, ProcGrid};
pub use domain::{SimBox, SubDomain};
pub use gridcomm::{GridBuffer, GridComm, GridCommError, GridKernel, Layout};
pub use neigh_list::NeighList;
pub use neighbor::{ListId, NeighRequest, Neighbor, NeighborError};
pub use table::TypeTable;

use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber; `RUST_LOG` wins over `level`. Calling
/// it again is a no-op.
pub fn init_logging(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .with_thread_ids(true)
        .try_init();
}
