//! pymirror - incremental package-index mirror
//!
//! pymirror keeps a partial local mirror of a Python package index in
//! sync with upstream, fetching only what changed and pruning what
//! policy excludes.
//!
//! ## Core Features
//!
//! - **Incremental Sync**: serial-diff reconciliation fetches metadata
//!   only for packages that changed upstream
//! - **Exclusion Policy**: rule-based blacklist propagated through the
//!   dependency graph so no mirrored package misses a mandatory dependency
//! - **Release Selection**: keep-latest-N and platform filters decide
//!   which files are worth the disk
//! - **Disk Reconciliation**: orphan and policy sweeps reclaim space,
//!   with dry-run reporting
//!
//! ## Modules
//!
//! - [`sync`]: catalog/metadata reconciliation against upstream
//! - [`blacklist`] / [`closure`]: exclusion policy computation
//! - [`filters`]: the release selection pipeline
//! - [`mirror`] / [`sweep`]: artifact download and disk sweeps

pub mod blacklist;
pub mod cancel;
pub mod closure;
pub mod config;
pub mod filters;
pub mod metadata;
pub mod mirror;
pub mod pep440;
pub mod store;
pub mod sweep;
pub mod sync;
pub mod transport;

pub use cancel::CancelToken;
pub use closure::ExclusionPolicy;
pub use config::Config;
pub use filters::{ReleasePipeline, Selection};
pub use mirror::{MirrorOptions, MirrorSummary};
pub use store::Store;
pub use sweep::SweepSummary;
pub use sync::SyncSummary;
pub use transport::{FetchError, HttpTransport, IndexTransport};
