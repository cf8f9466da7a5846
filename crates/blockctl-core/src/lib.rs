#![warn(missing_docs)]

//! blockctl core: request handling for the block-storage volume API.
//!
//! Version negotiation, list filtering and pagination, summaries, attachment
//! views and the revert-to-snapshot state machine. Persistence sits behind
//! [`store::VolumeStore`]; the core holds no state of its own between
//! requests.

pub mod attachment;
pub mod context;
pub mod error;
pub mod filter;
pub mod listing;
pub mod memory;
pub mod model;
pub mod revert;
pub mod store;
pub mod summary;
pub mod version;
pub mod view;

pub use context::{RequestContext, TenantScope};
pub use error::{ApiError, ErrorKind, Result};
pub use filter::FilterValidator;
pub use listing::{ListingPaginator, Page, SnapshotPage, VolumePage};
pub use memory::MemoryStore;
pub use revert::{complete_revert, RevertDispatcher, RevertJob, RevertRequest, RevertStateMachine};
pub use store::{Listable, VolumeStore};
pub use version::{ApiVersion, Feature, FeatureSet, VersionNegotiator};
pub use view::ViewBuilder;
