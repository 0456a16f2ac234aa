//! Model catalog and session lifecycle
//!
//! Two halves:
//! - [`catalog`]: resolves model ids to on-disk artifacts in the
//!   HuggingFace cache layout and classifies them into a
//!   [`speaches_core::ModelFamily`].
//! - [`manager`]: one [`ModelManager`] per executor family holds named,
//!   lazily constructed, reference-counted sessions that self-dispose
//!   after an idle TTL.

pub mod catalog;
pub mod manager;
mod slot;

pub use catalog::{LocalModel, ModelCatalog};
pub use manager::{LoaderFactory, ModelManager};
pub use slot::{Loader, ModelLease};
