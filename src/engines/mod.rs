//! Search capability module
//!
//! Defines the [`SearchCapability`] trait and the two backends behind it:
//! hybrid index search and public-web augmentation.

mod extract;
mod index;
mod registry;
mod traits;
mod web;

pub use index::{HttpIndexBackend, IndexBackend, IndexHit, IndexSearch};
pub use registry::CapabilityRegistry;
pub use traits::*;
pub use web::WebAugmentation;
