//! Model catalog entries and per-tenant alias resolution (§3, §4.5).
//!
//! Dependency-free aside from `serde`: the model catalog is consulted by
//! both the policy enforcer (model restriction) and every provider adapter
//! (name resolution), so it lives below both in the dependency graph.

pub mod cache;
pub mod entry;

pub use cache::ModelCache;
pub use entry::{ModelCapabilities, ModelCatalogEntry, ModelPricing};
