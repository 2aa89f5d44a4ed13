pub mod catalog;
pub mod config;
pub mod generation;
pub mod server;

// Re-export commonly used types
pub use catalog::service::CatalogService;
pub use catalog::{AssetRecord, AssetStore, UnifiedProduct};
pub use generation::{GenerationCache, GenerationParams};

use std::sync::Arc;

pub type AppState = Arc<ServiceState>;

/// Top-level composition root: the two cache subsystems with their
/// collaborators already injected.
pub struct ServiceState {
    pub catalog: CatalogService,
    pub generation: GenerationCache,
}

#[cfg(test)]
mod service_test;
