pub mod link;
pub mod snapshot;

// Re-exports for convenience
pub use link::*;
pub use snapshot::*;
