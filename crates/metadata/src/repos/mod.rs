//! Repository traits making up a document store.

pub mod checkpoints;
pub mod documents;

pub use checkpoints::CheckpointRepo;
pub use documents::DocumentRepo;
