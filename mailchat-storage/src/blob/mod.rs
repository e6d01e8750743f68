//! Blob stores: opaque key/value storage for message bodies.

pub mod fs;

pub use fs::FsBlobStore;
