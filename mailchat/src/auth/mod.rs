//! Authentication providers.

pub mod pass_blockchain;

pub use pass_blockchain::PassBlockchain;
