//! Built-in modifiers.

pub mod add_header;
pub mod blockchain_tx;
pub mod replace;

pub use add_header::AddHeader;
pub use blockchain_tx::BlockchainTx;
pub use replace::{ReplaceRcpt, ReplaceSender};
