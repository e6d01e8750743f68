pub mod address;
pub mod directive;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod status;

pub use address::Address;
pub use directive::{Location, Node};
pub use domain::Domain;
pub use envelope::{Envelope, MessageId};
pub use hooks::{Event, Hooks};
pub use status::{EnhancedCode, Reply, Status};
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
