pub mod capability;
pub mod config;
pub mod error;
pub mod globals;
pub mod graph;
pub mod module;
pub mod registry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use capability::{
    Account, Authenticator, BlobStore, BlockChain, Capability, Checker, Closer, DeliveryResult,
    Endpoint, Modifier, Storage, Target, Verdict,
};
pub use config::{ConfigMap, parse_duration};
pub use error::{ConfigError, ModuleError};
pub use globals::Globals;
pub use graph::{Graph, Instances};
pub use module::{Capabilities, Instance, Module};
pub use registry::{Factory, Registry};
