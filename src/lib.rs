pub mod platform;
pub mod registry;
pub mod streams;

pub use registry::{ModuleRegistry, RegistryError};
pub use streams::*;
