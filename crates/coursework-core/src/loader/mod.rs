//! Named loaders and their dependency-ordered execution.

pub mod registry;
pub mod resolver;

pub use registry::{LoaderRegistry, LoaderSpec, Resolved};
pub use resolver::DependencyResolver;
