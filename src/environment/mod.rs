//! Environment preparation for child processes
//!
//! Loads the environment definition file and turns it into the explicit map
//! handed to every spawned process.

pub mod builder;
pub mod definition;
pub mod injector;

pub use builder::{ambient_env, build_environment, EnvMap};
pub use definition::{locate, EnvDefinition};
pub use injector::EnvInjector;
