//! Command line handling

pub mod parser;

pub use parser::Cli;
