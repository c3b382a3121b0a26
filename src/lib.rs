pub mod assemble;
pub mod cli;
pub mod config;
pub mod graph;
pub mod linker;
pub mod model;
pub mod plugins;
pub mod resolver;
pub mod scanner;

mod api;
#[cfg(test)]
mod testing;

pub use api::{Packlink, PacklinkBuilder};
