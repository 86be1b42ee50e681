pub mod cli;
pub mod duration;
pub mod load_config;
pub mod load_manifest;
pub mod report;

pub use cli::{run, Cli};
