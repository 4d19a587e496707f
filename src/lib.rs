pub mod cli;
pub mod config;
pub mod delta;
pub mod metrics;
pub mod render;
pub mod report;
pub mod resources;
