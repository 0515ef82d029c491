//! HTTP runtime: the hyper front end and its configuration.

mod config;
mod server;

pub use config::StrandConfig;
pub use server::StrandServer;
