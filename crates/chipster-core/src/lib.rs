pub mod bootstrap;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod locator;
pub mod paths;
pub mod storage;
pub mod vhost;
pub mod walker;
