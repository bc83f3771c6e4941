pub mod apply;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod manifest;
pub mod shutdown;
