// Library target shared by the binary, integration tests and criterion
// benchmarks.

pub mod app;
pub mod catalog;
pub mod config;
pub mod event;
pub mod render;
pub mod state;
pub mod store;
