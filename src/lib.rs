#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate tracing;

pub mod app;
pub mod cli;
pub mod http;
pub mod tls;
pub mod trace;
