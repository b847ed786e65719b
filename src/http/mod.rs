pub mod client;
pub mod handler;
pub mod io;
pub mod pool;
pub mod resolver;
