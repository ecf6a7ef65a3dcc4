//! wiresift library crate: capture, filtering, query translation and the
//! session that ties them together. Re-exported for the binary, tests and
//! benchmarks.

pub mod capture;
pub mod config;
pub mod console;
pub mod filter;
pub mod packet;
pub mod session;
pub mod translate;
