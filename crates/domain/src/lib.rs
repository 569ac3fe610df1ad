pub mod capability;
pub mod config;
pub mod error;
pub mod thread;
pub mod trace;
