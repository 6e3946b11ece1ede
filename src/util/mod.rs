//! Small shared utilities.

pub mod sig_down;

pub use sig_down::shutdown_token;
