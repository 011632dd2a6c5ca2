//! Shared building blocks for the booster gateway: server error codes,
//! credential decryption and the process identity marker.

pub mod crypto;
pub mod process;
pub mod types;

pub use types::ServerErrCode;
