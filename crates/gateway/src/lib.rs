//! Gateway: fronts the build-acceleration engines behind one HTTP entry point.
//!
//! Lifecycle:
//! 1. Load + validate config, write the pid file
//! 2. Start the service registrar (discovery announcement + topology events)
//! 3. Activate each enabled engine in fixed order: decrypt credential, open the
//!    store pool, build its route table
//! 4. Register the aggregated routes and start the listener (plain or TLS)
//!
//! Any failure aborts startup; nothing is retried. Every handler answers with
//! the [`envelope::RestResponse`] JSON envelope.

pub mod activation;
pub mod engines;
pub mod envelope;
pub mod error;
pub mod registrar;
pub mod server;
pub mod state;
pub mod store;
#[cfg(feature = "tls")]
pub mod tls;

#[cfg(test)]
pub(crate) mod testing;

pub use {
    error::GatewayError,
    server::{GatewayServer, run},
};
