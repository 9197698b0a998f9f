//! Tool-provider clients and their supervised pool.
//!
//! Providers are long-lived child processes speaking line-delimited JSON
//! envelopes over stdin/stdout (see [`protocol`]). [`client`] owns the
//! per-client transport and pending-call machinery; [`pool`] holds the fixed
//! membership the rest of the gateway sees.

pub mod client;
pub mod pool;
pub mod protocol;

pub use client::{ClientStatus, ToolCallError, ToolClient, ToolClientConfig};
pub use pool::ToolPool;
