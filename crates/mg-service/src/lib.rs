//! Medical Research Gateway service library.
//!
//! A single-tenant HTTP gateway that federates clinical queries across
//! subprocess-backed tool providers and a primary/fallback LLM, and returns
//! one synthesized, safety-annotated response.
//!
//! # Modules
//!
//! - `config` - Service configuration
//! - `errors` - The closed error taxonomy and its wire mapping
//! - `models` - Shared domain vocabulary and record shapes
//! - `phi` - PHI detection and redaction
//! - `audit` - Append-only audit sink
//! - `crypto` - Payload encryption and session tokens
//! - `session` - In-memory session store
//! - `ratelimit` - Sliding-window rate limiter
//! - `tools` - Tool-provider clients and pool
//! - `intent` - Clinical intent classification
//! - `imaging` - Upload validation and transcoding
//! - `llm` - Unified LLM adapter
//! - `federation` - The synthesis pipeline
//! - `middleware`, `handlers`, `routes` - The HTTP surface
//! - `observability` - Metrics
//! - `tasks` - Background sweepers

pub mod audit;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod federation;
pub mod handlers;
pub mod imaging;
pub mod intent;
pub mod llm;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod phi;
pub mod ratelimit;
pub mod routes;
pub mod session;
pub mod tasks;
pub mod tools;
