//! Test utilities for the Medical Research Gateway.
//!
//! Provides [`TestGateway`], an in-process server harness bound to an
//! ephemeral port, plus scripted mock tool providers (real subprocesses
//! speaking the line-delimited JSON protocol) and re-exported LLM mocks.

mod mock_tool;
mod server_harness;

pub use mock_tool::{write_mock_tool, MockToolBehavior};
pub use server_harness::{TestGateway, TestGatewayBuilder};

// Re-export so tests depend on one crate for their doubles
pub use mg_service::llm::MockLlmProvider;
