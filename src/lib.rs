//! mcp-agents: coding-agent CLIs exposed as MCP tools over stdio.

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod mcp;
pub mod normalize;
pub mod orchestrator;
pub mod passthrough;
pub mod process;
pub mod tools;

pub use error::{Error, Result};
