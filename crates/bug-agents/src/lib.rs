//! CI failure triage agents
//!
//! Wires the `triage` engine to real collaborators:
//!
//! - **config**: layered configuration (defaults, TOML, `TRIAGE_*` env)
//! - **github**: GitHub REST issue tracker
//! - **github_dispatch**: repository-dispatch publisher for fix attempts
//! - **telemetry**: tracing setup and JSONL outcome log
//! - **cli**: the `bug-agents` command surface

pub mod cli;
pub mod config;
pub mod github;
pub mod github_dispatch;
pub mod telemetry;

pub use config::AgentConfig;
