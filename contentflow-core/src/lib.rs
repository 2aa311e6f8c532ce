//! Contentflow: a workflow engine for multi-stage content generation
//! pipelines backed by a completion service.
//!
//! Each workflow type maps to a fixed pipeline of agent stages. The engine
//! creates a durable [`workflow::WorkflowRecord`] per run, executes the
//! stages sequentially against a [`completion::CompletionClient`], persists
//! the record after every transition, and supports cooperative cancellation
//! at stage boundaries.
//!
//! ```no_run
//! use std::sync::Arc;
//! use contentflow_core::config::EngineConfig;
//! use contentflow_core::completion::client_from_settings;
//! use contentflow_core::workflow::{InMemoryWorkflowStore, WorkflowEngine, WorkflowType};
//!
//! # async fn demo() -> contentflow_core::error::Result<()> {
//! let config = EngineConfig::load()?;
//! let client = client_from_settings(&config.completion)?;
//! let engine = WorkflowEngine::new(config, InMemoryWorkflowStore::shared(), client);
//!
//! let record = engine
//!     .start_workflow(
//!         WorkflowType::ContentGeneration,
//!         "user-1",
//!         "business-1",
//!         serde_json::json!({"business": {"name": "Acme Coffee"}}),
//!     )
//!     .await?;
//! println!("{}", record.status);
//! # Ok(())
//! # }
//! ```

pub mod completion;
pub mod config;
pub mod error;
pub mod parsing;
pub mod workflow;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports.
pub mod prelude {
    pub use crate::completion::{client_from_settings, CompletionClient};
    pub use crate::config::EngineConfig;
    pub use crate::error::{EngineError, Result};
    pub use crate::workflow::{
        InMemoryWorkflowStore, WorkflowEngine, WorkflowRecord, WorkflowStatus, WorkflowStore,
        WorkflowType,
    };
}
