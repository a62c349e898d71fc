//! Browser automation agents and their pool
//!
//! An agent is one stateful automation session. Sessions are expensive to
//! start, so workers borrow them from an [`AgentPool`] and hand them back
//! after every attempt; a session that misbehaves is discarded instead.
//!
//! # Components
//!
//! - `Agent` / `AgentFactory`: the automation seam
//! - `AgentPool`: bounded checkout/checkin with discard and shutdown
//! - `WebDriverAgent`: W3C WebDriver session spoken over reqwest
//! - `driver`: process-wide driver binary lookup and the local driver service

pub mod driver;
mod pool;
mod webdriver;

pub use driver::{driver_path, DriverService};
pub use pool::{AgentPool, PooledAgent};
pub use webdriver::{WebDriverAgent, WebDriverFactory};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Pool-assigned agent identifier
pub type AgentId = u64;

/// Errors raised by automation sessions
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to start automation session: {0}")]
    Start(String),

    #[error("WebDriver error '{code}': {message}")]
    Protocol { code: String, message: String },

    #[error("Unexpected WebDriver response: {0}")]
    Response(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Driver unavailable: {0}")]
    Driver(String),

    #[error("Agent pool is shut down")]
    PoolClosed,
}

impl AgentError {
    /// Returns true if the session that raised this error must not be reused
    ///
    /// Transport failures mean the driver or browser went away; a handful of
    /// protocol codes mean the session itself no longer exists.
    pub fn is_fatal(&self) -> bool {
        match self {
            AgentError::Start(_) | AgentError::Transport(_) | AgentError::Driver(_) => true,
            AgentError::Protocol { code, .. } => matches!(
                code.as_str(),
                "invalid session id" | "session not created" | "unknown error" | "no such window"
            ),
            AgentError::Response(_) | AgentError::Timeout(_) | AgentError::PoolClosed => false,
        }
    }
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// One stateful automation session
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> AgentId;

    /// Loads a URL in the session's window
    async fn navigate(&self, url: &str) -> AgentResult<()>;

    async fn current_url(&self) -> AgentResult<String>;

    /// Serialized DOM of the current page
    async fn page_source(&self) -> AgentResult<String>;

    /// History back
    async fn back(&self) -> AgentResult<()>;

    /// Runs a synchronous script; `arguments[i]` inside the script maps to `args[i]`
    async fn execute(&self, script: &str, args: Vec<Value>) -> AgentResult<Value>;

    /// Clears session-local state so the next borrower starts clean
    async fn reset(&self) -> AgentResult<()>;

    /// Terminates the session
    async fn close(&self) -> AgentResult<()>;
}

/// Creates new sessions on demand
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn create(&self, id: AgentId) -> AgentResult<Arc<dyn Agent>>;
}
