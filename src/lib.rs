//! Inmate registry MCP gateway
//!
//! This library exposes a small set of inmate registry tools over the Model
//! Context Protocol. Tool calls are validated against a static catalog,
//! translated into OData requests and executed against the registry backend.
//!
//! # Architecture
//!
//! - **Tool catalog** (`tool_registry`): static name → parameters/translator table.
//!
//! - **Action translator** (`translate`): pure mapping from validated
//!   arguments to backend actions (method, path, escaped query).
//!
//! - **Dispatcher** (`dispatch`): validate, translate, call the backend,
//!   package the result. Stateless across calls.
//!
//! - **Sessions** (`session`): per-session subscription sets in a sharded
//!   registry, two background notifiers per session, and a supervisor that
//!   guarantees cleanup however the session ends.
//!
//! - **InmateMcpServer** (`server`): the rmcp `ServerHandler` wiring the
//!   above to stdio or streamable HTTP.
//!
//! # Tools
//!
//! ## Search
//! - `inmate_simple_search`: search by first/last name with optional filters
//!
//! ## Profile
//! - `inmate_get_details`: full record for an inmate id
//!
//! ## Records
//! - `inmate_get_convictions`: convictions, optionally a single one
//! - `inmate_get_visits`: visits within an inclusive date range

pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod server;
pub mod session;
pub mod tool_registry;
pub mod translate;

pub use config::{GatewayArgs, GatewayConfig, HttpConfig};
pub use dispatch::{Backend, HttpBackend, ToolCallResult, ToolDispatcher};
pub use error::{SessionError, ToolError};
pub use logging::{gateway_subscriber, LogForwardLayer, LogHub, LogLevel};
pub use server::{InmateMcpServer, ServerMode};
pub use session::{SessionRegistry, SessionSupervisor};
pub use tool_registry::{ToolCategory, ToolInfo, TOOL_REGISTRY};
