//! Sandboxed tool servers over line-delimited JSON-RPC.
//!
//! Pipeline: sandbox process output → [`framer`] (lines) → [`correlator`]
//! (responses matched by id) → [`transport`] events → [`session`] state.
//!
//! Start stages: boot → mount files → install → spawn `node <entrypoint>`,
//! or boot → spawn a command directly.

pub mod correlator;
pub mod error;
pub mod framer;
pub mod sandbox;
pub mod server_files;
pub mod session;
pub mod state;
pub mod transport;
pub mod types;

pub use {
    error::{McpError, Result},
    sandbox::{HostSandbox, MemorySandbox, Sandbox, SandboxProcess, create_sandbox},
    session::{McpSession, SessionUpdate},
    state::{SessionEvent, SessionState, SessionStatus},
    transport::{LaunchSpec, SandboxTransport, TransportEvent, TransportOptions},
    types::{CallToolResult, ContentItem, FileSet, JsonRpcMessage, ProcessConfig, Tool},
};
