//! Session lifecycle state machine.
//!
//! `SessionState` is the single owner of the status field and the data a
//! session accumulates (output log, tool list, last tool result, error).
//! Every status change goes through [`SessionState::apply`].

use serde::{Deserialize, Serialize};

use crate::{
    error::{McpError, Result},
    types::{CallToolResult, Tool},
};

/// Lifecycle status of a sandboxed server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    #[serde(alias = "teardowned")]
    Idle,
    Booting,
    Mounting,
    Installing,
    Running,
    Unmounting,
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Booting => f.write_str("booting"),
            Self::Mounting => f.write_str("mounting"),
            Self::Installing => f.write_str("installing"),
            Self::Running => f.write_str("running"),
            Self::Unmounting => f.write_str("unmounting"),
            Self::Error => f.write_str("error"),
        }
    }
}

impl SessionStatus {
    /// Whether a server is starting, running or being torn down.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle | Self::Error)
    }
}

/// Something that happened to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StartRequested,
    /// Sandbox is up; file mount or direct spawn begins.
    Booted,
    /// Files are in place; dependency install begins.
    FilesMounted,
    InstallSucceeded,
    /// Server process spawned (direct launch skips mount and install).
    Spawned,
    Failed(String),
    UnmountRequested,
    StopRequested,
    /// Server process went away without being asked to.
    ProcessClosed,
}

/// Status plus everything a session shows to its observers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    status: SessionStatus,
    output: String,
    tools: Vec<Tool>,
    active_tool_result: CallToolResult,
    active_tool_name: Option<String>,
    error: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn active_tool_result(&self) -> &CallToolResult {
        &self.active_tool_result
    }

    pub fn active_tool_name(&self) -> Option<&str> {
        self.active_tool_name.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Apply an event and return the resulting status.
    ///
    /// Invalid transitions leave the state untouched.
    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionStatus> {
        use {SessionEvent as E, SessionStatus as S};

        let next = match (self.status, &event) {
            (S::Idle | S::Running | S::Error, E::StartRequested) => {
                self.reset();
                S::Booting
            },
            (S::Booting, E::Booted) => S::Mounting,
            (S::Mounting, E::FilesMounted) => S::Installing,
            (S::Installing, E::InstallSucceeded) => S::Running,
            (S::Booting | S::Mounting | S::Installing, E::Spawned) => S::Running,
            (from, E::Failed(message)) if from != S::Error => {
                self.record_error(message);
                S::Error
            },
            (S::Running, E::UnmountRequested) => S::Unmounting,
            (_, E::StopRequested) => S::Idle,
            (S::Running, E::ProcessClosed) => S::Idle,
            (from, _) => {
                return Err(McpError::InvalidTransition {
                    from,
                    event: event.clone(),
                });
            },
        };

        self.status = next;
        Ok(next)
    }

    /// Fail with "transport not initialized" unless the server is running.
    pub fn ensure_running(&self) -> Result<()> {
        if self.status != SessionStatus::Running {
            return Err(McpError::NotInitialized);
        }
        Ok(())
    }

    pub fn append_output(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// Append one line to the log, newline-terminated.
    pub fn append_line(&mut self, line: &str) {
        self.output.push_str(line);
        self.output.push('\n');
    }

    pub fn set_tools(&mut self, tools: Vec<Tool>) {
        self.tools = tools;
    }

    pub fn set_active_tool(&mut self, name: &str) {
        self.active_tool_name = Some(name.to_string());
    }

    pub fn set_active_tool_result(&mut self, result: CallToolResult) {
        self.active_tool_result = result;
    }

    /// Record a failure that does not end the session (e.g. one tool call).
    pub fn record_error(&mut self, message: &str) {
        self.error = Some(message.to_string());
        self.output.push_str("\nError: ");
        self.output.push_str(message);
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_state() -> SessionState {
        let mut state = SessionState::new();
        state.apply(SessionEvent::StartRequested).unwrap();
        state.apply(SessionEvent::Booted).unwrap();
        state.apply(SessionEvent::Spawned).unwrap();
        state
    }

    #[test]
    fn files_launch_walks_every_stage() {
        let mut state = SessionState::new();
        let seen: Vec<SessionStatus> = [
            SessionEvent::StartRequested,
            SessionEvent::Booted,
            SessionEvent::FilesMounted,
            SessionEvent::InstallSucceeded,
        ]
        .into_iter()
        .map(|e| state.apply(e).unwrap())
        .collect();
        assert_eq!(seen, [
            SessionStatus::Booting,
            SessionStatus::Mounting,
            SessionStatus::Installing,
            SessionStatus::Running,
        ]);
    }

    #[test]
    fn direct_spawn_skips_mount_and_install() {
        assert_eq!(running_state().status(), SessionStatus::Running);
    }

    #[test]
    fn start_from_running_resets_session_data_first() {
        let mut state = running_state();
        state.append_line("old output");
        state.set_tools(vec![Tool {
            name: "echo".into(),
            description: None,
            input_schema: serde_json::json!({}),
        }]);
        state.record_error("boom");

        assert_eq!(
            state.apply(SessionEvent::StartRequested).unwrap(),
            SessionStatus::Booting
        );
        assert_eq!(state.output(), "");
        assert!(state.tools().is_empty());
        assert!(state.error().is_none());
        assert_eq!(state.active_tool_result(), &CallToolResult::default());
    }

    #[test]
    fn start_is_rejected_while_launching() {
        let mut state = SessionState::new();
        state.apply(SessionEvent::StartRequested).unwrap();
        let err = state.apply(SessionEvent::StartRequested).unwrap_err();
        assert!(matches!(err, McpError::InvalidTransition {
            from: SessionStatus::Booting,
            ..
        }));
        assert_eq!(state.status(), SessionStatus::Booting);
    }

    #[test]
    fn failure_logs_once_and_sets_error() {
        let mut state = SessionState::new();
        state.apply(SessionEvent::StartRequested).unwrap();
        state.apply(SessionEvent::Booted).unwrap();
        state
            .apply(SessionEvent::Failed("mount exploded".into()))
            .unwrap();
        assert_eq!(state.status(), SessionStatus::Error);
        assert_eq!(state.error(), Some("mount exploded"));
        assert_eq!(state.output(), "\nError: mount exploded");

        // Already in error: a second failure is not a transition.
        assert!(state.apply(SessionEvent::Failed("again".into())).is_err());
        assert_eq!(state.output().matches("Error:").count(), 1);
    }

    #[test]
    fn unexpected_close_goes_idle_without_error() {
        let mut state = running_state();
        assert_eq!(
            state.apply(SessionEvent::ProcessClosed).unwrap(),
            SessionStatus::Idle
        );
        assert!(state.error().is_none());
        assert!(!state.output().contains("Error"));
    }

    #[test]
    fn stop_is_valid_from_anywhere() {
        for status_events in [
            vec![],
            vec![SessionEvent::StartRequested],
            vec![SessionEvent::StartRequested, SessionEvent::Failed("x".into())],
        ] {
            let mut state = SessionState::new();
            for e in status_events {
                state.apply(e).unwrap();
            }
            assert_eq!(
                state.apply(SessionEvent::StopRequested).unwrap(),
                SessionStatus::Idle
            );
        }

        let mut state = running_state();
        assert_eq!(
            state.apply(SessionEvent::UnmountRequested).unwrap(),
            SessionStatus::Unmounting
        );
        assert_eq!(
            state.apply(SessionEvent::StopRequested).unwrap(),
            SessionStatus::Idle
        );
    }

    #[test]
    fn process_closed_outside_running_is_invalid() {
        let mut state = SessionState::new();
        assert!(state.apply(SessionEvent::ProcessClosed).is_err());
        assert_eq!(state.status(), SessionStatus::Idle);
    }

    #[test]
    fn guard_only_passes_when_running() {
        let state = SessionState::new();
        assert_eq!(
            state.ensure_running().unwrap_err().to_string(),
            "transport not initialized"
        );
        assert!(running_state().ensure_running().is_ok());
    }

    #[test]
    fn teardowned_parses_as_idle() {
        let status: SessionStatus = serde_json::from_str("\"teardowned\"").unwrap();
        assert_eq!(status, SessionStatus::Idle);
        assert_eq!(SessionStatus::Installing.to_string(), "installing");
    }

    #[test]
    fn only_idle_and_error_are_inactive() {
        assert!(SessionStatus::Running.is_active());
        assert!(SessionStatus::Unmounting.is_active());
        assert!(!SessionStatus::Idle.is_active());
        assert!(!SessionStatus::Error.is_active());
    }
}
