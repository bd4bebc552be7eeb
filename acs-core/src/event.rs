//! Engine stream events.
//!
//! One turn of the engine produces an async sequence of these; the
//! server translates them into room notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events emitted by the engine while streaming a model turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum StreamEvent {
    /// Streaming text from the model.
    TextDelta { delta: String },

    /// A tool-use content block opened in the model output.
    ToolUseStarted {
        id: String,
        name: String,
        #[serde(default)]
        index: usize,
    },

    /// A tool-use content block closed.
    ToolUseStopped {
        #[serde(default)]
        index: usize,
    },

    /// Tool execution began.
    ToolExecutionStarted { id: String, name: String },

    /// Incremental tool output.
    ToolExecutionOutput {
        id: String,
        name: String,
        output: Value,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        is_stderr: bool,
    },

    /// Final tool result.
    ToolExecutionCompleted {
        id: String,
        name: String,
        output: Value,
        #[serde(default)]
        is_error: bool,
    },

    /// The model finished its message.
    MessageStop,

    /// Stream-level error. The stream may keep producing events.
    Error { message: String },
}

impl StreamEvent {
    /// Stable discriminator, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::ToolUseStarted { .. } => "tool_use_started",
            Self::ToolUseStopped { .. } => "tool_use_stopped",
            Self::ToolExecutionStarted { .. } => "tool_execution_started",
            Self::ToolExecutionOutput { .. } => "tool_execution_output",
            Self::ToolExecutionCompleted { .. } => "tool_execution_completed",
            Self::MessageStop => "message_stop",
            Self::Error { .. } => "error",
        }
    }
}
