//! Out-of-band tag commands.
//!
//! Commands such as "toggle the buzzer" travel over a separate channel (a
//! message broker in production). The tracker only hands them to a
//! [`CommandDispatcher`] and never waits for an acknowledgement.

use serde::Serialize;
use tokio::sync::mpsc;

/// Action a tag can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagAction {
    ToggleBuzzer,
}

impl TagAction {
    /// Payload understood by the tag firmware.
    pub fn payload(&self) -> &'static str {
        match self {
            TagAction::ToggleBuzzer => "TOGGLE_BUZZER",
        }
    }
}

/// A command addressed to one tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCommand {
    pub tag_id: String,
    pub action: TagAction,
}

impl TagCommand {
    pub fn toggle_buzzer(tag_id: impl Into<String>) -> Self {
        Self {
            tag_id: tag_id.into(),
            action: TagAction::ToggleBuzzer,
        }
    }

    /// Topic the command is published on.
    pub fn topic(&self) -> String {
        format!("tags/{}/command", self.tag_id)
    }
}

/// Fire-and-forget command sink.
pub trait CommandDispatcher: Send + Sync {
    /// Hand a command to the transport. Success means "accepted for delivery",
    /// not "executed by the tag".
    fn dispatch(&self, command: &TagCommand) -> Result<(), CommandError>;
}

/// Dispatcher that only logs. Used when no transport is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDispatcher;

impl CommandDispatcher for LoggingDispatcher {
    fn dispatch(&self, command: &TagCommand) -> Result<(), CommandError> {
        tracing::info!(
            topic = %command.topic(),
            payload = command.action.payload(),
            "Tag command dispatched (no transport configured)"
        );
        Ok(())
    }
}

/// Dispatcher that forwards commands into a channel drained by a transport bridge.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<TagCommand>,
}

impl ChannelDispatcher {
    /// Create a dispatcher and the receiver the bridge should drain.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TagCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl CommandDispatcher for ChannelDispatcher {
    fn dispatch(&self, command: &TagCommand) -> Result<(), CommandError> {
        self.tx
            .send(command.clone())
            .map_err(|_| CommandError::Unavailable("command bridge is not running".to_string()))?;
        tracing::debug!(topic = %command.topic(), "Tag command queued");
        Ok(())
    }
}

/// Command dispatch errors.
#[derive(Debug)]
pub enum CommandError {
    /// The transport cannot take commands right now
    Unavailable(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Unavailable(e) => write!(f, "Command transport unavailable: {e}"),
        }
    }
}

impl std::error::Error for CommandError {}
