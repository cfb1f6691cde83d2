//! Outbound message delivery through the Messages app.
//!
//! The delivery mechanism is an opaque, possibly slow boundary: one
//! attempt per completion result, outcome recorded either way, no
//! automatic retries (a failed send is visible in the console and can be
//! handled by the operator).

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// AppleScript handed to osascript; receives peer and text as arguments.
const SEND_SCRIPT: &str = r#"
on run {targetPeer, targetMessage}
    tell application "Messages"
        set targetService to 1st account whose service type = iMessage
        set targetBuddy to participant targetPeer of targetService
        send targetMessage to targetBuddy
    end tell
end run
"#;

/// Errors from one delivery attempt.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("failed to launch osascript: {0}")]
    Launch(#[from] std::io::Error),

    #[error("osascript exited with {status}: {stderr}")]
    Delivery { status: String, stderr: String },
}

/// Delivery primitive for a finished reply.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Attempt to deliver `text` to `peer` exactly once.
    async fn deliver(&self, peer: &str, text: &str) -> Result<(), SendError>;
}

/// Sends iMessages by invoking osascript.
#[derive(Debug, Clone, Default)]
pub struct OsaScriptSender;

impl OsaScriptSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageSender for OsaScriptSender {
    async fn deliver(&self, peer: &str, text: &str) -> Result<(), SendError> {
        debug!(peer, chars = text.chars().count(), "delivering reply");

        let output = Command::new("osascript")
            .arg("-e")
            .arg(SEND_SCRIPT)
            .arg(peer)
            .arg(text)
            .output()
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(SendError::Delivery {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
