//! Stdin-backed approval prompting.

use std::io::{BufRead, Write};

use agent_core::{ApprovalError, ApprovalPrompt};
use async_trait::async_trait;

/// Presents approval requests on the terminal and blocks for a reply.
///
/// Concurrent requests from parallel tool calls are serialized through an
/// internal mutex, so the user only ever sees one pending question. The wait
/// may last indefinitely; the engine never holds an execution slot while a
/// prompt is outstanding.
pub struct StdinPrompt {
    serial: tokio::sync::Mutex<()>,
}

impl StdinPrompt {
    pub fn new() -> Self {
        Self {
            serial: tokio::sync::Mutex::new(()),
        }
    }
}

impl Default for StdinPrompt {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApprovalPrompt for StdinPrompt {
    async fn request_approval(&self, rendered: &str) -> Result<String, ApprovalError> {
        let _guard = self.serial.lock().await;
        let rendered = rendered.to_string();

        tokio::task::spawn_blocking(move || {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(rendered.as_bytes())
                .and_then(|()| stdout.flush())
                .map_err(|error| ApprovalError::Io(error.to_string()))?;

            let mut line = String::new();
            let read = std::io::stdin()
                .lock()
                .read_line(&mut line)
                .map_err(|error| ApprovalError::Io(error.to_string()))?;
            if read == 0 {
                return Err(ApprovalError::PromptClosed);
            }
            Ok(line)
        })
        .await
        .map_err(|error| ApprovalError::Io(format!("prompt task failed: {error}")))?
    }
}
