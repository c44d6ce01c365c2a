//! Timeout sweep for dispatched commands

use tokio::time::Instant;

use super::CommandQueue;
use crate::error::{GatewayError, Result};
use crate::registry::duration_ms;
use crate::types::events::{AgentEvent, CommandTimeout};

impl CommandQueue {
    /// Free every agent whose command has run past the timeout.
    ///
    /// Emits one [`AgentEvent::CommandTimeout`] per freed agent. The command
    /// leaves the in-flight slot in the same step, so running the sweep again
    /// never reports it twice. Returns the number of agents freed.
    ///
    /// # Errors
    /// Currently infallible; see [`dispatch_tick`](Self::dispatch_tick)
    pub async fn timeout_sweep(&self) -> Result<usize> {
        let expired = self
            .registry
            .expire(self.command_timeout, Instant::now(), self.update_confirm_window);
        let freed = expired.len();

        for entry in expired {
            let command = entry.command;
            let elapsed_time_ms = duration_ms(entry.elapsed);
            let likely_succeeded = command.payload.is_self_update();
            let error = GatewayError::command_timeout(command.id.as_str(), elapsed_time_ms);

            if likely_succeeded {
                log::info!(
                    "Self-update {} on agent {} went silent: {error}",
                    command.kind(),
                    command.agent_id
                );
            } else {
                log::warn!("Agent {} freed: {error}", command.agent_id);
            }

            self.forget(&command).await;
            self.bus.emit(AgentEvent::CommandTimeout(CommandTimeout {
                agent_id: command.agent_id.clone(),
                original_type: command.kind().to_string(),
                message: error.to_string(),
                original_message: command,
                elapsed_time_ms,
                likely_succeeded,
            }));
        }

        Ok(freed)
    }
}
