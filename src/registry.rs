//! Fleet registry: one slot per agent identity
//!
//! Every piece of per-agent mutable state lives here behind one coarse lock:
//! the live link, the priority-ordered backlog, the in-flight command, and the
//! bookkeeping of self-updates whose outcome is inferred from a reconnect. All mutation funnels through the
//! methods below and the lock is never held across an `.await`.
//!
//! Busy is not stored as a flag: an agent is busy exactly when its slot holds
//! an in-flight command.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{GatewayError, Result};
use crate::transport::AgentLink;
use crate::types::commands::{CommandStatus, OutboundCommand};
use crate::types::identifiers::{AgentId, CommandId, ConnectionId, OperationId};
use crate::types::session::{AgentSessionInfo, SessionState};
use crate::types::stats::{AgentQueueStats, OutboundStats};

/// Command currently dispatched to an agent
#[derive(Debug, Clone)]
struct InFlight {
    command: OutboundCommand,
    started: Instant,
}

/// Self-update that timed out; a reconnect before `deadline` confirms it
#[derive(Debug, Clone)]
struct Unconfirmed {
    command: OutboundCommand,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct AgentSlot {
    link: Option<AgentLink>,
    backlog: VecDeque<OutboundCommand>,
    current: Option<InFlight>,
    update_unconfirmed: Option<Unconfirmed>,
    /// Self-update already confirmed by a reconnect, kept until the next dispatch
    update_confirmed: Option<OutboundCommand>,
    connected_at: Option<DateTime<Utc>>,
    disconnected_at: Option<DateTime<Utc>>,
}

impl AgentSlot {
    fn state(&self) -> SessionState {
        match (&self.link, &self.current) {
            (Some(_), Some(_)) => SessionState::Busy,
            (Some(_), None) => SessionState::Online,
            (None, _) => SessionState::Disconnected,
        }
    }

    fn running_time(&self, now: Instant) -> Option<Duration> {
        self.current
            .as_ref()
            .map(|in_flight| now.saturating_duration_since(in_flight.started))
    }

    fn unconfirmed(&self, now: Instant) -> Option<&OutboundCommand> {
        self.update_unconfirmed
            .as_ref()
            .filter(|stash| now < stash.deadline)
            .map(|stash| &stash.command)
    }

    /// Insert keeping priority-descending order, FIFO among equal priorities
    fn push(&mut self, command: OutboundCommand) {
        let at = self
            .backlog
            .partition_point(|queued| queued.priority >= command.priority);
        self.backlog.insert(at, command);
    }
}

/// Outcome of attaching a new connection to an agent slot
#[derive(Debug)]
pub struct Attached {
    /// ID of the newly attached connection
    pub connection_id: ConnectionId,
    /// Whether a still-open connection was replaced
    pub replaced: bool,
    /// Command that was in flight when the agent reconnected
    pub in_flight: Option<OutboundCommand>,
    /// Self-update that timed out before the agent came back. It is recorded
    /// as confirmed in the same step.
    pub unconfirmed_update: Option<OutboundCommand>,
}

/// Command freed by the timeout sweep
#[derive(Debug)]
pub struct Expired {
    /// Command as dispatched
    pub command: OutboundCommand,
    /// How long it ran
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct RegistryInner {
    slots: HashMap<AgentId, AgentSlot>,
    connecting: HashSet<AgentId>,
}

/// Shared table of agent slots
#[derive(Debug, Default)]
pub struct FleetRegistry {
    inner: Mutex<RegistryInner>,
}

impl FleetRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Record that an agent is presenting credentials
    pub fn begin_connect(&self, agent_id: &AgentId) {
        self.inner.lock().connecting.insert(agent_id.clone());
    }

    /// Forget a connection attempt that failed authentication
    pub fn abort_connect(&self, agent_id: &AgentId) {
        self.inner.lock().connecting.remove(agent_id);
    }

    /// Attach a verified connection, replacing any previous one.
    ///
    /// The backlog and in-flight command carry over from the previous
    /// connection. A timed-out self-update whose confirmation window is still
    /// open is handed back and recorded as confirmed; an expired one is dropped.
    pub fn attach(&self, agent_id: &AgentId, link: AgentLink) -> Attached {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.connecting.remove(agent_id);
        let slot = inner.slots.entry(agent_id.clone()).or_default();

        let connection_id = link.connection_id();
        let replaced = slot.link.replace(link).is_some_and(|old| !old.is_closed());
        slot.connected_at = Some(Utc::now());

        let unconfirmed_update = slot.unconfirmed(now).cloned();
        if let Some(stale) = slot.update_unconfirmed.take()
            && unconfirmed_update.is_none()
        {
            log::debug!(
                "Confirmation window of {} ({}) on agent {agent_id} has passed",
                stale.command.kind(),
                stale.command.id
            );
        }
        if let Some(command) = &unconfirmed_update {
            slot.update_confirmed = Some(command.clone());
        }

        Attached {
            connection_id,
            replaced,
            in_flight: slot.current.as_ref().map(|f| f.command.clone()),
            unconfirmed_update,
        }
    }

    /// Drop the link of `connection_id`.
    ///
    /// Returns `false` when the agent has since attached a newer connection,
    /// in which case nothing changes.
    pub fn detach(&self, agent_id: &AgentId, connection_id: ConnectionId) -> bool {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.get_mut(agent_id) else {
            return false;
        };
        match &slot.link {
            Some(link) if link.connection_id() == connection_id => {
                slot.link = None;
                slot.disconnected_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Lifecycle state of an agent, `None` if the agent was never seen
    #[must_use]
    pub fn state(&self, agent_id: &AgentId) -> Option<SessionState> {
        let inner = self.inner.lock();
        let slot = inner.slots.get(agent_id);
        if let Some(slot) = slot
            && slot.link.is_some()
        {
            return Some(slot.state());
        }
        if inner.connecting.contains(agent_id) {
            return Some(SessionState::Connecting);
        }
        slot.map(AgentSlot::state)
    }

    /// Whether the agent has a live connection
    #[must_use]
    pub fn is_online(&self, agent_id: &AgentId) -> bool {
        self.inner
            .lock()
            .slots
            .get(agent_id)
            .is_some_and(|slot| slot.link.is_some())
    }

    /// Agents with a live connection
    #[must_use]
    pub fn online_agents(&self) -> Vec<AgentId> {
        let inner = self.inner.lock();
        let mut agents: Vec<AgentId> = inner
            .slots
            .iter()
            .filter(|(_, slot)| slot.link.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        agents.sort();
        agents
    }

    /// Write a frame to the agent's live connection
    ///
    /// # Errors
    /// Returns `GatewayError::TransportUnavailable` if the agent has no live
    /// connection or its writer has gone away
    pub fn send(&self, agent_id: &AgentId, frame: String) -> Result<()> {
        let link = self
            .inner
            .lock()
            .slots
            .get(agent_id)
            .and_then(|slot| slot.link.clone())
            .ok_or_else(|| GatewayError::transport_unavailable(agent_id.as_str()))?;
        link.send(frame)
            .map_err(|e| GatewayError::transport_unavailable(format!("{agent_id}: {e}")))
    }

    // ========================================================================
    // Backlog and in-flight command
    // ========================================================================

    /// Add a command to its agent's backlog, returning the new backlog length
    pub fn push_command(&self, command: OutboundCommand) -> usize {
        let mut inner = self.inner.lock();
        let slot = inner.slots.entry(command.agent_id.clone()).or_default();
        slot.push(command);
        slot.backlog.len()
    }

    /// Pop the head command of every connected idle agent and mark it in flight.
    ///
    /// Dispatching ends the self-update bookkeeping of the agent: a stashed or
    /// confirmed update no longer applies once the agent runs something new.
    pub fn begin_dispatch(&self, now: Instant) -> Vec<OutboundCommand> {
        let mut inner = self.inner.lock();
        let mut dispatched = Vec::new();
        for slot in inner.slots.values_mut() {
            if slot.link.is_none() || slot.current.is_some() {
                continue;
            }
            let Some(mut command) = slot.backlog.pop_front() else {
                continue;
            };
            command.status = CommandStatus::Dispatched;
            command.dispatched_at = Some(Utc::now());
            slot.update_unconfirmed = None;
            slot.update_confirmed = None;
            slot.current = Some(InFlight {
                command: command.clone(),
                started: now,
            });
            dispatched.push(command);
        }
        dispatched
    }

    /// Clear the in-flight command, returning it. No-op on an idle agent.
    pub fn release(&self, agent_id: &AgentId) -> Option<OutboundCommand> {
        self.inner
            .lock()
            .slots
            .get_mut(agent_id)
            .and_then(|slot| slot.current.take())
            .map(|in_flight| in_flight.command)
    }

    /// Clear the in-flight command only if it is `command_id`
    pub fn release_if(&self, agent_id: &AgentId, command_id: &CommandId) -> Option<OutboundCommand> {
        let mut inner = self.inner.lock();
        let slot = inner.slots.get_mut(agent_id)?;
        if slot
            .current
            .as_ref()
            .is_some_and(|in_flight| &in_flight.command.id == command_id)
        {
            slot.current.take().map(|in_flight| in_flight.command)
        } else {
            None
        }
    }

    /// Free every agent whose in-flight command has run for at least `timeout`.
    ///
    /// With a `confirm_window`, expired self-update commands are remembered so
    /// a reconnect within that window can confirm them.
    pub fn expire(
        &self,
        timeout: Duration,
        now: Instant,
        confirm_window: Option<Duration>,
    ) -> Vec<Expired> {
        let mut inner = self.inner.lock();
        let mut expired = Vec::new();
        for slot in inner.slots.values_mut() {
            let Some(elapsed) = slot.running_time(now) else {
                continue;
            };
            if elapsed < timeout {
                continue;
            }
            let Some(in_flight) = slot.current.take() else {
                continue;
            };
            let mut command = in_flight.command;
            command.status = CommandStatus::TimedOut;
            if let Some(window) = confirm_window
                && command.payload.is_self_update()
            {
                slot.update_unconfirmed = Some(Unconfirmed {
                    command: command.clone(),
                    deadline: now + window,
                });
            }
            expired.push(Expired { command, elapsed });
        }
        expired
    }

    /// Take the self-update awaiting confirmation, if its window is still open
    pub fn take_unconfirmed_update(&self, agent_id: &AgentId) -> Option<OutboundCommand> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let slot = inner.slots.get_mut(agent_id)?;
        let command = slot.unconfirmed(now).cloned();
        slot.update_unconfirmed = None;
        command
    }

    /// Free the agent from in-flight self-update `command_id` and record it as
    /// confirmed. Returns `None` if `command_id` is not in flight.
    pub fn confirm_in_flight(
        &self,
        agent_id: &AgentId,
        command_id: &CommandId,
    ) -> Option<OutboundCommand> {
        let mut inner = self.inner.lock();
        let slot = inner.slots.get_mut(agent_id)?;
        if !slot
            .current
            .as_ref()
            .is_some_and(|in_flight| &in_flight.command.id == command_id)
        {
            return None;
        }
        let command = slot.current.take()?.command;
        slot.update_confirmed = Some(command.clone());
        Some(command)
    }

    /// Take the self-update already confirmed by a reconnect.
    ///
    /// With a `command_id`, only that command is taken.
    pub fn take_confirmed_update(
        &self,
        agent_id: &AgentId,
        command_id: Option<&CommandId>,
    ) -> Option<OutboundCommand> {
        let mut inner = self.inner.lock();
        let slot = inner.slots.get_mut(agent_id)?;
        let matches = slot
            .update_confirmed
            .as_ref()
            .is_some_and(|command| command_id.is_none_or(|id| &command.id == id));
        if matches {
            slot.update_confirmed.take()
        } else {
            None
        }
    }

    /// The agent's in-flight command
    #[must_use]
    pub fn current_command(&self, agent_id: &AgentId) -> Option<OutboundCommand> {
        self.inner
            .lock()
            .slots
            .get(agent_id)
            .and_then(|slot| slot.current.as_ref().map(|f| f.command.clone()))
    }

    /// Whether a command for `operation_id` is queued, in flight, or a
    /// self-update awaiting or holding reconnect confirmation for the agent
    #[must_use]
    pub fn has_operation(&self, agent_id: &AgentId, operation_id: &OperationId) -> bool {
        let now = Instant::now();
        let inner = self.inner.lock();
        let Some(slot) = inner.slots.get(agent_id) else {
            return false;
        };
        let matches = |command: &OutboundCommand| command.operation_id.as_ref() == Some(operation_id);
        slot.current.as_ref().is_some_and(|f| matches(&f.command))
            || slot.backlog.iter().any(matches)
            || slot.unconfirmed(now).is_some_and(matches)
            || slot.update_confirmed.as_ref().is_some_and(matches)
    }

    /// Number of commands waiting for the agent
    #[must_use]
    pub fn queue_length(&self, agent_id: &AgentId) -> usize {
        self.inner
            .lock()
            .slots
            .get(agent_id)
            .map_or(0, |slot| slot.backlog.len())
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Session snapshot of one agent
    #[must_use]
    pub fn session(&self, agent_id: &AgentId, now: Instant) -> Option<AgentSessionInfo> {
        let state = self.state(agent_id)?;
        let inner = self.inner.lock();
        let info = match inner.slots.get(agent_id) {
            Some(slot) => session_info(agent_id, slot, state, now),
            None => AgentSessionInfo {
                agent_id: agent_id.clone(),
                state,
                queue_length: 0,
                current_command_type: None,
                running_time_ms: None,
                connected_at: None,
                disconnected_at: None,
            },
        };
        Some(info)
    }

    /// Session snapshots of every known agent, sorted by ID
    #[must_use]
    pub fn sessions(&self, now: Instant) -> Vec<AgentSessionInfo> {
        let inner = self.inner.lock();
        let mut sessions: Vec<AgentSessionInfo> = inner
            .slots
            .iter()
            .map(|(id, slot)| {
                let state = if slot.link.is_none() && inner.connecting.contains(id) {
                    SessionState::Connecting
                } else {
                    slot.state()
                };
                session_info(id, slot, state, now)
            })
            .collect();
        sessions.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        sessions
    }

    /// Outbound queue statistics; the per-agent list is capped at `limit`
    #[must_use]
    pub fn outbound_stats(&self, limit: usize, now: Instant) -> OutboundStats {
        let inner = self.inner.lock();
        let mut total_queue_length = 0;
        let mut busy_agents = 0;
        let mut agents = Vec::new();

        for (agent_id, slot) in &inner.slots {
            total_queue_length += slot.backlog.len();
            let is_busy = slot.current.is_some();
            if is_busy {
                busy_agents += 1;
            }
            if is_busy || !slot.backlog.is_empty() {
                agents.push(AgentQueueStats {
                    agent_id: agent_id.clone(),
                    queue_length: slot.backlog.len(),
                    is_busy,
                    current_command_type: slot.current.as_ref().map(|f| f.command.kind().to_string()),
                    running_time_ms: slot.running_time(now).map(duration_ms),
                });
            }
        }

        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents.truncate(limit);

        OutboundStats {
            total_queue_length,
            busy_agents,
            total_agents: inner.slots.len(),
            agents,
        }
    }
}

fn session_info(
    agent_id: &AgentId,
    slot: &AgentSlot,
    state: SessionState,
    now: Instant,
) -> AgentSessionInfo {
    AgentSessionInfo {
        agent_id: agent_id.clone(),
        state,
        queue_length: slot.backlog.len(),
        current_command_type: slot.current.as_ref().map(|f| f.command.kind().to_string()),
        running_time_ms: slot.running_time(now).map(duration_ms),
        connected_at: slot.connected_at,
        disconnected_at: slot.disconnected_at,
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
