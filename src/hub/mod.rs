//! Agent hub: composition root of the gateway core
//!
//! [`AgentHub`] builds and owns one of each component and wires them together:
//!
//! - [`EventBus`] carrying [`AgentEvent`]s to the business layer
//! - [`TelemeterQueue`] with the built-in batch consumers registered
//! - [`CommandQueue`] over the shared [`FleetRegistry`]
//! - [`Gateway`] for the socket layer
//! - [`RetryCoordinator`], already listening for connects
//!
//! [`AgentHub::start`] spawns the four processing loops, each with its own
//! circuit breaker; [`AgentHub::shutdown`] stops them.

mod background;
mod breaker;
mod bus;
mod consumers;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::auth::Authenticator;
use crate::dispatch::CommandQueue;
use crate::error::Result;
use crate::gateway::Gateway;
use crate::registry::FleetRegistry;
use crate::retry::{OperationCatalog, RetryCoordinator};
use crate::store::OperationStore;
use crate::telemetry::TelemeterQueue;
use crate::types::commands::{CommandPayload, OutboundCommand};
use crate::types::events::AgentEvent;
use crate::types::identifiers::{AgentId, CommandId, OperationId};
use crate::types::operations::PendingOperation;
use crate::types::options::GatewayOptions;
use crate::types::session::AgentSessionInfo;
use crate::types::stats::GatewayStats;

pub use breaker::{BreakerState, CircuitBreaker};
pub use bus::EventBus;

use background::spawn_loop;

/// Fully wired gateway core
pub struct AgentHub {
    options: GatewayOptions,
    store: Arc<dyn OperationStore>,
    bus: EventBus,
    telemeter: Arc<TelemeterQueue>,
    queue: Arc<CommandQueue>,
    gateway: Arc<Gateway>,
    retry: Arc<RetryCoordinator>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl AgentHub {
    /// Build a hub with the built-in operation catalog
    ///
    /// # Errors
    /// Returns error if `options` fail validation or the command journal
    /// cannot be read
    pub async fn new(
        options: GatewayOptions,
        auth: Arc<dyn Authenticator>,
        store: Arc<dyn OperationStore>,
    ) -> Result<Arc<Self>> {
        Self::with_catalog(options, auth, store, OperationCatalog::new()).await
    }

    /// Build a hub with a custom operation catalog
    ///
    /// Journalled commands are restored into the backlogs before this returns.
    /// Must be called inside a Tokio runtime: the retry coordinator starts
    /// listening for connects immediately.
    ///
    /// # Errors
    /// Same as [`new`](Self::new)
    pub async fn with_catalog(
        options: GatewayOptions,
        auth: Arc<dyn Authenticator>,
        store: Arc<dyn OperationStore>,
        catalog: OperationCatalog,
    ) -> Result<Arc<Self>> {
        options.validate()?;

        let bus = EventBus::new(options.event_capacity);
        let registry = Arc::new(FleetRegistry::new());
        let telemeter = Arc::new(TelemeterQueue::new(
            options.inbound_batch_size,
            options.inbound_interval,
            options.dedup_window,
        ));
        let queue = Arc::new(CommandQueue::new(
            registry,
            Arc::clone(&store),
            bus.clone(),
            options.command_timeout,
            options
                .reconnect_implies_update_success
                .then_some(options.update_confirm_window),
            options.stats_agent_limit,
        ));
        queue.restore().await?;

        consumers::register(&telemeter, Arc::clone(&queue), Arc::clone(&store), bus.clone());

        let gateway = Arc::new(Gateway::new(
            auth,
            Arc::clone(&queue),
            Arc::clone(&telemeter),
            Arc::clone(&store),
            bus.clone(),
            options.reconnect_implies_update_success,
        ));

        let cancel = CancellationToken::new();
        let retry = Arc::new(RetryCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            catalog,
        ));
        let listener = retry.listen(&bus, cancel.child_token());

        Ok(Arc::new(Self {
            options,
            store,
            bus,
            telemeter,
            queue,
            gateway,
            retry,
            cancel,
            tasks: Mutex::new(vec![listener]),
            started: AtomicBool::new(false),
        }))
    }

    /// Spawn the processing loops. Calling it again is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let options = &self.options;
        let breaker = |name: &'static str| {
            CircuitBreaker::new(name, options.breaker_threshold, options.breaker_cooldown)
        };
        let mut handles = Vec::with_capacity(4);

        let telemeter = Arc::clone(&self.telemeter);
        handles.push(spawn_loop(
            "inbound",
            options.inbound_interval,
            breaker("inbound"),
            self.cancel.child_token(),
            move || {
                let telemeter = Arc::clone(&telemeter);
                async move { telemeter.tick().await }
            },
        ));

        let queue = Arc::clone(&self.queue);
        handles.push(spawn_loop(
            "dispatch",
            options.dispatch_interval,
            breaker("dispatch"),
            self.cancel.child_token(),
            move || {
                let queue = Arc::clone(&queue);
                async move { queue.dispatch_tick().await }
            },
        ));

        let queue = Arc::clone(&self.queue);
        handles.push(spawn_loop(
            "timeout",
            options.timeout_sweep_interval,
            breaker("timeout"),
            self.cancel.child_token(),
            move || {
                let queue = Arc::clone(&queue);
                async move { queue.timeout_sweep().await }
            },
        ));

        let retry = Arc::clone(&self.retry);
        handles.push(spawn_loop(
            "retry",
            options.retry_sweep_interval,
            breaker("retry"),
            self.cancel.child_token(),
            move || {
                let retry = Arc::clone(&retry);
                async move { retry.check_pending_operations().await }
            },
        ));

        self.tasks.lock().extend(handles);
        log::info!("Agent hub started");
    }

    /// Stop every loop and the retry listener and wait for them to finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                log::warn!("Background task ended abnormally: {e}");
            }
        }
        log::info!("Agent hub stopped");
    }

    // ========================================================================
    // Business API
    // ========================================================================

    /// Queue a command for an agent. Delivery is reported through events only.
    pub async fn enqueue_command(
        &self,
        agent_id: AgentId,
        payload: CommandPayload,
        priority: i32,
    ) -> CommandId {
        self.queue.enqueue(agent_id, payload, priority).await
    }

    /// Queue a prepared command
    pub async fn enqueue(&self, command: OutboundCommand) -> CommandId {
        self.queue.enqueue_command(command).await
    }

    /// Free an agent from its in-flight command
    pub async fn mark_agent_available(&self, agent_id: &AgentId) -> bool {
        self.queue.mark_agent_available(agent_id).await
    }

    /// Persist a durable operation and dispatch it if its agent is online
    ///
    /// # Errors
    /// Returns error if the operation row cannot be created
    pub async fn track_operation(&self, operation: PendingOperation) -> Result<OperationId> {
        self.retry.track(operation).await
    }

    /// Current statistics of both queues
    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            inbound: self.telemeter.stats(),
            outbound: self.queue.stats(),
        }
    }

    /// Session snapshot of one agent
    #[must_use]
    pub fn session(&self, agent_id: &AgentId) -> Option<AgentSessionInfo> {
        self.registry().session(agent_id, Instant::now())
    }

    /// Session snapshots of every known agent
    #[must_use]
    pub fn sessions(&self) -> Vec<AgentSessionInfo> {
        self.registry().sessions(Instant::now())
    }

    /// Receive every event emitted from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.bus.subscribe()
    }

    /// Events as a stream. A receiver that falls behind skips ahead with a warning.
    pub fn events(&self) -> impl Stream<Item = AgentEvent> + Send + 'static {
        let mut rx = self.bus.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Event stream lagged, {skipped} events skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    // ========================================================================
    // Components
    // ========================================================================

    /// Connection-facing gateway
    #[must_use]
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Outbound command queue
    #[must_use]
    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// Inbound telemeter queue
    #[must_use]
    pub fn telemeter(&self) -> &Arc<TelemeterQueue> {
        &self.telemeter
    }

    /// Retry coordinator
    #[must_use]
    pub fn retry(&self) -> &Arc<RetryCoordinator> {
        &self.retry
    }

    /// Shared agent registry
    #[must_use]
    pub fn registry(&self) -> &Arc<FleetRegistry> {
        self.queue.registry()
    }

    /// Persistence collaborator
    #[must_use]
    pub fn store(&self) -> &Arc<dyn OperationStore> {
        &self.store
    }

    /// Options the hub was built with
    #[must_use]
    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// Event bus
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}
