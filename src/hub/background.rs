//! Background task spawning for the processing loops
//!
//! Every periodic job of the hub (inbound batches, dispatch, timeout sweep,
//! retry sweep) runs through [`spawn_loop`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::breaker::CircuitBreaker;
use crate::error::Result;

/// Spawn a loop running `tick` every `period` until `cancel` fires
///
/// The task:
/// - skips missed ticks instead of bursting to catch up
/// - catches errors and panics at the tick boundary; neither ends the loop
/// - counts both as failures for `breaker` and skips ticks while it is open
///
/// # Arguments
/// * `name` - loop name used in logs
/// * `period` - tick interval
/// * `breaker` - the loop's circuit breaker (moved into the task)
/// * `cancel` - stops the loop
/// * `tick` - produces one tick's work
pub(crate) fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut breaker: CircuitBreaker,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<usize>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        log::debug!("{name} loop started, every {period:?}");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if !breaker.can_execute() {
                continue;
            }

            match AssertUnwindSafe(tick()).catch_unwind().await {
                Ok(Ok(_)) => breaker.record_success(),
                Ok(Err(e)) => {
                    log::error!("{name} tick failed: {e}");
                    breaker.record_failure();
                }
                Err(_) => {
                    log::error!("{name} tick panicked");
                    breaker.record_failure();
                }
            }
        }

        log::debug!("{name} loop stopped");
    })
}
