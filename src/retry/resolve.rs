//! Marking pending operations finished

use crate::error::Result;
use crate::store::OperationStore;
use crate::types::identifiers::{AgentId, OperationId};
use crate::types::operations::OperationStatus;

/// Which pending operation a terminal result refers to
#[derive(Debug, Clone, Copy)]
pub(crate) enum OperationMatch<'a> {
    /// Echoed operation ID
    Id(&'a OperationId),
    /// Oldest pending row of the agent with one of `kinds`. A domain only
    /// narrows the match when both sides carry one.
    Kind {
        kinds: &'a [&'a str],
        domain: Option<&'a str>,
    },
}

/// Set the status of the pending operation `target` refers to.
///
/// Rows that are unknown or already finished are left alone. Returns the ID
/// of the row that changed.
pub(crate) async fn resolve_operation(
    store: &dyn OperationStore,
    agent_id: &AgentId,
    target: OperationMatch<'_>,
    status: OperationStatus,
) -> Result<Option<OperationId>> {
    let operation = match target {
        OperationMatch::Id(id) => {
            let Some(operation) = store.get_operation(id).await? else {
                log::debug!("Agent {agent_id} reported unknown operation {id}");
                return Ok(None);
            };
            operation
        }
        OperationMatch::Kind { kinds, domain } => {
            let pending = store.list_pending(Some(agent_id)).await?;
            let matched = pending.into_iter().find(|operation| {
                let domain_matches = match (domain, operation.domain.as_deref()) {
                    (Some(reported), Some(tracked)) => reported == tracked,
                    _ => true,
                };
                kinds.contains(&operation.operation_type.as_str()) && domain_matches
            });
            let Some(operation) = matched else {
                return Ok(None);
            };
            operation
        }
    };

    if !operation.is_pending() {
        return Ok(None);
    }
    store.set_status(&operation.id, status).await?;
    log::info!(
        "Operation {} ({}) marked {status:?}",
        operation.id,
        operation.operation_type
    );
    Ok(Some(operation.id))
}
