use std::sync::Arc;

use chrono::{Duration, Utc};
use courier_types::headers;
use courier_types::message::OutgoingMessage;
use courier_types::routing::RoutingStrategy;
use courier_types::timeout::TimeoutData;
use courier_types::transport::{TransportOperation, TransportOperations};
use courier_types::wire::from_wire_format;
use tracing::debug;
use uuid::Uuid;

use super::poller::ExpiredTimeoutsPoller;
use super::storage::BoxTimeoutStorage;
use crate::pipeline::{
    MessageContext, ProcessingError, ProcessingOutcome, StageResult, Terminator, TransportReceiveContext,
};
use crate::transport::BoxDispatcher;

/// Messages due within this many seconds are sent on without touching storage.
const DISPATCH_IMMEDIATELY_WITHIN_SECS: i64 = 1;

/// Terminates the storage satellite: persists deferred messages until due.
pub struct StoreTimeoutTerminator {
    dispatcher: BoxDispatcher,
    storage: BoxTimeoutStorage,
    poller: Arc<ExpiredTimeoutsPoller>,
    owning_timeout_manager: String,
}

impl StoreTimeoutTerminator {
    pub fn new(
        dispatcher: BoxDispatcher,
        storage: BoxTimeoutStorage,
        poller: Arc<ExpiredTimeoutsPoller>,
        owning_timeout_manager: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            storage,
            poller,
            owning_timeout_manager: owning_timeout_manager.into(),
        }
    }
}

fn invalid(context: &TransportReceiveContext, reason: impl Into<String>) -> ProcessingError {
    ProcessingError::InvalidMessage {
        message_id: context.message_id().to_string(),
        reason: reason.into(),
    }
}

impl Terminator for StoreTimeoutTerminator {
    type Context = TransportReceiveContext;

    async fn terminate(&self, context: &mut TransportReceiveContext) -> StageResult {
        let expire = context
            .message()
            .header(headers::TIMEOUT_EXPIRE)
            .ok_or_else(|| invalid(context, "Non timeout message arrived at the timeout manager"))?;
        let due = from_wire_format(expire)
            .map_err(|e| invalid(context, format!("invalid timeout expiry '{expire}': {e}")))?;

        let message = context.message();
        let destination = message
            .header(headers::TIMEOUT_ROUTE_EXPIRED_TO)
            .or_else(|| message.reply_to_address())
            .ok_or_else(|| invalid(context, "deferred message has no destination"))?
            .to_string();

        if due <= Utc::now() + Duration::seconds(DISPATCH_IMMEDIATELY_WITHIN_SECS) {
            debug!(
                message_id = %message.message_id,
                %destination,
                "timeout already due, dispatching directly"
            );
            let outgoing = OutgoingMessage::from_incoming(message);
            let operation = TransportOperation::new(outgoing, RoutingStrategy::unicast(destination));
            self.dispatcher
                .dispatch(TransportOperations::new([operation]), &context.extensions)
                .await?;
            return Ok(ProcessingOutcome::Completed);
        }

        let timeout = TimeoutData {
            id: Uuid::now_v7().to_string(),
            destination,
            state: message.body.clone(),
            time: due,
            headers: message.headers.clone(),
            owning_timeout_manager: self.owning_timeout_manager.clone(),
        };
        debug!(
            message_id = %message.message_id,
            timeout_id = %timeout.id,
            due = %due,
            "storing timeout"
        );
        self.storage.add(timeout, &context.extensions).await?;
        self.poller.new_timeout_registered(due);
        Ok(ProcessingOutcome::Completed)
    }
}
