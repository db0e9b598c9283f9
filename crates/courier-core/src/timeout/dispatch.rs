use chrono::Utc;
use courier_types::headers;
use courier_types::message::OutgoingMessage;
use courier_types::routing::RoutingStrategy;
use courier_types::transport::{
    DispatchConsistency, TransportOperation, TransportOperations, TransportTransactionMode,
};
use courier_types::wire::to_wire_format;
use tracing::debug;

use super::storage::{BoxTimeoutStorage, TimeoutStorageError};
use crate::pipeline::{
    MessageContext, ProcessingError, ProcessingOutcome, StageResult, Terminator, TransportReceiveContext,
};
use crate::transport::BoxDispatcher;

/// Terminates the dispatch satellite: sends a due timeout to its final
/// destination, then removes it from storage.
pub struct DispatchTimeoutTerminator {
    dispatcher: BoxDispatcher,
    storage: BoxTimeoutStorage,
    consistency: DispatchConsistency,
}

impl DispatchTimeoutTerminator {
    /// The dispatch only joins the receive transaction under
    /// `TransactionScope`, where the storage removal can join it as well.
    pub fn new(
        dispatcher: BoxDispatcher,
        storage: BoxTimeoutStorage,
        transaction_mode: TransportTransactionMode,
    ) -> Self {
        let consistency = if transaction_mode == TransportTransactionMode::TransactionScope {
            DispatchConsistency::Default
        } else {
            DispatchConsistency::Isolated
        };
        Self {
            dispatcher,
            storage,
            consistency,
        }
    }
}

impl Terminator for DispatchTimeoutTerminator {
    type Context = TransportReceiveContext;

    async fn terminate(&self, context: &mut TransportReceiveContext) -> StageResult {
        let timeout_id = context
            .message()
            .header(headers::TIMEOUT_ID_TO_DISPATCH)
            .ok_or_else(|| ProcessingError::InvalidMessage {
                message_id: context.message_id().to_string(),
                reason: "dispatch request carries no timeout id".to_string(),
            })?
            .to_string();

        let Some(timeout) = self.storage.peek(&timeout_id, &context.extensions).await? else {
            debug!(%timeout_id, "timeout no longer in storage, assuming it was already dispatched");
            return Ok(ProcessingOutcome::Completed);
        };

        let mut message_headers = timeout.headers;
        message_headers.remove(headers::TIMEOUT_EXPIRE);
        message_headers.remove(headers::TIMEOUT_ROUTE_EXPIRED_TO);
        message_headers.insert(headers::TIME_SENT.to_string(), to_wire_format(Utc::now()));
        message_headers.insert(headers::RELATED_TO_TIMEOUT_ID.to_string(), timeout.id.clone());
        let message_id = message_headers
            .get(headers::MESSAGE_ID)
            .cloned()
            .unwrap_or_else(|| timeout.id.clone());

        let message = OutgoingMessage::new(message_id, message_headers, timeout.state);
        let operation = TransportOperation::new(message, RoutingStrategy::unicast(&timeout.destination))
            .with_consistency(self.consistency);
        self.dispatcher
            .dispatch(TransportOperations::new([operation]), &context.extensions)
            .await?;

        if !self.storage.try_remove(&timeout_id, &context.extensions).await? {
            return Err(TimeoutStorageError::Other(format!(
                "timeout '{timeout_id}' was removed concurrently while being dispatched"
            ))
            .into());
        }
        debug!(%timeout_id, destination = %timeout.destination, "dispatched due timeout");
        Ok(ProcessingOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use courier_types::message::{Headers, IncomingMessage};
    use courier_types::timeout::TimeoutData;

    use super::*;
    use crate::context::ContextBag;
    use crate::testing::{MapTimeoutStorage, RecordingDispatcher};

    fn stored(id: &str) -> TimeoutData {
        let mut message_headers = BTreeMap::new();
        message_headers.insert(headers::MESSAGE_ID.to_string(), "m-1".to_string());
        message_headers.insert(headers::TIMEOUT_EXPIRE.to_string(), "2024-01-01 00:00:00:000000 Z".to_string());
        message_headers.insert(headers::TIMEOUT_ROUTE_EXPIRED_TO.to_string(), "billing".to_string());
        TimeoutData {
            id: id.to_string(),
            destination: "billing".to_string(),
            state: b"{}".to_vec(),
            time: Utc::now(),
            headers: message_headers,
            owning_timeout_manager: "sales".to_string(),
        }
    }

    fn request(id: &str) -> TransportReceiveContext {
        let mut message_headers = Headers::new();
        message_headers.insert(headers::TIMEOUT_ID_TO_DISPATCH.into(), id.into());
        message_headers.insert(headers::CONTROL_MESSAGE.into(), "true".into());
        TransportReceiveContext::new(
            IncomingMessage::new("r-1", message_headers, Vec::new()),
            &ContextBag::new(),
        )
    }

    fn terminator(
        storage: &Arc<MapTimeoutStorage>,
        dispatcher: &Arc<RecordingDispatcher>,
        mode: TransportTransactionMode,
    ) -> DispatchTimeoutTerminator {
        DispatchTimeoutTerminator::new(
            BoxDispatcher::from_arc(dispatcher.clone()),
            BoxTimeoutStorage::from_arc(storage.clone()),
            mode,
        )
    }

    #[tokio::test]
    async fn due_timeout_is_sent_to_its_destination_and_removed() {
        let storage = Arc::new(MapTimeoutStorage::with([stored("t-1")]));
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let terminator = terminator(&storage, &dispatcher, TransportTransactionMode::ReceiveOnly);

        terminator.terminate(&mut request("t-1")).await.unwrap();

        let sent = dispatcher.unicast();
        assert_eq!(sent.len(), 1);
        let (destination, message, consistency) = &sent[0];
        assert_eq!(destination, "billing");
        assert_eq!(message.message_id, "m-1");
        assert_eq!(*consistency, DispatchConsistency::Isolated);
        assert_eq!(message.header(headers::RELATED_TO_TIMEOUT_ID), Some("t-1"));
        assert!(message.header(headers::TIMEOUT_EXPIRE).is_none());
        assert!(message.header(headers::TIMEOUT_ROUTE_EXPIRED_TO).is_none());
        assert_eq!(storage.len(), 0);
    }

    #[tokio::test]
    async fn transaction_scope_dispatch_joins_the_receive() {
        let storage = Arc::new(MapTimeoutStorage::with([stored("t-1")]));
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let terminator = terminator(&storage, &dispatcher, TransportTransactionMode::TransactionScope);

        terminator.terminate(&mut request("t-1")).await.unwrap();
        assert_eq!(dispatcher.unicast()[0].2, DispatchConsistency::Default);
    }

    #[tokio::test]
    async fn already_dispatched_timeout_is_ignored() {
        let storage = Arc::new(MapTimeoutStorage::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let terminator = terminator(&storage, &dispatcher, TransportTransactionMode::ReceiveOnly);

        let outcome = terminator.terminate(&mut request("t-1")).await.unwrap();
        assert!(outcome.is_completed());
        assert_eq!(dispatcher.batch_count(), 0);
    }
}
