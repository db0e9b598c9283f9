//! Transport definitions and the infrastructure they produce.

use courier_types::config::EndpointConfig;
use courier_types::error::ConfigurationError;
use courier_types::routing::{EndpointInstance, LogicalAddress};
use courier_types::transport::{StartupCheckResult, TransportCapabilities, TransportTransactionMode};
use tracing::{debug, info};

use super::dispatch::BoxDispatcher;
use super::pump::BoxMessagePump;
use super::queue::BoxQueueCreator;
use super::subscription::BoxSubscriptionManager;
use crate::pipeline::BoxFuture;

/// Async check a transport runs before the endpoint starts.
pub type PreStartupCheck = Box<dyn Fn() -> BoxFuture<'static, StartupCheckResult> + Send + Sync>;

fn always_succeeds() -> PreStartupCheck {
    Box::new(|| -> BoxFuture<'static, StartupCheckResult> {
        Box::pin(async { StartupCheckResult::Success })
    })
}

/// A queueing technology plugged into an endpoint.
///
/// Address translation is synchronous and pure: the same logical address
/// always maps to the same transport address.
pub trait TransportDefinition: Send + Sync {
    fn name(&self) -> &str;

    /// Adjust the local instance, e.g. to attach the host machine.
    fn bind_to_local_endpoint(&self, instance: EndpointInstance, _config: &EndpointConfig) -> EndpointInstance {
        instance
    }

    fn to_transport_address(&self, address: &LogicalAddress) -> String;

    /// Normalize an address so that equivalent addresses compare equal.
    fn make_canonical_form(&self, address: &str) -> String {
        address.to_string()
    }

    /// Declare capabilities and hand back infrastructure factories.
    fn initialize(&self, config: &EndpointConfig) -> Result<TransportInfrastructure, ConfigurationError>;
}

/// Factories for the outgoing side.
pub struct SendInfrastructure {
    pub dispatcher_factory: Box<dyn Fn() -> BoxDispatcher + Send + Sync>,
    pub pre_startup_check: PreStartupCheck,
}

impl SendInfrastructure {
    pub fn new(dispatcher_factory: impl Fn() -> BoxDispatcher + Send + Sync + 'static) -> Self {
        Self {
            dispatcher_factory: Box::new(dispatcher_factory),
            pre_startup_check: always_succeeds(),
        }
    }

    pub fn with_pre_startup_check(mut self, check: PreStartupCheck) -> Self {
        self.pre_startup_check = check;
        self
    }
}

/// Factories for the receiving side.
pub struct ReceiveInfrastructure {
    pub message_pump_factory: Box<dyn Fn() -> BoxMessagePump + Send + Sync>,
    pub queue_creator_factory: Box<dyn Fn() -> BoxQueueCreator + Send + Sync>,
    pub pre_startup_check: PreStartupCheck,
}

impl ReceiveInfrastructure {
    pub fn new(
        message_pump_factory: impl Fn() -> BoxMessagePump + Send + Sync + 'static,
        queue_creator_factory: impl Fn() -> BoxQueueCreator + Send + Sync + 'static,
    ) -> Self {
        Self {
            message_pump_factory: Box::new(message_pump_factory),
            queue_creator_factory: Box::new(queue_creator_factory),
            pre_startup_check: always_succeeds(),
        }
    }

    pub fn with_pre_startup_check(mut self, check: PreStartupCheck) -> Self {
        self.pre_startup_check = check;
        self
    }
}

type SendFactory = Box<dyn Fn(Option<&str>) -> SendInfrastructure + Send + Sync>;
type ReceiveFactory = Box<dyn Fn(Option<&str>) -> ReceiveInfrastructure + Send + Sync>;
type SubscriptionFactory = Box<dyn Fn() -> BoxSubscriptionManager + Send + Sync>;

/// What an initialized transport provides to the endpoint.
pub struct TransportInfrastructure {
    pub capabilities: TransportCapabilities,
    send: SendFactory,
    receive: Option<ReceiveFactory>,
    subscriptions: Option<SubscriptionFactory>,
}

impl TransportInfrastructure {
    pub fn new(
        capabilities: TransportCapabilities,
        send: impl Fn(Option<&str>) -> SendInfrastructure + Send + Sync + 'static,
    ) -> Self {
        Self {
            capabilities,
            send: Box::new(send),
            receive: None,
            subscriptions: None,
        }
    }

    pub fn with_receive(
        mut self,
        receive: impl Fn(Option<&str>) -> ReceiveInfrastructure + Send + Sync + 'static,
    ) -> Self {
        self.receive = Some(Box::new(receive));
        self
    }

    pub fn with_subscriptions(
        mut self,
        subscriptions: impl Fn() -> BoxSubscriptionManager + Send + Sync + 'static,
    ) -> Self {
        self.subscriptions = Some(Box::new(subscriptions));
        self
    }

    pub fn configure_send_infrastructure(&self, connection_string: Option<&str>) -> SendInfrastructure {
        (self.send)(connection_string)
    }

    /// `None` if the transport cannot receive.
    pub fn configure_receive_infrastructure(
        &self,
        connection_string: Option<&str>,
    ) -> Option<ReceiveInfrastructure> {
        self.receive.as_ref().map(|factory| factory(connection_string))
    }

    /// `None` if the transport has no native publish/subscribe.
    pub fn configure_subscription_infrastructure(&self) -> Option<BoxSubscriptionManager> {
        self.subscriptions.as_ref().map(|factory| factory())
    }

    /// Resolve the transaction mode the endpoint will run in.
    pub fn required_transaction_mode(
        &self,
        requested: Option<TransportTransactionMode>,
    ) -> Result<TransportTransactionMode, ConfigurationError> {
        negotiate_transaction_mode(self.capabilities.transaction_mode, requested)
    }
}

/// Pick the transaction mode given what the transport supports.
///
/// With no request the transport's maximum is used. A request above the
/// maximum is a configuration error; anything at or below it is honoured.
pub fn negotiate_transaction_mode(
    supported: TransportTransactionMode,
    requested: Option<TransportTransactionMode>,
) -> Result<TransportTransactionMode, ConfigurationError> {
    match requested {
        None => {
            debug!(mode = %supported, "using the transport's default transaction mode");
            Ok(supported)
        }
        Some(requested) if requested > supported => {
            Err(ConfigurationError::UnsupportedTransactionMode {
                requested,
                supported,
            })
        }
        Some(requested) => {
            info!(mode = %requested, %supported, "transaction mode negotiated");
            Ok(requested)
        }
    }
}

/// Run a pre-startup check, turning a failure into a configuration error.
pub async fn run_pre_startup_check(check: &PreStartupCheck) -> Result<(), ConfigurationError> {
    match check().await {
        StartupCheckResult::Success => Ok(()),
        StartupCheckResult::Failed(reason) => Err(ConfigurationError::PreStartupCheckFailed(reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransportTransactionMode as Mode;

    #[test]
    fn no_request_uses_transport_maximum() {
        assert_eq!(negotiate_transaction_mode(Mode::ReceiveOnly, None).unwrap(), Mode::ReceiveOnly);
    }

    #[test]
    fn request_at_or_below_maximum_is_honoured() {
        assert_eq!(
            negotiate_transaction_mode(Mode::TransactionScope, Some(Mode::ReceiveOnly)).unwrap(),
            Mode::ReceiveOnly
        );
        assert_eq!(
            negotiate_transaction_mode(Mode::SendsAtomicWithReceive, Some(Mode::SendsAtomicWithReceive))
                .unwrap(),
            Mode::SendsAtomicWithReceive
        );
        assert_eq!(negotiate_transaction_mode(Mode::ReceiveOnly, Some(Mode::None)).unwrap(),
            Mode::None);
    }

    #[test]
    fn request_above_maximum_fails() {
        let err = negotiate_transaction_mode(Mode::ReceiveOnly, Some(Mode::TransactionScope)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Requested transaction mode `TransactionScope` can't be satisfied since the transport only supports `ReceiveOnly`"
        );
    }

    #[tokio::test]
    async fn failed_pre_startup_check_is_reported() {
        let check: PreStartupCheck = Box::new(|| -> BoxFuture<'static, StartupCheckResult> {
            Box::pin(async { StartupCheckResult::failed("broker unreachable") })
        });
        let err = run_pre_startup_check(&check).await.unwrap_err();
        assert_eq!(err.to_string(), "Pre start-up check failed: broker unreachable");

        assert!(run_pre_startup_check(&always_succeeds()).await.is_ok());
    }
}
