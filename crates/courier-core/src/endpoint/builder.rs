use std::error::Error as StdError;
use std::sync::Arc;

use courier_types::config::EndpointConfig;
use courier_types::error::ConfigurationError;
use courier_types::transport::{PushRuntimeSettings, PushSettings};
use tracing::{debug, error, info, warn};

use super::EndpointError;
use super::running::RunningEndpoint;
use super::session::MessageSession;
use super::settings::{EndpointSettings, TimeoutManagerSettings};
use crate::handler::{Handler, HandlerRegistry, Message};
use crate::pipeline::incoming::{DeserializeConnector, InvokeHandlerTerminator, LoadHandlersConnector};
use crate::pipeline::outgoing::{
    DispatchTerminator, FaultToRoutingConnector, PhysicalToRoutingConnector, RESOLVE_ROUTING_STEP,
    ResolveRoutingBehavior, SerializeConnector,
};
use crate::pipeline::{
    MessageOperations, Pipeline, PipelineCache, PipelineModifications, StepRegistration,
    TransportReceiveContext,
};
use crate::recoverability::{
    BusNotifications, CriticalError, FIRST_LEVEL_RETRIES_STEP, FailureCounter, FailureStorageCleaner,
    FirstLevelRetriesBehavior, MOVE_FAULTS_STEP, MoveFaultsToErrorQueueBehavior, RetryPolicy,
};
use crate::routing::{RoutingResolver, SubscriberLookup, UnicastRoutingTable};
use crate::serialization::{JsonMessageSerializer, MessageSerializer};
use crate::timeout::{
    BoxTimeoutStorage, DISPATCH_SATELLITE, DispatchTimeoutTerminator, ExpiredTimeoutsPoller,
    ROUTE_DEFERRED_STEP, RepeatedFailuresOverTimeCircuitBreaker, RouteDeferredMessageToTimeoutManagerBehavior,
    STORAGE_SATELLITE, StoreTimeoutTerminator, TIMEOUT_RECOVERABILITY_STEP, TimeoutRecoverabilityBehavior,
    TimeoutStorage,
};
use crate::transport::{
    BoxDispatcher, QueueBindings, ReceiveInfrastructure, TransportDefinition, pipeline_entry,
    run_pre_startup_check,
};

/// Name of the endpoint's main pipeline.
pub const MAIN_PIPELINE: &str = "Main";

/// Name of the circuit breaker guarding timeout storage queries.
const TIMEOUT_STORAGE_BREAKER: &str = "TimeoutStorageConnectivity";

/// A receive pipeline bound to one input queue.
struct Receiver {
    input_queue: String,
    pipeline: Arc<Pipeline<TransportReceiveContext>>,
    concurrency: PushRuntimeSettings,
    purge_on_startup: bool,
}

/// Collects everything an endpoint needs before it starts.
pub struct EndpointConfiguration {
    config: EndpointConfig,
    transport: Arc<dyn TransportDefinition>,
    serializer: Arc<dyn MessageSerializer>,
    handlers: HandlerRegistry,
    pipeline: PipelineModifications,
    timeout_storage: Option<BoxTimeoutStorage>,
    subscribers: Option<Arc<dyn SubscriberLookup>>,
    critical_error: CriticalError,
    notifications: BusNotifications,
}

impl EndpointConfiguration {
    pub fn new(config: EndpointConfig, transport: impl TransportDefinition + 'static) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            serializer: Arc::new(JsonMessageSerializer),
            handlers: HandlerRegistry::new(),
            pipeline: PipelineModifications::new(MAIN_PIPELINE),
            timeout_storage: None,
            subscribers: None,
            critical_error: CriticalError::default(),
            notifications: BusNotifications::default(),
        }
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn use_serializer(&mut self, serializer: impl MessageSerializer + 'static) -> &mut Self {
        self.serializer = Arc::new(serializer);
        self
    }

    pub fn register_handler<M: Message, H: Handler<M> + 'static>(&mut self, handler: H) -> &mut Self {
        self.handlers.register::<M, H>(handler);
        self
    }

    /// Custom steps for the main pipeline. They run inside the built-in
    /// recoverability and routing steps unless ordered otherwise.
    pub fn pipeline_mut(&mut self) -> &mut PipelineModifications {
        &mut self.pipeline
    }

    pub fn use_timeout_storage(&mut self, storage: impl TimeoutStorage + 'static) -> &mut Self {
        self.timeout_storage = Some(BoxTimeoutStorage::new(storage));
        self
    }

    /// Subscriber source for publishing over transports without native multicast.
    pub fn use_subscriber_lookup(&mut self, lookup: impl SubscriberLookup + 'static) -> &mut Self {
        self.subscribers = Some(Arc::new(lookup));
        self
    }

    pub fn define_critical_error_action(
        &mut self,
        action: impl Fn(&str, &(dyn StdError + Send + Sync + 'static)) + Send + Sync + 'static,
    ) -> &mut Self {
        self.critical_error = CriticalError::new(action);
        self
    }

    /// Recoverability notifications; subscribe before starting to see every event.
    pub fn notifications(&self) -> &BusNotifications {
        &self.notifications
    }

    /// Resolve settings, build the pipelines, and start receiving.
    pub async fn start(self) -> Result<RunningEndpoint, EndpointError> {
        let Self {
            config,
            transport,
            serializer,
            handlers,
            pipeline: user_steps,
            timeout_storage,
            subscribers,
            critical_error,
            notifications,
        } = self;

        info!(endpoint = %config.endpoint_name, transport = transport.name(), "starting endpoint");
        let infrastructure = transport.initialize(&config)?;
        let capabilities = Arc::new(infrastructure.capabilities.clone());
        let settings = EndpointSettings::resolve(&config, transport.as_ref(), &capabilities)?;
        let connection = config.connection_string.as_deref();

        let send = infrastructure.configure_send_infrastructure(connection);
        run_pre_startup_check(&send.pre_startup_check).await?;
        let dispatcher = (send.dispatcher_factory)();

        let receive = if settings.send_only {
            None
        } else {
            Some(
                infrastructure
                    .configure_receive_infrastructure(connection)
                    .ok_or(ConfigurationError::ReceiveNotSupported)?,
            )
        };
        let timeout_storage = match (&settings.timeout_manager, timeout_storage) {
            (Some(_), None) => {
                return Err(ConfigurationError::InvalidSetting {
                    name: "timeout_storage".into(),
                    reason: "the timeout manager needs a timeout storage; register one or disable the timeout manager"
                        .into(),
                }
                .into());
            }
            (_, storage) => storage,
        };

        // Main pipeline: built-in steps first, then user steps.
        let cache = Arc::new(PipelineCache::new());
        let local_address = settings.local_address.clone();
        let mut main = PipelineModifications::new(MAIN_PIPELINE);
        let retry_failures = Arc::new(FailureCounter::new());
        let forwarding_failures = Arc::new(FailureCounter::new());

        if let Some(local) = &local_address {
            main.register(StepRegistration::new(
                MOVE_FAULTS_STEP,
                MoveFaultsToErrorQueueBehavior::new(
                    Arc::clone(&cache),
                    MAIN_PIPELINE,
                    settings.error_queue.clone(),
                    local.clone(),
                    critical_error.clone(),
                    notifications.clone(),
                    Arc::clone(&forwarding_failures),
                ),
                "Moves failing messages to the configured error queue",
            ))?;
            main.register(
                StepRegistration::new(
                    FIRST_LEVEL_RETRIES_STEP,
                    FirstLevelRetriesBehavior::new(
                        Arc::clone(&retry_failures),
                        RetryPolicy::new(settings.max_retries),
                        MAIN_PIPELINE,
                        notifications.clone(),
                    ),
                    "Performs first level retries",
                )
                .insert_after(MOVE_FAULTS_STEP),
            )?;
        }

        let table = UnicastRoutingTable::from_config(&config.routes);
        let mut resolver = RoutingResolver::new(
            &table,
            transport.as_ref(),
            local_address.clone(),
            capabilities.outbound_routing_policy,
        );
        if let Some(lookup) = subscribers {
            resolver = resolver.with_subscribers(lookup);
        }
        main.register(StepRegistration::new(
            RESOLVE_ROUTING_STEP,
            ResolveRoutingBehavior::new(Arc::new(resolver)),
            "Determines how the message being sent should be routed",
        ))?;

        if let Some(address) = &settings.timeout_manager_address {
            main.register(StepRegistration::new(
                ROUTE_DEFERRED_STEP,
                RouteDeferredMessageToTimeoutManagerBehavior::new(address.clone()),
                "Reroutes deferred messages to the timeout manager",
            ))?;
        }
        main.extend(user_steps)?;
        debug!(steps = ?main.resolved_step_ids()?, "main pipeline resolved");

        let routing = Arc::new(main.build(DispatchTerminator::new(dispatcher.clone(), Arc::clone(&capabilities)))?);
        let physical = Arc::new(main.build_connected(PhysicalToRoutingConnector, Arc::clone(&routing))?);
        let outgoing = Arc::new(main.build_connected(
            SerializeConnector::new(Arc::clone(&serializer)),
            Arc::clone(&physical),
        )?);
        let fault = Arc::new(main.build_connected(FaultToRoutingConnector, Arc::clone(&routing))?);
        cache.insert(Arc::clone(&routing));
        cache.insert(physical);
        cache.insert(Arc::clone(&outgoing));
        cache.insert(fault);

        let operations = MessageOperations::new(
            outgoing,
            routing,
            settings.endpoint_name.clone(),
            local_address.clone(),
        );
        let session = MessageSession::new(
            operations.clone(),
            infrastructure.configure_subscription_infrastructure(),
        );
        let mut running = RunningEndpoint::new(
            settings.clone(),
            session,
            notifications,
            critical_error.clone(),
        );

        let (Some(receive), Some(local)) = (receive, local_address) else {
            info!(endpoint = %settings.endpoint_name, "send-only endpoint started");
            return Ok(running);
        };

        let invoke = Arc::new(main.build(InvokeHandlerTerminator)?);
        let incoming = Arc::new(main.build_connected(
            LoadHandlersConnector::new(Arc::new(handlers), operations),
            invoke,
        )?);
        let receive_pipeline = Arc::new(main.build_connected(
            DeserializeConnector::new(serializer, dispatcher.clone()),
            Arc::clone(&incoming),
        )?);
        cache.insert(incoming);
        cache.insert(Arc::clone(&receive_pipeline));

        let concurrency = settings
            .max_concurrency
            .map(PushRuntimeSettings::new)
            .unwrap_or_default();
        let mut receivers = vec![Receiver {
            input_queue: local,
            pipeline: receive_pipeline,
            concurrency,
            purge_on_startup: settings.purge_on_startup,
        }];

        let mut cleaner = FailureStorageCleaner::new(settings.failure_cleanup_interval);
        cleaner.register(retry_failures);
        cleaner.register(forwarding_failures);

        let mut poller = None;
        if let (Some(timeouts), Some(storage)) = (&settings.timeout_manager, timeout_storage) {
            let satellite_failures = Arc::new(FailureCounter::new());
            cleaner.register(Arc::clone(&satellite_failures) as _);
            let (satellites, timeout_poller) = timeout_satellites(
                &settings,
                timeouts,
                storage,
                &dispatcher,
                &critical_error,
                satellite_failures,
            )?;
            receivers.extend(satellites);
            poller = Some(timeout_poller);
        }

        run_pre_startup_check(&receive.pre_startup_check).await?;
        create_queues(&receive, &receivers, &settings).await?;

        let started = start_receivers(&receive, receivers, &settings, &critical_error, &mut running).await;
        if let Err(e) = started {
            error!(endpoint = %settings.endpoint_name, error = %e, "endpoint failed to start, stopping pumps already running");
            if let Err(stop_error) = running.stop().await {
                warn!(endpoint = %settings.endpoint_name, error = %stop_error, "pumps did not stop cleanly after a failed start");
            }
            return Err(e);
        }

        if let Some(poller) = poller {
            running.set_poller(poller.start());
        }
        running.set_cleaner(cleaner.start());
        info!(endpoint = %settings.endpoint_name, "endpoint started");
        Ok(running)
    }
}

/// Create, init and start one pump per receiver, handing each started pump
/// to `running` so that a later failure can stop it.
async fn start_receivers(
    receive: &ReceiveInfrastructure,
    receivers: Vec<Receiver>,
    settings: &EndpointSettings,
    critical_error: &CriticalError,
    running: &mut RunningEndpoint,
) -> Result<(), EndpointError> {
    for receiver in receivers {
        let mut pump = (receive.message_pump_factory)();
        pump.init(
            pipeline_entry(receiver.pipeline),
            critical_error.clone(),
            PushSettings {
                input_queue: receiver.input_queue.clone(),
                error_queue: settings.error_queue.clone(),
                purge_on_startup: receiver.purge_on_startup,
                required_transaction_mode: settings.transaction_mode,
            },
        )
        .await?;
        pump.start(receiver.concurrency)?;
        info!(
            input_queue = %receiver.input_queue,
            max_concurrency = receiver.concurrency.max_concurrency,
            "receiving"
        );
        running.add_pump(receiver.input_queue, pump);
    }
    Ok(())
}

/// Build the storage and dispatch satellites and the poller feeding them.
fn timeout_satellites(
    settings: &EndpointSettings,
    timeouts: &TimeoutManagerSettings,
    storage: BoxTimeoutStorage,
    dispatcher: &BoxDispatcher,
    critical_error: &CriticalError,
    failures: Arc<FailureCounter>,
) -> Result<(Vec<Receiver>, Arc<ExpiredTimeoutsPoller>), ConfigurationError> {
    let critical = critical_error.clone();
    let breaker = RepeatedFailuresOverTimeCircuitBreaker::new(
        TIMEOUT_STORAGE_BREAKER,
        timeouts.critical_error_wait,
        move |e| {
            critical.raise(
                "Repeated failures when fetching timeouts from storage, endpoint will be terminated.",
                e,
            )
        },
    );
    let poller = Arc::new(ExpiredTimeoutsPoller::new(
        storage.clone(),
        dispatcher.clone(),
        timeouts.dispatcher_address.clone(),
        breaker,
    ));

    let recoverability = |name: &str, address: &str| -> Result<PipelineModifications, ConfigurationError> {
        let mut mods = PipelineModifications::new(name);
        mods.register(StepRegistration::new(
            TIMEOUT_RECOVERABILITY_STEP,
            TimeoutRecoverabilityBehavior::new(
                Arc::clone(&failures),
                name,
                settings.error_queue.clone(),
                address,
                dispatcher.clone(),
                critical_error.clone(),
            ),
            "Handles failures of timeout satellite messages",
        ))?;
        Ok(mods)
    };

    let store = recoverability(STORAGE_SATELLITE, &timeouts.storage_address)?.build(StoreTimeoutTerminator::new(
        dispatcher.clone(),
        storage.clone(),
        Arc::clone(&poller),
        settings.endpoint_name.clone(),
    ))?;
    let dispatch = recoverability(DISPATCH_SATELLITE, &timeouts.dispatcher_address)?.build(
        DispatchTimeoutTerminator::new(dispatcher.clone(), storage, settings.transaction_mode),
    )?;

    let concurrency = PushRuntimeSettings::new(timeouts.max_concurrency);
    let satellites = vec![
        Receiver {
            input_queue: timeouts.storage_address.clone(),
            pipeline: Arc::new(store),
            concurrency,
            purge_on_startup: false,
        },
        Receiver {
            input_queue: timeouts.dispatcher_address.clone(),
            pipeline: Arc::new(dispatch),
            concurrency,
            purge_on_startup: false,
        },
    ];
    Ok((satellites, poller))
}

async fn create_queues(
    receive: &ReceiveInfrastructure,
    receivers: &[Receiver],
    settings: &EndpointSettings,
) -> Result<(), EndpointError> {
    let mut bindings = QueueBindings::new();
    for receiver in receivers {
        bindings.bind_receiving(receiver.input_queue.clone());
    }
    bindings.bind_sending(settings.error_queue.clone());

    let creator = (receive.queue_creator_factory)();
    creator
        .create_queue_if_necessary(&bindings, &settings.endpoint_name)
        .await?;
    debug!(
        receiving = ?bindings.receiving_addresses(),
        sending = ?bindings.sending_addresses(),
        "queues created"
    );
    Ok(())
}

impl std::fmt::Debug for EndpointConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfiguration")
            .field("endpoint", &self.config.endpoint_name)
            .field("transport", &self.transport.name())
            .field("handlers", &self.handlers)
            .field("has_timeout_storage", &self.timeout_storage.is_some())
            .finish_non_exhaustive()
    }
}
