use courier_types::error::TransportError;
use tracing::{error, info};

use super::EndpointError;
use super::session::MessageSession;
use super::settings::EndpointSettings;
use crate::recoverability::{BusNotifications, CleanerHandle, CriticalError};
use crate::timeout::PollerHandle;
use crate::transport::BoxMessagePump;

/// A started endpoint. Dropping it without `stop` leaves its tasks running
/// until the runtime shuts down.
pub struct RunningEndpoint {
    settings: EndpointSettings,
    session: MessageSession,
    notifications: BusNotifications,
    critical_error: CriticalError,
    pumps: Vec<(String, BoxMessagePump)>,
    poller: Option<PollerHandle>,
    cleaner: Option<CleanerHandle>,
}

impl RunningEndpoint {
    pub(crate) fn new(
        settings: EndpointSettings,
        session: MessageSession,
        notifications: BusNotifications,
        critical_error: CriticalError,
    ) -> Self {
        Self {
            settings,
            session,
            notifications,
            critical_error,
            pumps: Vec::new(),
            poller: None,
            cleaner: None,
        }
    }

    pub(crate) fn add_pump(&mut self, input_queue: String, pump: BoxMessagePump) {
        self.pumps.push((input_queue, pump));
    }

    pub(crate) fn set_poller(&mut self, poller: PollerHandle) {
        self.poller = Some(poller);
    }

    pub(crate) fn set_cleaner(&mut self, cleaner: CleanerHandle) {
        self.cleaner = Some(cleaner);
    }

    pub fn settings(&self) -> &EndpointSettings {
        &self.settings
    }

    pub fn session(&self) -> &MessageSession {
        &self.session
    }

    pub fn notifications(&self) -> &BusNotifications {
        &self.notifications
    }

    pub fn critical_error(&self) -> &CriticalError {
        &self.critical_error
    }

    /// Input queues with a running pump.
    pub fn input_queues(&self) -> Vec<&str> {
        self.pumps.iter().map(|(queue, _)| queue.as_str()).collect()
    }

    /// Stop the poller, every pump and the cleaner.
    ///
    /// Every component is stopped even if an earlier one fails; the first
    /// failure is returned.
    pub async fn stop(mut self) -> Result<(), EndpointError> {
        info!(endpoint = %self.settings.endpoint_name, "stopping endpoint");

        if let Some(poller) = self.poller.take() {
            poller.stop().await;
        }

        let mut first_error: Option<TransportError> = None;
        for (queue, mut pump) in self.pumps.drain(..) {
            if let Err(e) = pump.stop().await {
                error!(input_queue = %queue, error = %e, "message pump did not stop cleanly");
                first_error.get_or_insert(e);
            }
        }

        if let Some(cleaner) = self.cleaner.take() {
            cleaner.stop().await;
        }

        info!(endpoint = %self.settings.endpoint_name, "endpoint stopped");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for RunningEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningEndpoint")
            .field("endpoint", &self.settings.endpoint_name)
            .field("input_queues", &self.input_queues())
            .field("poller", &self.poller.is_some())
            .finish()
    }
}
