use std::collections::HashMap;

use courier_types::config::RouteConfig;

/// Logical endpoint responsible for each message type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnicastRoutingTable {
    routes: HashMap<String, String>,
}

impl UnicastRoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configuration. Later entries for the same type win.
    pub fn from_config(routes: &[RouteConfig]) -> Self {
        let mut table = Self::new();
        for route in routes {
            table.route_to_endpoint(&route.message_type, &route.endpoint);
        }
        table
    }

    pub fn route_to_endpoint(&mut self, message_type: impl Into<String>, endpoint: impl Into<String>) -> &mut Self {
        self.routes.insert(message_type.into(), endpoint.into());
        self
    }

    pub fn endpoint_for(&self, message_type: &str) -> Option<&str> {
        self.routes.get(message_type).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.routes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_config_entries_override_earlier_ones() {
        let table = UnicastRoutingTable::from_config(&[
            RouteConfig {
                message_type: "billing.Charge".into(),
                endpoint: "Billing".into(),
            },
            RouteConfig {
                message_type: "billing.Charge".into(),
                endpoint: "BillingV2".into(),
            },
        ]);
        assert_eq!(table.endpoint_for("billing.Charge"), Some("BillingV2"));
        assert_eq!(table.endpoint_for("sales.Order"), None);
    }
}
