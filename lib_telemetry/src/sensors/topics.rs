//! # Topic Naming
//!
//! Topics are case-sensitive strings:
//!
//! - `<domain>/<kind>sensor` for inbound readings,
//! - `<domain>/start` and `<domain>/reset` for outbound device commands,
//! - `<clientId>/keepalive` for the liveness marker.

use serde::{Deserialize, Serialize};

use super::reading::SensorKind;

/// Domain the deployed devices publish under.
pub const DEFAULT_DOMAIN: &str = "waterqualitymonitoring";

/// Outbound commands understood by the monitoring devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCommand {
    /// Begin a measurement cycle.
    Start,
    /// Reset the device's reading state.
    Reset,
}

impl DeviceCommand {
    /// Topic suffix, which is also the literal payload sent.
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceCommand::Start => "start",
            DeviceCommand::Reset => "reset",
        }
    }
}

/// Builds and parses topics for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    domain: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new(DEFAULT_DOMAIN)
    }
}

impl TopicScheme {
    pub fn new(domain: impl Into<String>) -> Self {
        Self { domain: domain.into() }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn sensor_topic(&self, kind: SensorKind) -> String {
        format!("{}/{}", self.domain, kind.topic_segment())
    }

    /// All four inbound reading topics.
    pub fn sensor_topics(&self) -> Vec<(SensorKind, String)> {
        SensorKind::ALL
            .into_iter()
            .map(|kind| (kind, self.sensor_topic(kind)))
            .collect()
    }

    pub fn command_topic(&self, command: DeviceCommand) -> String {
        format!("{}/{}", self.domain, command.as_str())
    }

    /// Private liveness topic for a client identity.
    pub fn keepalive_topic(client_id: &str) -> String {
        format!("{}/keepalive", client_id)
    }

    /// Resolves the sensor kind of an inbound topic, if it belongs to this domain.
    pub fn kind_of(&self, topic: &str) -> Option<SensorKind> {
        let (domain, segment) = topic.split_once('/')?;
        if domain != self.domain {
            return None;
        }
        SensorKind::from_topic_segment(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_device_topics() {
        let scheme = TopicScheme::default();
        assert_eq!(scheme.sensor_topic(SensorKind::Ph), "waterqualitymonitoring/pHsensor");
        assert_eq!(scheme.sensor_topic(SensorKind::Level), "waterqualitymonitoring/Levelsensor");
        assert_eq!(scheme.command_topic(DeviceCommand::Reset), "waterqualitymonitoring/reset");
        assert_eq!(TopicScheme::keepalive_topic("dash-01"), "dash-01/keepalive");
    }

    #[test]
    fn kind_of_rejects_foreign_domains_and_nested_topics() {
        let scheme = TopicScheme::default();
        assert_eq!(scheme.kind_of("waterqualitymonitoring/TDSsensor"), Some(SensorKind::Tds));
        assert_eq!(scheme.kind_of("otherdomain/TDSsensor"), None);
        assert_eq!(scheme.kind_of("waterqualitymonitoring/TDSsensor/extra"), None);
        assert_eq!(scheme.kind_of("waterqualitymonitoring/start"), None);
    }
}
