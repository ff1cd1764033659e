//! MQTT placeholder
//!
//! The protocol kind is part of the data model so actions and devices can be
//! stored with it, but no broker client exists yet.

use super::{Connector, ConnectorError, Endpoint, Link, OpenOptions, ProtocolKind};
use async_trait::async_trait;

/// Reserved MQTT connector; every open fails with `NoConnector`
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttConnector;

#[async_trait]
impl Connector for MqttConnector {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Mqtt
    }

    async fn open(
        &self,
        endpoint: &Endpoint,
        _options: &OpenOptions,
    ) -> Result<Box<dyn Link>, ConnectorError> {
        tracing::debug!(%endpoint, "MQTT open requested but not supported");
        Err(ConnectorError::no_connector(ProtocolKind::Mqtt))
    }
}
