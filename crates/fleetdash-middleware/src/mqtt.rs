//! Broker transport over MQTT.
//!
//! [`MqttProtocolClient`] implements [`ProtocolClient`] on top of `rumqttc`.
//! Vehicle traffic lives under `uagv/v2/{manufacturer}/{serialNumber}/…`:
//!
//! | Channel | Direction | Payload |
//! |---|---|---|
//! | `state` | vehicle → dashboard | [`State`] |
//! | `connection` | vehicle → dashboard | [`Connection`] |
//! | `order` | dashboard → vehicle | [`Order`] |
//! | `instantActions` | dashboard → vehicle | [`InstantActions`] |
//!
//! After the handshake a pump task drives the `rumqttc` event loop, decodes
//! inbound publishes and forwards them through an unbounded channel that
//! [`next_event`][ProtocolClient::next_event] drains.

use std::time::Duration;

use async_trait::async_trait;
use fleetdash_types::{Connection, FleetError, InstantActions, Order, State};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event as MqttEvent, EventLoop, MqttOptions, Packet, QoS,
    Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{BrokerAddress, ClientEvent, ClientFactory, ClientIdentity, Credentials, ProtocolClient};

/// Prefix shared by every vehicle topic.
pub const TOPIC_ROOT: &str = "uagv/v2";

const STATE_CHANNEL: &str = "state";
const CONNECTION_CHANNEL: &str = "connection";
const ORDER_CHANNEL: &str = "order";
const INSTANT_ACTIONS_CHANNEL: &str = "instantActions";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 64;

/// Full topic for `channel` on one vehicle.
pub fn vehicle_topic(manufacturer: &str, serial: &str, channel: &str) -> String {
    format!("{TOPIC_ROOT}/{manufacturer}/{serial}/{channel}")
}

/// The pieces of a vehicle topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleTopic<'a> {
    pub manufacturer: &'a str,
    pub serial: &'a str,
    pub channel: &'a str,
}

/// Split `uagv/v2/{manufacturer}/{serial}/{channel}`.  Anything else,
/// including wildcards or empty segments, yields `None`.
pub fn parse_topic(topic: &str) -> Option<VehicleTopic<'_>> {
    let rest = topic.strip_prefix(TOPIC_ROOT)?.strip_prefix('/')?;
    let mut parts = rest.split('/');
    let manufacturer = parts.next()?;
    let serial = parts.next()?;
    let channel = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let valid = |s: &str| !s.is_empty() && s != "+" && s != "#";
    if !(valid(manufacturer) && valid(serial) && valid(channel)) {
        return None;
    }
    Some(VehicleTopic {
        manufacturer,
        serial,
        channel,
    })
}

/// Turn an inbound publish into a [`ClientEvent`].  Unknown channels and
/// undecodable payloads are logged and dropped.
pub(crate) fn decode_publish(topic: &str, payload: &[u8]) -> Option<ClientEvent> {
    let Some(parts) = parse_topic(topic) else {
        debug!(topic, "ignoring publish on unrecognised topic");
        return None;
    };
    let serial = parts.serial.to_string();

    match parts.channel {
        STATE_CHANNEL => match serde_json::from_slice::<State>(payload) {
            Ok(state) => Some(ClientEvent::State { serial, state }),
            Err(e) => {
                warn!(topic, error = %e, "dropping malformed state message");
                None
            }
        },
        CONNECTION_CHANNEL => match serde_json::from_slice::<Connection>(payload) {
            Ok(connection) => Some(ClientEvent::VehicleConnection { serial, connection }),
            Err(e) => {
                warn!(topic, error = %e, "dropping malformed connection message");
                None
            }
        },
        other => {
            debug!(topic, channel = other, "ignoring publish on unhandled channel");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Builds one [`MqttProtocolClient`] per connection.
#[derive(Debug, Clone)]
pub struct MqttClientFactory {
    connect_timeout: Duration,
}

impl MqttClientFactory {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Bound on how long the handshake may take before `connect` fails.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for MqttClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientFactory for MqttClientFactory {
    fn create(
        &self,
        broker: &BrokerAddress,
        credentials: &Credentials,
        identity: &ClientIdentity,
    ) -> Result<Box<dyn ProtocolClient>, FleetError> {
        let mut options = MqttOptions::new(identity.client_id(), broker.host.clone(), broker.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        if !credentials.is_anonymous() {
            options.set_credentials(credentials.username.clone(), credentials.password.clone());
        }
        if broker.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        Ok(Box::new(MqttProtocolClient {
            options: Some(options),
            broker: broker.clone(),
            connect_timeout: self.connect_timeout,
            client: None,
            inbound: None,
            pump: None,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

pub struct MqttProtocolClient {
    options: Option<MqttOptions>,
    broker: BrokerAddress,
    connect_timeout: Duration,
    client: Option<AsyncClient>,
    inbound: Option<mpsc::UnboundedReceiver<ClientEvent>>,
    pump: Option<JoinHandle<()>>,
}

impl MqttProtocolClient {
    fn client(&self) -> Result<&AsyncClient, FleetError> {
        self.client
            .as_ref()
            .ok_or_else(|| FleetError::Connection("client is not connected".to_string()))
    }

    async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), FleetError> {
        self.client()?
            .publish(topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| FleetError::Protocol(format!("publish to {topic} failed: {e}")))
    }
}

/// Poll until the broker acknowledges the session.
async fn await_connack(eventloop: &mut EventLoop) -> Result<(), FleetError> {
    loop {
        match eventloop.poll().await {
            Ok(MqttEvent::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(FleetError::Connection(format!(
                        "broker refused the session: {:?}",
                        ack.code
                    )))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(FleetError::Connection(e.to_string())),
        }
    }
}

/// Drive the event loop for the rest of the session.
async fn pump(mut eventloop: EventLoop, events: mpsc::UnboundedSender<ClientEvent>) {
    loop {
        match eventloop.poll().await {
            Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                if let Some(event) = decode_publish(&publish.topic, &publish.payload)
                    && events.send(event).is_err()
                {
                    break;
                }
            }
            Ok(MqttEvent::Incoming(Packet::Disconnect)) => {
                let _ = events.send(ClientEvent::BrokerLost(
                    "broker closed the session".to_string(),
                ));
                break;
            }
            Ok(_) => {}
            Err(e) => {
                let _ = events.send(ClientEvent::BrokerLost(e.to_string()));
                break;
            }
        }
    }
}

#[async_trait]
impl ProtocolClient for MqttProtocolClient {
    async fn connect(&mut self) -> Result<(), FleetError> {
        let options = self
            .options
            .take()
            .ok_or_else(|| FleetError::Connection("client was already used".to_string()))?;
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        tokio::time::timeout(self.connect_timeout, await_connack(&mut eventloop))
            .await
            .map_err(|_| {
                FleetError::Connection(format!(
                    "no answer from {} within {:?}",
                    self.broker, self.connect_timeout
                ))
            })??;

        for channel in [STATE_CHANNEL, CONNECTION_CHANNEL] {
            let filter = format!("{TOPIC_ROOT}/+/+/{channel}");
            client
                .subscribe(filter.as_str(), QoS::AtLeastOnce)
                .await
                .map_err(|e| FleetError::Connection(format!("subscribe {filter}: {e}")))?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.pump = Some(tokio::spawn(pump(eventloop, tx)));
        self.inbound = Some(rx);
        self.client = Some(client);
        info!(broker = %self.broker, "MQTT session established");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), FleetError> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        let result = client
            .disconnect()
            .await
            .map_err(|e| FleetError::Connection(format!("disconnect failed: {e}")));
        // Let the pump flush the DISCONNECT packet, then stop it.
        if let Some(pump) = self.pump.take() {
            if tokio::time::timeout(Duration::from_millis(250), pump).await.is_err() {
                debug!(broker = %self.broker, "event loop did not stop on its own");
            }
        }
        result
    }

    async fn send_order(&mut self, order: &Order) -> Result<(), FleetError> {
        let topic = vehicle_topic(&order.manufacturer, &order.serial_number, ORDER_CHANNEL);
        let payload = serde_json::to_vec(order)?;
        self.publish(topic, payload).await
    }

    async fn send_instant_actions(&mut self, actions: &InstantActions) -> Result<(), FleetError> {
        let topic = vehicle_topic(
            &actions.manufacturer,
            &actions.serial_number,
            INSTANT_ACTIONS_CHANNEL,
        );
        let payload = serde_json::to_vec(actions)?;
        self.publish(topic, payload).await
    }

    async fn next_event(&mut self) -> Option<ClientEvent> {
        self.inbound.as_mut()?.recv().await
    }
}

impl Drop for MqttProtocolClient {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
