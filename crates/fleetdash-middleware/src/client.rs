//! The protocol client seam.
//!
//! FleetDash never speaks to the broker directly.  The connection worker
//! drives a [`ProtocolClient`], which performs the vehicle-protocol
//! handshake, delivers inbound traffic as [`ClientEvent`]s and sends
//! outbound messages.  A [`ClientFactory`] builds one client per connection
//! so the worker can own it exclusively.
//!
//! # Overview
//!
//! - [`ProtocolClient`] – the trait every transport must implement.
//! - [`MqttProtocolClient`][crate::mqtt::MqttProtocolClient] – the broker
//!   transport used in production.
//! - [`BrokerAddress`], [`Credentials`], [`ClientIdentity`] – what a factory
//!   needs to build a client.

use async_trait::async_trait;
use fleetdash_types::{Connection, FleetError, InstantActions, Order, State};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Inbound traffic surfaced by a [`ProtocolClient`].
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A vehicle published its state.
    State { serial: String, state: State },
    /// A vehicle published a connection report.
    VehicleConnection { serial: String, connection: Connection },
    /// The broker session itself is gone.
    BrokerLost(String),
}

/// Every broker transport must implement this trait.
///
/// # Contract
///
/// * `connect` – performs the protocol handshake and subscribes to the
///   inbound topics.  Returns once the broker acknowledged the session.
///
/// * `next_event` – yields the next inbound event, or `None` once the
///   inbound stream has ended.  It must be cancel-safe: the worker polls it
///   inside `tokio::select!` alongside its command queue.
///
/// * `send_order` / `send_instant_actions` – complete once the message has
///   been handed to the transport.
#[async_trait]
pub trait ProtocolClient: Send {
    async fn connect(&mut self) -> Result<(), FleetError>;

    async fn disconnect(&mut self) -> Result<(), FleetError>;

    async fn send_order(&mut self, order: &Order) -> Result<(), FleetError>;

    async fn send_instant_actions(&mut self, actions: &InstantActions) -> Result<(), FleetError>;

    async fn next_event(&mut self) -> Option<ClientEvent>;
}

/// Builds a fresh [`ProtocolClient`] for each connection.
pub trait ClientFactory: Send + Sync {
    fn create(
        &self,
        broker: &BrokerAddress,
        credentials: &Credentials,
        identity: &ClientIdentity,
    ) -> Result<Box<dyn ProtocolClient>, FleetError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection inputs
// ─────────────────────────────────────────────────────────────────────────────

/// Host/port pair parsed from a broker URL such as `mqtts://broker:8883`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl BrokerAddress {
    /// Parse `[scheme://]host:port`, with IPv6 hosts written `[addr]:port`.
    ///
    /// Accepted schemes are `mqtt`/`tcp` (plain) and `mqtts`/`ssl` (TLS).
    /// The port is mandatory; an address without one is rejected rather than
    /// guessed.
    pub fn parse(address: &str) -> Result<Self, FleetError> {
        let invalid = |reason: &str| FleetError::InvalidBrokerAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = address.trim();
        let (use_tls, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => match scheme.to_ascii_lowercase().as_str() {
                "mqtt" | "tcp" => (false, rest),
                "mqtts" | "ssl" => (true, rest),
                _ => return Err(invalid("unsupported scheme")),
            },
            None => (false, trimmed),
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.strip_prefix('[') {
            Some(bracketed) => {
                let (host, after) = bracketed
                    .split_once(']')
                    .ok_or_else(|| invalid("unclosed '[' in host"))?;
                let port = after
                    .strip_prefix(':')
                    .ok_or_else(|| invalid("missing port"))?;
                (host, port)
            }
            None => {
                let (host, port) = rest
                    .rsplit_once(':')
                    .ok_or_else(|| invalid("missing port"))?;
                if host.contains(':') {
                    return Err(invalid("IPv6 host must be in brackets"));
                }
                (host, port)
            }
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;
        if port == 0 {
            return Err(invalid("invalid port"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            use_tls,
        })
    }
}

impl std::fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.use_tls { "mqtts" } else { "mqtt" };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

/// Broker login.  The password is wiped from memory on drop and never
/// printed by `Debug`.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// `true` when no username was configured.
    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .finish()
    }
}

/// Manufacturer/serial this dashboard presents to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub manufacturer: String,
    pub serial_number: String,
}

impl ClientIdentity {
    pub fn new(manufacturer: impl Into<String>, serial_number: impl Into<String>) -> Self {
        Self {
            manufacturer: manufacturer.into(),
            serial_number: serial_number.into(),
        }
    }

    /// Broker-level client id derived from the identity.
    pub fn client_id(&self) -> String {
        format!("{}-{}", self.manufacturer, self.serial_number)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scripted client for tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// What the client saw go out.
    #[derive(Debug, Clone)]
    pub enum Sent {
        Order(Order),
        InstantActions(InstantActions),
    }

    #[derive(Debug, Clone, Default)]
    pub struct MockBehavior {
        pub fail_connect: bool,
        pub fail_disconnect: bool,
        pub fail_send: bool,
        pub send_delay: Duration,
    }

    /// Factory handing out [`MockClient`]s and letting tests push inbound
    /// events into whichever client is current.
    pub struct MockClientFactory {
        behavior: MockBehavior,
        sent: Arc<Mutex<Vec<Sent>>>,
        injector: Mutex<Option<mpsc::UnboundedSender<ClientEvent>>>,
        created: AtomicUsize,
        disconnects: Arc<AtomicUsize>,
    }

    impl MockClientFactory {
        pub fn new(behavior: MockBehavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                sent: Arc::new(Mutex::new(Vec::new())),
                injector: Mutex::new(None),
                created: AtomicUsize::new(0),
                disconnects: Arc::new(AtomicUsize::new(0)),
            })
        }

        pub fn inject(&self, event: ClientEvent) {
            let injector = self.injector.lock().unwrap();
            injector
                .as_ref()
                .expect("no client created yet")
                .send(event)
                .expect("client dropped");
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        pub fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }

        pub fn disconnects(&self) -> usize {
            self.disconnects.load(Ordering::SeqCst)
        }
    }

    impl ClientFactory for MockClientFactory {
        fn create(
            &self,
            _broker: &BrokerAddress,
            _credentials: &Credentials,
            _identity: &ClientIdentity,
        ) -> Result<Box<dyn ProtocolClient>, FleetError> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.injector.lock().unwrap() = Some(tx);
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockClient {
                behavior: self.behavior.clone(),
                sent: Arc::clone(&self.sent),
                inbound: rx,
                disconnects: Arc::clone(&self.disconnects),
            }))
        }
    }

    pub struct MockClient {
        behavior: MockBehavior,
        sent: Arc<Mutex<Vec<Sent>>>,
        inbound: mpsc::UnboundedReceiver<ClientEvent>,
        disconnects: Arc<AtomicUsize>,
    }

    impl MockClient {
        async fn record(&mut self, message: Sent) -> Result<(), FleetError> {
            if !self.behavior.send_delay.is_zero() {
                tokio::time::sleep(self.behavior.send_delay).await;
            }
            if self.behavior.fail_send {
                return Err(FleetError::Protocol("scripted send failure".to_string()));
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }

    #[async_trait]
    impl ProtocolClient for MockClient {
        async fn connect(&mut self) -> Result<(), FleetError> {
            if self.behavior.fail_connect {
                Err(FleetError::Connection("scripted handshake failure".to_string()))
            } else {
                Ok(())
            }
        }

        async fn disconnect(&mut self) -> Result<(), FleetError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            if self.behavior.fail_disconnect {
                Err(FleetError::Connection("scripted disconnect failure".to_string()))
            } else {
                Ok(())
            }
        }

        async fn send_order(&mut self, order: &Order) -> Result<(), FleetError> {
            self.record(Sent::Order(order.clone())).await
        }

        async fn send_instant_actions(
            &mut self,
            actions: &InstantActions,
        ) -> Result<(), FleetError> {
            self.record(Sent::InstantActions(actions.clone())).await
        }

        async fn next_event(&mut self) -> Option<ClientEvent> {
            self.inbound.recv().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_address() {
        let addr = BrokerAddress::parse("mqtt://broker.local:1883").unwrap();
        assert_eq!(addr.host, "broker.local");
        assert_eq!(addr.port, 1883);
        assert!(!addr.use_tls);
        assert_eq!(addr.to_string(), "mqtt://broker.local:1883");
    }

    #[test]
    fn parse_tls_address() {
        let addr = BrokerAddress::parse("mqtts://broker.local:8883/").unwrap();
        assert!(addr.use_tls);
        assert_eq!(addr.port, 8883);
    }

    #[test]
    fn parse_without_scheme() {
        let addr = BrokerAddress::parse("127.0.0.1:1883").unwrap();
        assert_eq!(addr.host, "127.0.0.1");
        assert!(!addr.use_tls);
    }

    #[test]
    fn parse_ipv6_literal() {
        let addr = BrokerAddress::parse("mqtt://[::1]:1883").unwrap();
        assert_eq!(addr.host, "::1");
    }

    #[test]
    fn parse_rejects_unbracketed_ipv6() {
        for address in ["mqtt://::1", "mqtt://fe80::1:1883", "mqtt://[::1]", "mqtt://[::1:1883"] {
            assert!(
                matches!(
                    BrokerAddress::parse(address),
                    Err(FleetError::InvalidBrokerAddress { .. })
                ),
                "{address} should be rejected"
            );
        }
    }

    #[test]
    fn parse_rejects_missing_port() {
        let err = BrokerAddress::parse("mqtt://broker.local").unwrap_err();
        match err {
            FleetError::InvalidBrokerAddress { reason, .. } => assert_eq!(reason, "missing port"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_bad_port_and_scheme() {
        assert!(BrokerAddress::parse("mqtt://broker:notaport").is_err());
        assert!(BrokerAddress::parse("mqtt://broker:0").is_err());
        assert!(BrokerAddress::parse("http://broker:1883").is_err());
        assert!(BrokerAddress::parse("mqtt://:1883").is_err());
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials::new("operator", "hunter2");
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("<redacted>"));
        assert!(format!("{:?}", Credentials::default()).contains("<not set>"));
    }

    #[test]
    fn anonymous_credentials() {
        assert!(Credentials::default().is_anonymous());
        assert!(!Credentials::new("u", "").is_anonymous());
    }

    #[test]
    fn client_id_joins_identity() {
        let id = ClientIdentity::new("FleetDash", "Console1");
        assert_eq!(id.client_id(), "FleetDash-Console1");
    }
}
