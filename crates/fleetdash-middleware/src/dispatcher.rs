//! [`CommandDispatcher`] – blocking command API on top of the supervisor.
//!
//! Each call builds a protocol message, hands it to the connection worker
//! and blocks the calling thread until the worker confirms the send or the
//! deadline passes.  The boolean methods never fail loudly: every failure
//! path is logged and published as [`FleetEvent::CommandFailed`].  The
//! `try_*` twins return the cause instead.
//!
//! A timed-out send may still go out later; the deadline only bounds how
//! long the caller waits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use fleetdash_mission::{MissionError, DEFAULT_MAX_NODES};
use fleetdash_types::{
    Action, ActionParameter, BlockingType, Event, FleetError, FleetEvent, InstantActions, Order,
    Waypoint, PROTOCOL_VERSION,
};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::Topic;
use crate::handoff::{completion_pair, Completer, WorkerCommand};
use crate::supervisor::ConnectionSupervisor;

/// Default confirmation deadline for a dispatch.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

pub const EMERGENCY_STOP: &str = "emergencyStop";

const SOURCE: &str = "fleetdash-middleware::dispatcher";

/// Outbound topic a `headerId` is counted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderChannel {
    Order,
    InstantActions,
}

/// Per-topic `headerId` counters.
///
/// Topics are per vehicle (`uagv/v2/{mfr}/{serial}/order`), so each
/// `(serial, channel)` pair counts independently from 0.  A number is
/// consumed only when the worker queue accepts the message.
#[derive(Debug, Default)]
pub struct HeaderSequence {
    next: Mutex<HashMap<(String, HeaderChannel), u32>>,
}

impl HeaderSequence {
    /// The number the next accepted message on this topic will carry.
    pub fn peek(&self, serial: &str, channel: HeaderChannel) -> u32 {
        self.lock()
            .get(&(serial.to_string(), channel))
            .copied()
            .unwrap_or(0)
    }

    /// Hand the next number to `submit` and advance the counter only if it
    /// succeeds.  The counter stays locked for the duration of `submit`.
    pub fn claim<T, E>(
        &self,
        serial: &str,
        channel: HeaderChannel,
        submit: impl FnOnce(u32) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut counters = self.lock();
        let next = counters.entry((serial.to_string(), channel)).or_insert(0);
        let value = submit(*next)?;
        *next = next.wrapping_add(1);
        Ok(value)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, HeaderChannel), u32>> {
        self.next.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Why a mission could not be dispatched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MissionDispatchError {
    #[error(transparent)]
    Mission(#[from] MissionError),

    #[error(transparent)]
    Dispatch(#[from] FleetError),
}

pub struct CommandDispatcher {
    supervisor: Arc<ConnectionSupervisor>,
    headers: HeaderSequence,
    max_nodes: usize,
    map_id: String,
}

impl CommandDispatcher {
    pub fn new(supervisor: Arc<ConnectionSupervisor>) -> Self {
        Self {
            supervisor,
            headers: HeaderSequence::default(),
            max_nodes: DEFAULT_MAX_NODES,
            map_id: fleetdash_mission::DEFAULT_MAP_ID.to_string(),
        }
    }

    /// Node ceiling applied by [`dispatch_mission`][Self::dispatch_mission].
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    /// Map id stamped on mission node positions.
    pub fn with_map_id(mut self, map_id: impl Into<String>) -> Self {
        self.map_id = map_id.into();
        self
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    // ── Instant actions ─────────────────────────────────────────────────────

    /// Send one instant action to `serial`.  `true` once the worker has
    /// handed it to the broker within `timeout`.
    pub fn send_instant_action(
        &self,
        serial: &str,
        action_type: &str,
        blocking_type: BlockingType,
        parameters: Option<Vec<ActionParameter>>,
        timeout: Duration,
    ) -> bool {
        match self.try_send_instant_action(serial, action_type, blocking_type, parameters, timeout)
        {
            Ok(_) => true,
            Err(e) => {
                warn!(serial, action_type, error = %e, "instant action not sent");
                false
            }
        }
    }

    /// Like [`send_instant_action`][Self::send_instant_action] but returns
    /// the message that went out, or the cause.
    pub fn try_send_instant_action(
        &self,
        serial: &str,
        action_type: &str,
        blocking_type: BlockingType,
        parameters: Option<Vec<ActionParameter>>,
        timeout: Duration,
    ) -> Result<InstantActions, FleetError> {
        self.ensure_connected()?;
        let manufacturer = self.target_manufacturer(serial)?;

        let mut message = InstantActions {
            header_id: 0,
            timestamp: Utc::now(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            manufacturer,
            serial_number: serial.to_string(),
            actions: vec![Action {
                action_type: action_type.to_string(),
                action_id: Uuid::new_v4().to_string(),
                blocking_type,
                action_parameters: parameters,
            }],
        };

        let header_id = self.handoff(
            serial,
            HeaderChannel::InstantActions,
            action_type,
            timeout,
            |header_id, reply| WorkerCommand::SendInstantActions {
                actions: InstantActions {
                    header_id,
                    ..message.clone()
                },
                reply,
            },
        )?;
        message.header_id = header_id;
        Ok(message)
    }

    /// `emergencyStop` with `HARD` blocking and the default deadline.
    pub fn emergency_stop(&self, serial: &str) -> bool {
        self.send_instant_action(
            serial,
            EMERGENCY_STOP,
            BlockingType::Hard,
            None,
            DEFAULT_DISPATCH_TIMEOUT,
        )
    }

    // ── Orders ──────────────────────────────────────────────────────────────

    /// Send a built order.  Its `headerId` is replaced with the next number
    /// on that vehicle's order topic.
    pub fn dispatch_order(&self, order: Order, timeout: Duration) -> bool {
        let serial = order.serial_number.clone();
        let order_id = order.order_id.clone();
        match self.try_dispatch_order(order, timeout) {
            Ok(_) => true,
            Err(e) => {
                warn!(serial = %serial, order_id = %order_id, error = %e, "order not sent");
                false
            }
        }
    }

    /// Returns the order as sent, with its `headerId` stamped.
    pub fn try_dispatch_order(
        &self,
        mut order: Order,
        timeout: Duration,
    ) -> Result<Order, FleetError> {
        self.ensure_connected()?;
        if !self.supervisor.store().contains(&order.serial_number) {
            return Err(unknown_vehicle(&order.serial_number));
        }

        let header_id = self.handoff(
            &order.serial_number,
            HeaderChannel::Order,
            "order",
            timeout,
            |header_id, reply| WorkerCommand::SendOrder {
                order: Order {
                    header_id,
                    ..order.clone()
                },
                reply,
            },
        )?;
        order.header_id = header_id;
        Ok(order)
    }

    /// Validate `waypoints`, build an order for `serial` using the
    /// manufacturer recorded in the store, and dispatch it.
    pub fn dispatch_mission(
        &self,
        serial: &str,
        order_id: &str,
        waypoints: &[Waypoint],
        timeout: Duration,
    ) -> Result<Order, MissionDispatchError> {
        let order_id = order_id.trim();
        if !fleetdash_mission::validate_order_id(order_id) {
            return Err(MissionError::InvalidOrderId(order_id.to_string()).into());
        }
        for warning in fleetdash_mission::validate(waypoints, self.max_nodes)? {
            warn!(serial, order_id, %warning, "mission validation warning");
        }

        self.ensure_connected()?;
        let manufacturer = self.target_manufacturer(serial)?;
        let options = fleetdash_mission::OrderOptions {
            map_id: self.map_id.clone(),
            timestamp: Utc::now(),
        };
        let order = fleetdash_mission::build_order_with(
            order_id,
            &manufacturer,
            serial,
            waypoints,
            &options,
        )?;

        Ok(self.try_dispatch_order(order, timeout)?)
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn ensure_connected(&self) -> Result<(), FleetError> {
        if self.supervisor.is_connected() {
            Ok(())
        } else {
            Err(FleetError::DispatchUnavailable(
                "not connected to a broker".to_string(),
            ))
        }
    }

    fn target_manufacturer(&self, serial: &str) -> Result<String, FleetError> {
        self.supervisor
            .store()
            .get(serial)
            .map(|snapshot| snapshot.manufacturer)
            .ok_or_else(|| unknown_vehicle(serial))
    }

    /// Stamp the next `headerId` for `serial`'s topic, queue the command and
    /// wait for the worker's answer, publishing the outcome on the dispatch
    /// topic.  Returns the `headerId` that went out.
    fn handoff(
        &self,
        serial: &str,
        channel: HeaderChannel,
        command: &str,
        timeout: Duration,
        build: impl FnOnce(u32, Completer) -> WorkerCommand,
    ) -> Result<u32, FleetError> {
        let (reply, completion) = completion_pair();
        let result = self
            .headers
            .claim(serial, channel, |header_id| {
                self.supervisor
                    .submit(build(header_id, reply))
                    .map(|()| header_id)
            })
            .and_then(|header_id| completion.wait(timeout).map(|()| header_id));

        let payload = match &result {
            Ok(header_id) => {
                info!(serial, command, header_id, "command sent");
                FleetEvent::CommandSent {
                    serial: serial.to_string(),
                    command: command.to_string(),
                    header_id: *header_id,
                }
            }
            Err(e) => FleetEvent::CommandFailed {
                serial: serial.to_string(),
                command: command.to_string(),
                reason: e.to_string(),
            },
        };
        self.supervisor
            .bus()
            .publish(Topic::Dispatch, Event::new(SOURCE, payload));
        result
    }
}

fn unknown_vehicle(serial: &str) -> FleetError {
    FleetError::DispatchUnavailable(format!("AGV '{serial}' is not in the fleet"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::client::mock::{MockBehavior, MockClientFactory, Sent};
    use crate::client::{ClientEvent, ClientIdentity, Credentials};
    use crate::store::FleetStateStore;
    use fleetdash_types::State;
    use std::time::Instant;

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn setup(behavior: MockBehavior) -> (Arc<MockClientFactory>, CommandDispatcher) {
        let factory = MockClientFactory::new(behavior);
        let supervisor = Arc::new(
            ConnectionSupervisor::new(
                Arc::new(FleetStateStore::new()),
                Arc::new(EventBus::default()),
                factory.clone(),
            )
            .with_connect_grace(Duration::ZERO),
        );
        (factory, CommandDispatcher::new(supervisor))
    }

    /// Connect and make `V1` (manufacturer `Acme`) known.
    fn connect_with_vehicle(factory: &MockClientFactory, dispatcher: &CommandDispatcher) {
        let sup = dispatcher.supervisor();
        sup.connect(
            "mqtt://localhost:1883",
            Credentials::default(),
            ClientIdentity::new("FleetDash", "Test"),
        )
        .unwrap();
        assert!(wait_until(|| sup.is_connected()));
        factory.inject(ClientEvent::State {
            serial: "V1".to_string(),
            state: State {
                manufacturer: "Acme".to_string(),
                serial_number: "V1".to_string(),
                ..State::default()
            },
        });
        assert!(wait_until(|| sup.store().contains("V1")));
    }

    fn two_waypoints() -> Vec<Waypoint> {
        vec![
            Waypoint::new("pickup", 10.5, 20.3, 0.0),
            Waypoint::new("dropoff", 15.2, 25.1, 1.57),
        ]
    }

    #[test]
    fn disconnected_dispatch_fails_without_network_call() {
        let (factory, dispatcher) = setup(MockBehavior::default());
        let sent = dispatcher.send_instant_action(
            "V1",
            EMERGENCY_STOP,
            BlockingType::Hard,
            None,
            Duration::from_secs(5),
        );
        assert!(!sent);
        assert_eq!(factory.created(), 0);
        assert!(factory.sent().is_empty());
    }

    #[test]
    fn unknown_serial_is_not_sent() {
        let (factory, dispatcher) = setup(MockBehavior::default());
        connect_with_vehicle(&factory, &dispatcher);

        assert!(!dispatcher.emergency_stop("ghost"));
        assert!(factory.sent().is_empty());
    }

    #[test]
    fn instant_action_reaches_client() {
        let (factory, dispatcher) = setup(MockBehavior::default());
        connect_with_vehicle(&factory, &dispatcher);

        assert!(dispatcher.emergency_stop("V1"));

        let sent = factory.sent();
        assert_eq!(sent.len(), 1);
        let Sent::InstantActions(message) = &sent[0] else {
            panic!("expected instant actions, got {:?}", sent[0]);
        };
        assert_eq!(message.manufacturer, "Acme");
        assert_eq!(message.serial_number, "V1");
        assert_eq!(message.actions[0].action_type, EMERGENCY_STOP);
        assert_eq!(message.actions[0].blocking_type, BlockingType::Hard);
        assert!(!message.actions[0].action_id.is_empty());
    }

    #[test]
    fn header_ids_increment_per_topic() {
        let (factory, dispatcher) = setup(MockBehavior::default());
        connect_with_vehicle(&factory, &dispatcher);

        let first = dispatcher
            .try_send_instant_action("V1", "startPause", BlockingType::Soft, None, DEFAULT_DISPATCH_TIMEOUT)
            .unwrap();
        let second = dispatcher
            .try_send_instant_action("V1", "stopPause", BlockingType::Soft, None, DEFAULT_DISPATCH_TIMEOUT)
            .unwrap();
        let order = dispatcher
            .try_dispatch_order(
                fleetdash_mission::build_order("O-1", "Acme", "V1", &two_waypoints()).unwrap(),
                DEFAULT_DISPATCH_TIMEOUT,
            )
            .unwrap();

        assert_eq!(first.header_id, 0);
        assert_eq!(second.header_id, 1);
        assert_eq!(order.header_id, 0);
        assert_ne!(first.actions[0].action_id, second.actions[0].action_id);
    }

    #[test]
    fn header_ids_count_per_vehicle() {
        let (factory, dispatcher) = setup(MockBehavior::default());
        connect_with_vehicle(&factory, &dispatcher);
        factory.inject(ClientEvent::State {
            serial: "V2".to_string(),
            state: State {
                manufacturer: "Acme".to_string(),
                serial_number: "V2".to_string(),
                ..State::default()
            },
        });
        assert!(wait_until(|| dispatcher.supervisor().store().contains("V2")));

        let mut ids = Vec::new();
        for serial in ["V1", "V2", "V1", "V2", "V1"] {
            let sent = dispatcher
                .try_send_instant_action(serial, "startPause", BlockingType::Soft, None, DEFAULT_DISPATCH_TIMEOUT)
                .unwrap();
            ids.push((serial, sent.header_id));
        }
        assert_eq!(
            ids,
            vec![("V1", 0), ("V2", 0), ("V1", 1), ("V2", 1), ("V1", 2)]
        );
    }

    #[test]
    fn rejected_submit_keeps_the_header_id() {
        let headers = HeaderSequence::default();
        let rejected: Result<u32, FleetError> = headers.claim("V1", HeaderChannel::Order, |_| {
            Err(FleetError::DispatchUnavailable("worker queue is full".to_string()))
        });
        assert!(rejected.is_err());
        assert_eq!(headers.peek("V1", HeaderChannel::Order), 0);

        assert_eq!(headers.claim("V1", HeaderChannel::Order, Ok::<u32, FleetError>), Ok(0));
        assert_eq!(headers.claim("V1", HeaderChannel::Order, Ok::<u32, FleetError>), Ok(1));
        assert_eq!(headers.peek("V1", HeaderChannel::InstantActions), 0);
        assert_eq!(headers.peek("V2", HeaderChannel::Order), 0);
    }

    #[test]
    fn slow_send_times_out() {
        let (factory, dispatcher) = setup(MockBehavior {
            send_delay: Duration::from_millis(300),
            ..MockBehavior::default()
        });
        connect_with_vehicle(&factory, &dispatcher);

        let timeout = Duration::from_millis(20);
        let result = dispatcher.try_send_instant_action(
            "V1",
            EMERGENCY_STOP,
            BlockingType::Hard,
            None,
            timeout,
        );
        assert_eq!(result.unwrap_err(), FleetError::DispatchTimeout(timeout));

        // The worker still completes the send after the caller gave up.
        assert!(wait_until(|| factory.sent().len() == 1));
    }

    #[test]
    fn send_failure_is_false() {
        let (factory, dispatcher) = setup(MockBehavior {
            fail_send: true,
            ..MockBehavior::default()
        });
        connect_with_vehicle(&factory, &dispatcher);
        assert!(!dispatcher.emergency_stop("V1"));
    }

    #[test]
    fn dispatch_outcomes_are_published() {
        let (factory, dispatcher) = setup(MockBehavior::default());
        let mut dispatch = dispatcher.supervisor().bus().subscribe_to(Topic::Dispatch);
        connect_with_vehicle(&factory, &dispatcher);

        assert!(dispatcher.emergency_stop("V1"));
        assert!(!dispatcher.emergency_stop("ghost"));

        match dispatch.try_recv().map(|e| e.payload) {
            Some(FleetEvent::CommandSent { serial, command, .. }) => {
                assert_eq!(serial, "V1");
                assert_eq!(command, EMERGENCY_STOP);
            }
            other => panic!("unexpected: {other:?}"),
        }
        // Unknown vehicles fail before any handoff, so nothing else is published.
        assert!(dispatch.try_recv().is_none());
    }

    #[test]
    fn mission_dispatch_builds_from_store() {
        let (factory, dispatcher) = setup(MockBehavior::default());
        connect_with_vehicle(&factory, &dispatcher);

        let order = dispatcher
            .dispatch_mission("V1", "ORDER-7", &two_waypoints(), DEFAULT_DISPATCH_TIMEOUT)
            .unwrap();
        assert_eq!(order.manufacturer, "Acme");
        assert_eq!(order.nodes.len(), 2);

        let sent = factory.sent();
        let Sent::Order(sent_order) = &sent[0] else {
            panic!("expected an order");
        };
        assert_eq!(sent_order.order_id, "ORDER-7");
        assert_eq!(sent_order.edges[0].start_node_id, "pickup");
    }

    #[test]
    fn mission_dispatch_rejects_bad_input_before_connecting() {
        let (_factory, dispatcher) = setup(MockBehavior::default());

        assert_eq!(
            dispatcher.dispatch_mission("V1", "bad id", &two_waypoints(), DEFAULT_DISPATCH_TIMEOUT),
            Err(MissionDispatchError::Mission(MissionError::InvalidOrderId(
                "bad id".to_string()
            )))
        );

        let dispatcher = dispatcher.with_max_nodes(1);
        assert!(matches!(
            dispatcher.dispatch_mission("V1", "O", &two_waypoints(), DEFAULT_DISPATCH_TIMEOUT),
            Err(MissionDispatchError::Mission(MissionError::Capacity { .. }))
        ));
        assert!(matches!(
            dispatcher.dispatch_mission(
                "V1",
                "O",
                &two_waypoints()[..1],
                DEFAULT_DISPATCH_TIMEOUT
            ),
            Err(MissionDispatchError::Dispatch(FleetError::DispatchUnavailable(_)))
        ));
    }
}
