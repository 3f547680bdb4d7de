//! [`ConnectionSupervisor`] – owns the single broker session.
//!
//! `connect` spawns one worker thread that runs its own current-thread Tokio
//! runtime.  The worker owns the [`ProtocolClient`] exclusively and serves
//! two sources inside one `select!` loop:
//!
//! | Source | Effect |
//! |---|---|
//! | Command queue | send an order / instant action, or disconnect |
//! | Inbound client events | upsert the [`FleetStateStore`], or tear down on broker loss |
//!
//! Callers never touch the client.  They queue a [`WorkerCommand`] and wait
//! on its [`Completion`][crate::handoff::Completion] with a deadline.
//!
//! ```text
//!  Disconnected ──connect──▶ Connecting ──handshake ok──▶ Connected
//!       ▲                        │                            │
//!       └──── handshake failed ──┘◀── disconnect / broker lost┘
//! ```
//!
//! Whenever a session ends the store is cleared: last-known values are not
//! carried across reconnects.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use fleetdash_types::{Connection, Event, FleetError, FleetEvent, SessionState, State};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, Topic};
use crate::client::{BrokerAddress, ClientEvent, ClientFactory, ClientIdentity, Credentials};
use crate::handoff::{completion_pair, WorkerCommand};
use crate::store::FleetStateStore;

/// Pause after spawning the worker so the handshake can get going before
/// `connect` returns.
pub const DEFAULT_CONNECT_GRACE: Duration = Duration::from_millis(500);

/// How long `disconnect` waits for the worker to close the session.
const DISCONNECT_WAIT: Duration = Duration::from_secs(2);

const COMMAND_QUEUE_DEPTH: usize = 64;

const SOURCE: &str = "fleetdash-middleware::supervisor";

// ─────────────────────────────────────────────────────────────────────────────
// Session status shared between the supervisor and one worker
// ─────────────────────────────────────────────────────────────────────────────

/// Session state plus the fence that cuts a worker off from the shared store
/// and bus once the supervisor has let go of it.
#[derive(Debug)]
struct SessionStatus {
    state: AtomicU8,
    detached: Mutex<bool>,
}

impl SessionStatus {
    fn new(state: SessionState) -> Self {
        Self {
            state: AtomicU8::new(Self::encode(state)),
            detached: Mutex::new(false),
        }
    }

    fn get(&self) -> SessionState {
        match self.state.load(Ordering::Acquire) {
            1 => SessionState::Connecting,
            2 => SessionState::Connected,
            _ => SessionState::Disconnected,
        }
    }

    fn set(&self, state: SessionState) {
        self.state.store(Self::encode(state), Ordering::Release);
    }

    /// Cut the worker off.  Returns once any write it has in flight is done;
    /// no write starts afterwards.
    fn detach(&self) {
        *self.lock_detached() = true;
        self.set(SessionState::Disconnected);
    }

    /// Run `write` unless the worker has been detached.  The fence is held
    /// while `write` runs.
    fn while_attached<R>(&self, write: impl FnOnce() -> R) -> Option<R> {
        let detached = self.lock_detached();
        if *detached { None } else { Some(write()) }
    }

    fn lock_detached(&self) -> MutexGuard<'_, bool> {
        self.detached.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn encode(state: SessionState) -> u8 {
        match state {
            SessionState::Disconnected => 0,
            SessionState::Connecting => 1,
            SessionState::Connected => 2,
        }
    }
}

/// The supervisor's handle on an attached worker.
struct WorkerHandle {
    commands: mpsc::Sender<WorkerCommand>,
    thread: JoinHandle<()>,
    status: Arc<SessionStatus>,
}

impl WorkerHandle {
    fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }

    fn submit(&self, command: WorkerCommand) -> Result<(), FleetError> {
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                FleetError::DispatchUnavailable("worker queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                FleetError::DispatchUnavailable("worker has stopped".to_string())
            }
        })
    }
}

/// Point-in-time view of the supervisor, for `/status`-style output.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorStatus {
    pub state: SessionState,
    pub worker_attached: bool,
    pub worker_alive: bool,
    pub fleet_size: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor
// ─────────────────────────────────────────────────────────────────────────────

pub struct ConnectionSupervisor {
    store: Arc<FleetStateStore>,
    bus: Arc<EventBus>,
    factory: Arc<dyn ClientFactory>,
    worker: Mutex<Option<WorkerHandle>>,
    grace: Duration,
}

impl ConnectionSupervisor {
    pub fn new(
        store: Arc<FleetStateStore>,
        bus: Arc<EventBus>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            store,
            bus,
            factory,
            worker: Mutex::new(None),
            grace: DEFAULT_CONNECT_GRACE,
        }
    }

    /// Override the post-spawn grace delay.
    pub fn with_connect_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn store(&self) -> &Arc<FleetStateStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Start a session with the broker at `address`.
    ///
    /// Fails without spawning anything if the address is malformed or a
    /// worker is still attached.  Otherwise spawns the worker, waits the
    /// grace delay and returns; readiness is observed through
    /// [`is_connected`][Self::is_connected].
    pub fn connect(
        &self,
        address: &str,
        credentials: Credentials,
        identity: ClientIdentity,
    ) -> Result<(), FleetError> {
        let broker = BrokerAddress::parse(address)?;

        let mut slot = self.lock_worker();
        if slot.as_ref().is_some_and(WorkerHandle::is_alive) {
            return Err(FleetError::AlreadyConnected);
        }

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let status = Arc::new(SessionStatus::new(SessionState::Connecting));
        let worker = SessionWorker {
            broker: broker.clone(),
            credentials,
            identity,
            factory: Arc::clone(&self.factory),
            store: Arc::clone(&self.store),
            bus: Arc::clone(&self.bus),
            status: Arc::clone(&status),
            commands: rx,
        };

        self.publish_state(SessionState::Connecting);
        let thread = match std::thread::Builder::new()
            .name("fleet-connection".to_string())
            .spawn(move || worker.run())
        {
            Ok(thread) => thread,
            Err(e) => {
                self.publish_state(SessionState::Disconnected);
                return Err(FleetError::Connection(format!("failed to spawn worker: {e}")));
            }
        };

        *slot = Some(WorkerHandle {
            commands: tx,
            thread,
            status,
        });
        drop(slot);

        info!(broker = %broker, "connection worker started");

        if !self.grace.is_zero() {
            std::thread::sleep(self.grace);
        }
        Ok(())
    }

    /// `true` iff a worker is attached, its thread is running and its
    /// session has completed the handshake.
    pub fn is_connected(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|w| w.is_alive() && w.status.get() == SessionState::Connected)
    }

    pub fn state(&self) -> SessionState {
        match self.lock_worker().as_ref() {
            Some(w) if w.is_alive() => w.status.get(),
            _ => SessionState::Disconnected,
        }
    }

    pub fn status(&self) -> SupervisorStatus {
        let guard = self.lock_worker();
        let worker_alive = guard.as_ref().is_some_and(WorkerHandle::is_alive);
        SupervisorStatus {
            state: match guard.as_ref() {
                Some(w) if worker_alive => w.status.get(),
                _ => SessionState::Disconnected,
            },
            worker_attached: guard.is_some(),
            worker_alive,
            fleet_size: self.store.len(),
        }
    }

    /// Close the session, best effort.
    ///
    /// Close errors are logged.  Afterwards the store is empty and
    /// [`is_connected`][Self::is_connected] is `false` whatever happened.
    /// Without an attached worker this does nothing.
    pub fn disconnect(&self) {
        let Some(handle) = self.lock_worker().take() else {
            debug!("disconnect requested without an attached worker");
            return;
        };

        if handle.is_alive() {
            let (reply, completion) = completion_pair();
            match handle.submit(WorkerCommand::Disconnect { reply }) {
                Ok(()) => {
                    if let Err(e) = completion.wait(DISCONNECT_WAIT) {
                        warn!(error = %e, "graceful disconnect did not complete");
                    }
                }
                Err(e) => warn!(error = %e, "could not ask worker to disconnect"),
            }
        }
        // A worker still busy past the wait keeps running until it reaches
        // the disconnect request; from here on it cannot touch the store or
        // the bus, which may already belong to the next session.
        handle.status.detach();
        // Dropping the handle closes the command queue, which stops a worker
        // that never saw the disconnect request.
        drop(handle);

        let removed = self.store.clear();
        self.bus
            .publish(Topic::Fleet, Event::new(SOURCE, FleetEvent::FleetCleared));
        self.publish_state(SessionState::Disconnected);
        info!(removed, "disconnected from broker");
    }

    /// Queue `command` for the worker.  Fails when no connected session
    /// exists.
    pub(crate) fn submit(&self, command: WorkerCommand) -> Result<(), FleetError> {
        match self.lock_worker().as_ref() {
            Some(w) if w.is_alive() && w.status.get() == SessionState::Connected => {
                w.submit(command)
            }
            _ => Err(FleetError::DispatchUnavailable(
                "not connected to a broker".to_string(),
            )),
        }
    }

    fn publish_state(&self, state: SessionState) {
        self.bus.publish(
            Topic::Connectivity,
            Event::new(SOURCE, FleetEvent::SessionStateChanged(state)),
        );
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<WorkerHandle>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker
// ─────────────────────────────────────────────────────────────────────────────

struct SessionWorker {
    broker: BrokerAddress,
    credentials: Credentials,
    identity: ClientIdentity,
    factory: Arc<dyn ClientFactory>,
    store: Arc<FleetStateStore>,
    bus: Arc<EventBus>,
    status: Arc<SessionStatus>,
    commands: mpsc::Receiver<WorkerCommand>,
}

impl SessionWorker {
    fn run(self) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!(error = %e, "failed to build worker runtime");
                self.finish();
                return;
            }
        };
        runtime.block_on(self.session());
    }

    async fn session(mut self) {
        let mut client = match self
            .factory
            .create(&self.broker, &self.credentials, &self.identity)
        {
            Ok(client) => client,
            Err(e) => {
                error!(broker = %self.broker, error = %e, "could not create protocol client");
                self.finish();
                return;
            }
        };

        if let Err(e) = client.connect().await {
            error!(broker = %self.broker, error = %e, "broker handshake failed");
            self.finish();
            return;
        }

        let attached = self.status.while_attached(|| {
            self.status.set(SessionState::Connected);
            self.publish(Topic::Connectivity, FleetEvent::SessionStateChanged(SessionState::Connected));
        });
        if attached.is_none() {
            debug!(broker = %self.broker, "handshake finished after detach");
            if let Err(e) = client.disconnect().await {
                debug!(error = %e, "disconnect after supervisor detach failed");
            }
            return;
        }
        info!(broker = %self.broker, "connected to broker");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(WorkerCommand::SendOrder { order, reply }) => {
                        reply.complete(client.send_order(&order).await);
                    }
                    Some(WorkerCommand::SendInstantActions { actions, reply }) => {
                        reply.complete(client.send_instant_actions(&actions).await);
                    }
                    Some(WorkerCommand::Disconnect { reply }) => {
                        let result = client.disconnect().await;
                        if let Err(e) = &result {
                            warn!(broker = %self.broker, error = %e, "broker disconnect failed");
                        }
                        self.finish();
                        reply.complete(result);
                        return;
                    }
                    None => {
                        if let Err(e) = client.disconnect().await {
                            debug!(error = %e, "disconnect after supervisor detach failed");
                        }
                        break;
                    }
                },
                event = client.next_event() => match event {
                    Some(ClientEvent::State { serial, state }) => self.apply_state(&serial, &state),
                    Some(ClientEvent::VehicleConnection { serial, connection }) => {
                        self.apply_connection(&serial, &connection);
                    }
                    Some(ClientEvent::BrokerLost(reason)) => {
                        warn!(broker = %self.broker, reason = %reason, "broker session lost");
                        break;
                    }
                    None => {
                        warn!(broker = %self.broker, "inbound stream ended");
                        break;
                    }
                },
            }
        }

        self.finish();
    }

    fn apply_state(&self, serial: &str, state: &State) {
        if !state.serial_number.is_empty() && state.serial_number != serial {
            warn!(
                topic_serial = serial,
                payload_serial = %state.serial_number,
                "state serial differs from topic, keeping topic serial"
            );
        }
        let applied = self.status.while_attached(|| {
            let snapshot = self.store.upsert(serial, |s| s.apply_state(state, Utc::now()));
            debug!(serial, battery = snapshot.battery_percent, "state applied");
            self.publish(Topic::Fleet, FleetEvent::SnapshotUpdated(snapshot));
        });
        if applied.is_none() {
            debug!(serial, "state dropped, worker detached");
        }
    }

    fn apply_connection(&self, serial: &str, connection: &Connection) {
        let applied = self.status.while_attached(|| {
            let snapshot = self
                .store
                .upsert(serial, |s| s.apply_connection(connection, Utc::now()));
            info!(serial, state = %connection.connection_state, "vehicle connection changed");
            self.publish(Topic::Fleet, FleetEvent::SnapshotUpdated(snapshot));
        });
        if applied.is_none() {
            debug!(serial, "connection report dropped, worker detached");
        }
    }

    /// Session over: mark disconnected and drop the fleet view.  A detached
    /// worker leaves both alone; the supervisor already cleaned up.
    fn finish(&self) {
        self.status.set(SessionState::Disconnected);
        let cleared = self.status.while_attached(|| {
            let removed = self.store.clear();
            self.publish(Topic::Fleet, FleetEvent::FleetCleared);
            self.publish(
                Topic::Connectivity,
                FleetEvent::SessionStateChanged(SessionState::Disconnected),
            );
            removed
        });
        match cleared {
            Some(removed) => debug!(removed, "session finished"),
            None => debug!("detached session finished"),
        }
    }

    fn publish(&self, topic: Topic, payload: FleetEvent) {
        self.bus.publish(topic, Event::new(SOURCE, payload));
    }
}
