//! # Polling Client
//!
//! Owns one bus connection and runs a fixed-period cycle against it. Each
//! tick does exactly one of:
//!
//! 1. **Health check**: when the bus is down, count the failed check and
//!    reconnect once the count exceeds the threshold.
//! 2. **Write flush**: drain the write queue and issue every entry, coils
//!    first, then registers.
//! 3. **Suppressed read**: skip the read right after a flush.
//! 4. **Read all ranges**: four block reads bounded by half the poll
//!    interval, published through `on_result`.
//!
//! The next tick is scheduled only after the current one completes, so at
//! most one bus operation is ever in flight.
//!
//! ```rust,no_run
//! use heru_modbus::{ConnectParams, PollerConfig, PollingClient, RegisterMap};
//!
//! #[tokio::main]
//! async fn main() -> heru_modbus::ModbusResult<()> {
//!     let config = PollerConfig::new(RegisterMap::gen3(), ConnectParams::new("192.168.1.50", 4001));
//!     let client = PollingClient::over_tcp(config)?;
//!
//!     client.on_result(|result| println!("{} holding registers", result.holding_registers.len()));
//!     client.on_unavailable(|reason| eprintln!("unavailable: {}", reason));
//!
//!     client.queue_coil(2, true); // boost
//!     tokio::signal::ctrl_c().await.ok();
//!     client.destroy().await;
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{ModbusClient, ModbusTcpClient};
use crate::config::{ConnectParams, PollerConfig};
use crate::error::{ModbusError, ModbusResult, PollError};
use crate::protocol::UnitId;
use crate::queue::{PendingWrites, WriteQueue};
use crate::register_map::{Block, RegisterMap};

/// Snapshot of one complete read cycle.
///
/// Blocks start at their configured range start; use
/// [`RegisterMap::index_of`] or the named accessors to locate a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult {
    pub coils: Vec<bool>,
    pub discrete_inputs: Vec<bool>,
    pub input_registers: Vec<u16>,
    pub holding_registers: Vec<u16>,
    /// When the last block read completed
    pub timestamp: DateTime<Utc>,
}

impl PollResult {
    pub fn coil(&self, map: &RegisterMap, name: &str) -> Option<bool> {
        let index = map.index_of(Block::Coils, name)?;
        self.coils.get(index).copied()
    }

    pub fn discrete_input(&self, map: &RegisterMap, name: &str) -> Option<bool> {
        let index = map.index_of(Block::DiscreteInputs, name)?;
        self.discrete_inputs.get(index).copied()
    }

    pub fn input_register(&self, map: &RegisterMap, name: &str) -> Option<u16> {
        let index = map.index_of(Block::InputRegisters, name)?;
        self.input_registers.get(index).copied()
    }

    pub fn holding_register(&self, map: &RegisterMap, name: &str) -> Option<u16> {
        let index = map.index_of(Block::HoldingRegisters, name)?;
        self.holding_registers.get(index).copied()
    }
}

/// Bus session state as seen by the poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Counters kept by the poll loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStats {
    pub total_ticks: u64,
    pub successful_reads: u64,
    pub failed_reads: u64,
    /// Ticks skipped after a flush plus reads discarded because a write was queued meanwhile
    pub suppressed_reads: u64,
    pub writes_issued: u64,
    pub writes_failed: u64,
    pub reconnects: u64,
    pub last_success: Option<DateTime<Utc>>,
}

/// Strategy that turns raw snapshots into domain events.
///
/// Supplies the register map the client polls and decodes each successful
/// [`PollResult`] for the consumer.
pub trait DeviceProfile: Send + Sync + 'static {
    type Event;

    fn register_map(&self) -> &RegisterMap;

    fn decode(&self, result: &PollResult) -> Self::Event;
}

type ResultCallback = Arc<dyn Fn(&PollResult) + Send + Sync>;
type UnavailableCallback = Arc<dyn Fn(&str) + Send + Sync>;
type AvailableCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Observers {
    on_result: Option<ResultCallback>,
    on_unavailable: Option<UnavailableCallback>,
    on_available: Option<AvailableCallback>,
}

/// State shared between the consumer handle and the poll task
pub(crate) struct Shared {
    queue: Mutex<WriteQueue>,
    suppress_next_read: AtomicBool,
    available: AtomicBool,
    poll_interval_ms: AtomicU32,
    state: Mutex<ConnectionState>,
    stats: Mutex<PollStats>,
    observers: Mutex<Observers>,
}

impl Shared {
    fn new(poll_interval_ms: u32) -> Self {
        Self {
            queue: Mutex::new(WriteQueue::new()),
            suppress_next_read: AtomicBool::new(false),
            available: AtomicBool::new(false),
            poll_interval_ms: AtomicU32::new(poll_interval_ms),
            state: Mutex::new(ConnectionState::Disconnected),
            stats: Mutex::new(PollStats::default()),
            observers: Mutex::new(Observers::default()),
        }
    }

    fn queue_coil_write(&self, start_address: u16, values: Vec<bool>) {
        debug!("Queued {} coil(s) at {}", values.len(), start_address);
        self.queue.lock().push_coils(start_address, values);
        self.suppress_next_read.store(true, Ordering::SeqCst);
    }

    fn queue_register_write(&self, start_address: u16, values: Vec<u16>) {
        debug!("Queued {} register(s) at {}", values.len(), start_address);
        self.queue.lock().push_registers(start_address, values);
        self.suppress_next_read.store(true, Ordering::SeqCst);
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.load(Ordering::SeqCst) as u64)
    }

    fn read_timeout_ms(&self) -> u64 {
        (self.poll_interval_ms.load(Ordering::SeqCst) as u64 / 2).max(1)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    // Callbacks are cloned out so none runs under the observers lock

    fn notify_result(&self, result: &PollResult) {
        let callback = self.observers.lock().on_result.clone();
        if let Some(callback) = callback {
            callback(result);
        }
    }

    fn notify_unavailable(&self, reason: &str) {
        self.available.store(false, Ordering::SeqCst);
        let callback = self.observers.lock().on_unavailable.clone();
        if let Some(callback) = callback {
            callback(reason);
        }
    }

    fn notify_available(&self) {
        self.available.store(true, Ordering::SeqCst);
        let callback = self.observers.lock().on_available.clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// Session state seen at the start of a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Health {
    Open,
    Closed,
    /// Closed since the last tick, and `on_unavailable` already fired
    Lost,
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    /// Bus down, below the reconnect threshold
    Disconnected,
    /// Threshold exceeded, reconnect attempted
    Reconnected,
    /// Write queue flushed
    Flushed,
    /// Read skipped or discarded after a write
    Suppressed,
    /// Snapshot published
    Published,
    /// Read failed or timed out
    ReadFailed,
}

/// Tick state machine over one bus.
///
/// Driven by the task [`PollingClient`] spawns; never shared.
pub(crate) struct Poller<C: ModbusClient> {
    bus: C,
    shared: Arc<Shared>,
    map: RegisterMap,
    params: ConnectParams,
    unit_id: UnitId,
    reconnect_threshold: u32,
    failure_count: u32,
}

impl<C: ModbusClient> Poller<C> {
    fn new(config: PollerConfig, bus: C, shared: Arc<Shared>) -> Self {
        Self {
            bus,
            shared,
            map: config.register_map,
            params: config.connect,
            unit_id: config.unit_id,
            reconnect_threshold: config.reconnect_threshold,
            failure_count: 0,
        }
    }

    /// Open the session. Failure is reported to `on_unavailable`.
    pub(crate) async fn connect(&mut self) -> bool {
        self.shared.set_state(ConnectionState::Connecting);
        info!(
            "Connecting to {} ({})",
            self.params.address(),
            if self.params.use_tcp { "tcp" } else { "rtu" }
        );

        match self.bus.connect(&self.params).await {
            Ok(()) => {
                self.shared.set_state(ConnectionState::Connected);
                info!("Connected to {}", self.params.address());
                true
            }
            Err(source) => {
                self.shared.set_state(ConnectionState::Failed);
                let err = PollError::Connect {
                    host: self.params.host.clone(),
                    port: self.params.port,
                    source,
                };
                error!("{} --> {}", err, err_source(&err));
                self.shared.notify_unavailable(&err.to_string());
                false
            }
        }
    }

    /// Reset the failure counter, close, and connect with `params`
    pub(crate) async fn reconnect(&mut self, params: ConnectParams) {
        self.failure_count = 0;
        if let Err(e) = self.bus.close().await {
            debug!("Close before reconnect failed: {}", e);
        }
        info!("Reconnecting to {}", params.address());
        self.params = params;
        self.shared.stats.lock().reconnects += 1;
        self.connect().await;
    }

    pub(crate) async fn close(&mut self) {
        if let Err(e) = self.bus.close().await {
            debug!("Close failed: {}", e);
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Sync the recorded state with the bus
    fn check_health(&mut self) -> Health {
        let connected = self.bus.is_connected();
        let lost = {
            let mut state = self.shared.state.lock();
            let lost = !connected && *state == ConnectionState::Connected;
            if lost {
                *state = ConnectionState::Disconnected;
            }
            lost
        };

        if connected {
            return Health::Open;
        }
        if lost {
            warn!("Connection to {} lost", self.params.address());
            if self.shared.available.load(Ordering::SeqCst) {
                self.shared.notify_unavailable(&format!(
                    "Lost connection to {}",
                    self.params.address()
                ));
                return Health::Lost;
            }
        }
        Health::Closed
    }

    /// Run one cycle
    pub(crate) async fn tick(&mut self) -> TickOutcome {
        self.shared.stats.lock().total_ticks += 1;

        let health = self.check_health();
        let connected = health == Health::Open;
        if !connected {
            self.failure_count += 1;
        }
        // One unavailable report per tick; the reconnect waits for the next one
        if self.failure_count > self.reconnect_threshold && health != Health::Lost {
            warn!(
                "{} failed checks against {}, reconnecting",
                self.failure_count,
                self.params.address()
            );
            let params = self.params.clone();
            self.reconnect(params).await;
            return TickOutcome::Reconnected;
        }
        if !connected {
            debug!(
                "Not connected ({}/{})",
                self.failure_count, self.reconnect_threshold
            );
            return TickOutcome::Disconnected;
        }

        let pending = self.shared.queue.lock().drain_all();
        if !pending.is_empty() {
            self.shared.suppress_next_read.store(true, Ordering::SeqCst);
            info!("Processing {} queued write(s), ignoring next read", pending.len());
            self.flush(pending).await;
            return TickOutcome::Flushed;
        }

        if self.shared.suppress_next_read.swap(false, Ordering::SeqCst) {
            debug!("Ignored read");
            self.shared.stats.lock().suppressed_reads += 1;
            return TickOutcome::Suppressed;
        }

        let timeout_ms = self.shared.read_timeout_ms();
        let outcome = match timeout(Duration::from_millis(timeout_ms), self.read_all()).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(source)) => Err(PollError::Read {
                host: self.params.host.clone(),
                port: self.params.port,
                source,
            }),
            Err(_) => Err(PollError::ReadTimeout {
                host: self.params.host.clone(),
                port: self.params.port,
                timeout_ms,
            }),
        };

        match outcome {
            Ok(result) => self.publish(result),
            Err(err) => {
                self.failure_count += 1;
                self.shared.stats.lock().failed_reads += 1;
                warn!("{}", err);
                self.shared.notify_unavailable(&err.to_string());
                TickOutcome::ReadFailed
            }
        }
    }

    fn publish(&mut self, result: PollResult) -> TickOutcome {
        self.failure_count = 0;
        {
            let mut stats = self.shared.stats.lock();
            stats.successful_reads += 1;
            stats.last_success = Some(result.timestamp);
        }

        if !self.shared.available.load(Ordering::SeqCst) {
            info!("{} available", self.params.address());
            self.shared.notify_available();
        }

        // A write queued while the read was in flight makes the snapshot stale
        if self.shared.suppress_next_read.swap(false, Ordering::SeqCst) {
            debug!("Ignored read results");
            self.shared.stats.lock().suppressed_reads += 1;
            return TickOutcome::Suppressed;
        }

        self.shared.notify_result(&result);
        TickOutcome::Published
    }

    /// Read the four configured ranges in order; any error fails the cycle
    async fn read_all(&mut self) -> ModbusResult<PollResult> {
        let unit = self.unit_id;
        let (coils, discrete_inputs, input_registers, holding_registers) = (
            self.map.coils,
            self.map.discrete_inputs,
            self.map.input_registers,
            self.map.holding_registers,
        );

        let coils = if coils.is_empty() {
            Vec::new()
        } else {
            self.bus.read_coils(unit, coils.start, coils.count).await?
        };
        let discrete_inputs = if discrete_inputs.is_empty() {
            Vec::new()
        } else {
            self.bus
                .read_discrete_inputs(unit, discrete_inputs.start, discrete_inputs.count)
                .await?
        };
        let input_registers = if input_registers.is_empty() {
            Vec::new()
        } else {
            self.bus
                .read_input_registers(unit, input_registers.start, input_registers.count)
                .await?
        };
        let holding_registers = if holding_registers.is_empty() {
            Vec::new()
        } else {
            self.bus
                .read_holding_registers(unit, holding_registers.start, holding_registers.count)
                .await?
        };

        Ok(PollResult {
            coils,
            discrete_inputs,
            input_registers,
            holding_registers,
            timestamp: Utc::now(),
        })
    }

    /// Issue every drained write once; failures are logged and dropped
    async fn flush(&mut self, pending: PendingWrites) {
        let unit = self.unit_id;

        for write in pending.coil_writes {
            let result = self
                .bus
                .write_multiple_coils(unit, write.start_address, &write.values)
                .await;
            match result {
                Ok(()) => info!(
                    "Successfully wrote to coils starting at {} --> {:?}",
                    write.start_address, write.values
                ),
                Err(source) => self.write_failed(Block::Coils, write.start_address, source),
            }
            self.shared.stats.lock().writes_issued += 1;
        }

        for write in pending.register_writes {
            let result = self
                .bus
                .write_multiple_registers(unit, write.start_address, &write.values)
                .await;
            match result {
                Ok(()) => info!(
                    "Successfully wrote to registers starting at {} --> {:?}",
                    write.start_address, write.values
                ),
                Err(source) => {
                    self.write_failed(Block::HoldingRegisters, write.start_address, source)
                }
            }
            self.shared.stats.lock().writes_issued += 1;
        }
    }

    fn write_failed(&self, block: Block, address: u16, source: ModbusError) {
        let err = PollError::Write {
            block,
            address,
            source,
        };
        warn!("{}", err);
        self.shared.stats.lock().writes_failed += 1;
    }
}

fn err_source(err: &PollError) -> String {
    std::error::Error::source(err)
        .map(|source| source.to_string())
        .unwrap_or_default()
}

enum Command {
    Reconnect(ConnectParams),
}

/// Poll loop: connect, then tick every interval until cancelled
async fn run<C: ModbusClient>(
    mut poller: Poller<C>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    token: CancellationToken,
) {
    let cancelled = tokio::select! {
        _ = token.cancelled() => true,
        _ = poller.connect() => false,
    };

    if !cancelled {
        let mut next = Instant::now() + poller.shared.poll_interval();
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Some(command) = commands.recv() => match command {
                    Command::Reconnect(params) => {
                        let stopped = tokio::select! {
                            _ = token.cancelled() => true,
                            _ = poller.reconnect(params) => false,
                        };
                        if stopped {
                            break;
                        }
                    }
                },
                _ = sleep_until(next) => {
                    let stopped = tokio::select! {
                        _ = token.cancelled() => true,
                        outcome = poller.tick() => {
                            debug!("Tick: {:?}", outcome);
                            false
                        }
                    };
                    if stopped {
                        break;
                    }
                    next = Instant::now() + poller.shared.poll_interval();
                }
            }
        }
    }

    poller.close().await;
    info!("Destroyed. Closed connection to {}", poller.params.address());
}

/// Handle to a running poll loop.
///
/// Created once per device connection. The loop starts immediately with a
/// connect attempt; the first tick follows one poll interval later.
/// Observers registered after creation do not see events emitted before
/// registration.
///
/// Dropping the handle cancels the loop; [`PollingClient::destroy`] also
/// waits for the bus to be closed.
pub struct PollingClient {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingClient {
    /// Start polling `bus` with `config`. Must be called inside a tokio runtime.
    pub fn new<C>(config: PollerConfig, bus: C) -> ModbusResult<Self>
    where
        C: ModbusClient + 'static,
    {
        config.validate()?;

        let shared = Arc::new(Shared::new(config.poll_interval_ms));
        let (commands, receiver) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        info!(
            "Polling {} every {}ms",
            config.connect.address(),
            config.poll_interval_ms
        );
        let poller = Poller::new(config, bus, Arc::clone(&shared));
        let task = tokio::spawn(run(poller, receiver, token.clone()));

        Ok(Self {
            shared,
            commands,
            token,
            task: Mutex::new(Some(task)),
        })
    }

    /// Start polling over a socket using the configured framing and request timeout
    pub fn over_tcp(config: PollerConfig) -> ModbusResult<Self> {
        let bus = ModbusTcpClient::new(config.request_timeout());
        Self::new(config, bus)
    }

    /// Poll with the profile's register map and deliver decoded events
    pub fn with_profile<P, C, F>(profile: P, config: PollerConfig, bus: C, on_event: F) -> ModbusResult<Self>
    where
        P: DeviceProfile,
        C: ModbusClient + 'static,
        F: Fn(P::Event) + Send + Sync + 'static,
    {
        let config = PollerConfig {
            register_map: profile.register_map().clone(),
            ..config
        };
        let client = Self::new(config, bus)?;
        client.on_result(move |result| on_event(profile.decode(result)));
        Ok(client)
    }

    /// Queue a multi-coil write for the next tick and suppress the following read
    pub fn queue_coil_write(&self, start_address: u16, values: Vec<bool>) {
        self.shared.queue_coil_write(start_address, values);
    }

    /// Queue a multi-register write for the next tick and suppress the following read
    pub fn queue_register_write(&self, start_address: u16, values: Vec<u16>) {
        self.shared.queue_register_write(start_address, values);
    }

    /// Single coil, sent as a one-element multi-coil write
    pub fn queue_coil(&self, address: u16, value: bool) {
        self.queue_coil_write(address, vec![value]);
    }

    /// Single register, sent as a one-element multi-register write
    pub fn queue_register(&self, address: u16, value: u16) {
        self.queue_register_write(address, vec![value]);
    }

    /// Number of writes waiting for the next flush
    pub fn pending_writes(&self) -> usize {
        self.shared.queue.lock().pending_count()
    }

    /// Close and reconnect with new parameters, resetting the failure counter
    pub fn reconnect(&self, params: ConnectParams) {
        if self.commands.send(Command::Reconnect(params)).is_err() {
            debug!("Reconnect ignored, poll loop stopped");
        }
    }

    /// Change the period; applies from the next reschedule
    pub fn set_poll_interval(&self, interval_ms: u32) {
        if interval_ms == 0 {
            warn!("Ignoring zero poll interval");
            return;
        }
        self.shared
            .poll_interval_ms
            .store(interval_ms, Ordering::SeqCst);
    }

    pub fn poll_interval(&self) -> Duration {
        self.shared.poll_interval()
    }

    pub fn on_result<F>(&self, callback: F)
    where
        F: Fn(&PollResult) + Send + Sync + 'static,
    {
        self.shared.observers.lock().on_result = Some(Arc::new(callback));
    }

    pub fn on_unavailable<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.shared.observers.lock().on_unavailable = Some(Arc::new(callback));
    }

    pub fn on_available<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.observers.lock().on_available = Some(Arc::new(callback));
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Whether the last read cycle succeeded
    pub fn is_available(&self) -> bool {
        self.shared.available.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PollStats {
        self.shared.stats.lock().clone()
    }

    /// Stop the loop and close the bus. Writes still queued are discarded.
    /// Safe to call more than once.
    pub async fn destroy(&self) {
        self.token.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Poll task ended abnormally: {}", e);
            }
        }
        let dropped = self.shared.queue.lock().clear();
        if dropped > 0 {
            warn!("Discarded {} pending write(s) on destroy", dropped);
        }
    }
}

impl Drop for PollingClient {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
