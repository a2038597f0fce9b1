use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{
    config::Config,
    exchanges::{adapter::ExchangeAdapter, get_adapter},
    metrics::METRICS,
    publisher::Publisher,
    schema::{ALL_VENUES, DataType},
};

use super::backoff::BackoffPolicy;
use super::client::{ClientCommand, ClientEvent, ClientShared, StreamingClient};

/// Subscription reconciliation period.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(2);

/// Subscribe sends per OPEN episode before the reconciliation
/// job gives up on a client (until its next reconnect).
const MAX_SUBSCRIBE_ATTEMPTS: u32 = 3;

/// Command queue depth per client. Subscriptions are tiny and
/// reissued by reconciliation, so a shallow queue is enough.
const COMMAND_QUEUE: usize = 16;

/// Bounded wait for client tasks on shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

// ------------------------------------------------------------
// Health view
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct VenueHealth {
    pub venue: &'static str,
    pub connected: bool,
    pub messages_in: u64,
    pub messages_out: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthView {
    pub gateway_id: String,
    pub venues: Vec<VenueHealth>,
}

// ------------------------------------------------------------
// Supervisor
// ------------------------------------------------------------

/// One wired `(venue, data_type)` client as the supervisor sees
/// it: observable state, a way to submit writes, and everything
/// needed to format its subscribe frames.
struct ClientEntry {
    shared: Arc<ClientShared>,
    commands: mpsc::Sender<ClientCommand>,
    adapter: Arc<dyn ExchangeAdapter>,
    symbols: Vec<String>,
}

impl ClientEntry {
    fn data_type(&self) -> DataType {
        self.shared.data_type
    }
}

/// State shared with the status endpoint.
pub struct SupervisorShared {
    gateway_id: String,
    entries: Vec<ClientEntry>,
}

impl SupervisorShared {
    /// Per-venue health, derived from client states and the
    /// metrics registry. Venues with no configured clients are
    /// omitted.
    pub fn health(&self) -> HealthView {
        let mut venues = Vec::new();
        for venue in ALL_VENUES {
            let clients: Vec<&ClientEntry> =
                self.entries.iter().filter(|e| e.shared.venue == venue).collect();
            if clients.is_empty() {
                continue;
            }
            let m = METRICS.venue(venue);
            venues.push(VenueHealth {
                venue: venue.name(),
                connected: clients.iter().any(|e| e.shared.is_open()),
                messages_in: m.messages_in.load(std::sync::atomic::Ordering::Relaxed),
                messages_out: m.messages_out.load(std::sync::atomic::Ordering::Relaxed),
                errors: m.errors(),
            });
        }
        HealthView { gateway_id: self.gateway_id.clone(), venues }
    }
}

/// Builds the per-venue clients, wires parser → publisher,
/// drives subscription reconciliation, and owns shutdown.
pub struct Supervisor {
    shared: Arc<SupervisorShared>,
    client_tasks: Vec<JoinHandle<()>>,
    service_tasks: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Constructs and starts everything enabled in `config`.
    pub fn start(config: &Config, publisher: Arc<Publisher>) -> Supervisor {
        let backoff = BackoffPolicy::with_budget(config.reconnect_max_retries);
        let (events_tx, events_rx) = mpsc::channel::<ClientEvent>(256);

        let mut entries = Vec::new();
        let mut client_tasks = Vec::new();

        for exchange in config.exchanges.iter().filter(|e| e.enabled) {
            let adapter = get_adapter(exchange.venue);
            let symbols = config.symbols_for(exchange.venue);
            if symbols.is_empty() {
                warn!("{} enabled with no symbols bound", exchange.venue);
            }
            info!(
                "starting {} clients: types={:?} compression={}",
                exchange.venue,
                exchange.data_types,
                adapter.permessage_deflate()
            );

            for &data_type in &exchange.data_types {
                let shared = ClientShared::new(exchange.venue, data_type);
                let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);

                let client = StreamingClient::new(
                    adapter.clone(),
                    data_type,
                    publisher.clone(),
                    shared.clone(),
                    backoff,
                    events_tx.clone(),
                );
                client_tasks.push(tokio::spawn(client.run(cmd_rx)));

                entries.push(ClientEntry {
                    shared,
                    commands: cmd_tx,
                    adapter: adapter.clone(),
                    symbols: symbols.clone(),
                });
            }
        }

        let shared = Arc::new(SupervisorShared { gateway_id: config.gateway_id.clone(), entries });

        let mut service_tasks = Vec::new();
        service_tasks.push(tokio::spawn(event_loop(shared.clone(), events_rx)));
        service_tasks.push(tokio::spawn(reconcile_loop(shared.clone())));
        service_tasks.push(tokio::spawn(health_log_loop(
            shared.clone(),
            Duration::from_millis(config.health_check_ms),
        )));

        Supervisor { shared, client_tasks, service_tasks }
    }

    pub fn shared(&self) -> Arc<SupervisorShared> {
        self.shared.clone()
    }

    /// Stops every client and waits out the bounded deadline.
    ///
    /// Order matters: reconciliation first so no subscribe frame
    /// races the stop commands, then the clients.
    pub async fn stop(self) {
        for task in &self.service_tasks {
            task.abort();
        }

        for entry in &self.shared.entries {
            entry.shared.request_stop();
            let _ = entry.commands.try_send(ClientCommand::Stop);
        }

        let drained = tokio::time::timeout(
            SHUTDOWN_DEADLINE,
            futures_util::future::join_all(self.client_tasks),
        )
        .await;
        if drained.is_err() {
            warn!("shutdown deadline elapsed with clients still running");
        }
        info!("supervisor stopped");
    }
}

// ------------------------------------------------------------
// Service loops
// ------------------------------------------------------------

/// Consumes connection lifecycle events. A fresh OPEN gets its
/// subscription job immediately instead of waiting out the next
/// reconciliation tick.
async fn event_loop(shared: Arc<SupervisorShared>, mut events: mpsc::Receiver<ClientEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Connected(venue, data_type) => {
                if let Some(entry) = shared
                    .entries
                    .iter()
                    .find(|e| e.shared.venue == venue && e.data_type() == data_type)
                {
                    try_subscribe(entry);
                }
            }
            ClientEvent::Disconnected(venue, data_type) => {
                debug!("{venue}/{data_type} disconnected");
            }
            ClientEvent::Closed(venue, data_type) => {
                warn!("{venue}/{data_type} closed (terminal)");
            }
        }
    }
}

/// The periodic reconciliation job: every OPEN client whose
/// subscription has not been issued gets another send, up to
/// the per-episode attempt cap. Tolerates connected-but-not-
/// ready windows without ever blocking.
async fn reconcile_loop(shared: Arc<SupervisorShared>) {
    let mut tick = tokio::time::interval(RECONCILE_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        for entry in &shared.entries {
            try_subscribe(entry);
        }
    }
}

/// Formats and submits the subscribe frames for one client if
/// it needs them. Never blocks: frames go over `try_send` and a
/// full queue just leaves the work to the next tick.
fn try_subscribe(entry: &ClientEntry) {
    if !entry.shared.is_open() || entry.shared.is_subscribed() || entry.symbols.is_empty() {
        return;
    }
    if entry.shared.subscribe_attempts() >= MAX_SUBSCRIBE_ATTEMPTS {
        return;
    }
    entry.shared.bump_subscribe_attempts();

    let frames = entry.adapter.build_subscribe_messages(entry.data_type(), &entry.symbols);
    for frame in frames {
        if entry.commands.try_send(ClientCommand::Send(frame)).is_err() {
            debug!(
                "{}/{} subscribe deferred, command queue busy",
                entry.shared.venue,
                entry.data_type()
            );
            return;
        }
    }
    entry.shared.set_subscribed();
}

/// Coarse periodic health line, one per configured venue.
async fn health_log_loop(shared: Arc<SupervisorShared>, period: Duration) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        for venue in shared.health().venues {
            info!(
                "health {}: connected={} in={} out={} errors={}",
                venue.venue, venue.connected, venue.messages_in, venue.messages_out, venue.errors
            );
        }
    }
}
