use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message, tungstenite::Utf8Bytes};

use crate::{
    error::TransportError,
    exchanges::adapter::ExchangeAdapter,
    metrics::METRICS,
    publisher::Publisher,
    schema::{DataType, Venue},
    util,
};

use super::backoff::BackoffPolicy;

// ------------------------------------------------------------
// Connection state
// ------------------------------------------------------------
//
//   INIT ── connect ──▶ HANDSHAKING ── ok ──▶ OPEN ── closed ──▶ RECONNECT_WAIT
//     │                       │                                       │
//     │                       └─ fail ─▶ RECONNECT_WAIT ◀─ backoff ───┘
//     └── stopped ──▶ CLOSED (terminal)
//
// The state lives in an atomic so the supervisor and the status
// endpoint read it without touching the connection task.
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    Init = 0,
    Handshaking = 1,
    Open = 2,
    ReconnectWait = 3,
    Closed = 4,
}

impl ClientState {
    fn from_u8(v: u8) -> ClientState {
        match v {
            0 => ClientState::Init,
            1 => ClientState::Handshaking,
            2 => ClientState::Open,
            3 => ClientState::ReconnectWait,
            _ => ClientState::Closed,
        }
    }
}

/// Commands submitted to the connection task. Writes race with
/// incoming frames by design; the select loop serializes them.
#[derive(Debug)]
pub enum ClientCommand {
    /// Write one text frame (subscribe messages).
    Send(String),
    /// Drive the state machine to CLOSED.
    Stop,
}

/// Connection lifecycle notifications to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Connected(Venue, DataType),
    Disconnected(Venue, DataType),
    /// Retry budget exhausted or stop requested; terminal.
    Closed(Venue, DataType),
}

/// State shared between the connection task and its observers.
pub struct ClientShared {
    pub venue: Venue,
    pub data_type: DataType,
    state: AtomicU8,
    stop: AtomicBool,
    /// Whether the current OPEN episode has had its subscribe
    /// frames written successfully.
    subscribed: AtomicBool,
    /// Subscribe sends attempted during the current OPEN
    /// episode. Reset on every (re)connect; the supervisor caps
    /// it.
    subscribe_attempts: AtomicU32,
}

impl ClientShared {
    pub fn new(venue: Venue, data_type: DataType) -> Arc<ClientShared> {
        Arc::new(ClientShared {
            venue,
            data_type,
            state: AtomicU8::new(ClientState::Init as u8),
            stop: AtomicBool::new(false),
            subscribed: AtomicBool::new(false),
            subscribe_attempts: AtomicU32::new(0),
        })
    }

    #[inline]
    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.state() == ClientState::Open
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    #[inline]
    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn set_state(&self, state: ClientState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn subscribe_attempts(&self) -> u32 {
        self.subscribe_attempts.load(Ordering::Acquire)
    }

    pub fn bump_subscribe_attempts(&self) -> u32 {
        self.subscribe_attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    pub fn set_subscribed(&self) {
        self.subscribed.store(true, Ordering::Release);
    }

    /// Begins a fresh OPEN episode: no subscription issued, no
    /// attempts spent.
    pub fn reset_subscription_state(&self) {
        self.subscribed.store(false, Ordering::Release);
        self.subscribe_attempts.store(0, Ordering::Release);
    }

    #[cfg(test)]
    pub fn force_state_for_tests(&self, state: ClientState) {
        self.set_state(state);
    }
}

/// One persistent framed connection for a `(venue, data_type)`
/// pair.
///
/// GUARANTEES:
/// - frame delivery is single-threaded per connection, so the
///   parse→publish pipeline for a pair is serialized
/// - the loop only exits through CLOSED (budget exhausted or
///   stop requested); every other failure reconnects
pub struct StreamingClient {
    adapter: Arc<dyn ExchangeAdapter>,
    data_type: DataType,
    publisher: Arc<Publisher>,
    shared: Arc<ClientShared>,
    backoff: BackoffPolicy,
    events: mpsc::Sender<ClientEvent>,
}

impl StreamingClient {
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        data_type: DataType,
        publisher: Arc<Publisher>,
        shared: Arc<ClientShared>,
        backoff: BackoffPolicy,
        events: mpsc::Sender<ClientEvent>,
    ) -> StreamingClient {
        StreamingClient { adapter, data_type, publisher, shared, backoff, events }
    }

    /// Runs the connection until CLOSED. Owns the command
    /// receiver for its whole life.
    pub async fn run(self, mut commands: mpsc::Receiver<ClientCommand>) {
        let venue = self.adapter.venue();
        let mut attempts: u32 = 0;

        loop {
            if self.shared.stopping() {
                break;
            }

            self.shared.set_state(ClientState::Handshaking);
            match connect_async(self.adapter.ws_url()).await {
                Ok((ws, _)) => {
                    attempts = 0;
                    self.shared.reset_subscription_state();
                    self.shared.set_state(ClientState::Open);
                    METRICS.ws_connections_active.fetch_add(1, Ordering::Relaxed);
                    info!("{venue}/{} connected", self.data_type);
                    let _ = self.events.send(ClientEvent::Connected(venue, self.data_type)).await;

                    let stopped = self.run_open(ws, &mut commands).await;

                    METRICS.ws_connections_active.fetch_sub(1, Ordering::Relaxed);
                    let _ =
                        self.events.send(ClientEvent::Disconnected(venue, self.data_type)).await;
                    if stopped || self.shared.stopping() {
                        break;
                    }
                    METRICS.venue(venue).reconnects.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    METRICS.venue(venue).transport_errors.fetch_add(1, Ordering::Relaxed);
                    let err = TransportError::Connect(e.to_string());
                    warn!("{venue}/{}: {err}", self.data_type);
                }
            }

            // Backoff, or give up once the budget is spent.
            let Some(delay) = self.backoff.delay_jittered(attempts) else {
                warn!("{venue}/{} retry budget exhausted", self.data_type);
                break;
            };
            attempts += 1;

            self.shared.set_state(ClientState::ReconnectWait);
            debug!("{venue}/{} reconnecting in {delay:?}", self.data_type);
            tokio::select! {
                _ = sleep(delay) => {}
                stop = wait_for_stop(&mut commands) => {
                    if stop {
                        break;
                    }
                }
            }
        }

        self.shared.set_state(ClientState::Closed);
        let _ = self.events.send(ClientEvent::Closed(venue, self.data_type)).await;
    }

    /// Serves one OPEN connection. Returns true when a stop was
    /// requested, false to reconnect.
    async fn run_open(
        &self,
        ws: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        commands: &mut mpsc::Receiver<ClientCommand>,
    ) -> bool {
        let venue = self.adapter.venue();
        let (mut write, mut read) = ws.split();

        // Venue-level heartbeat, distinct from WS control pings.
        let heartbeat = self.adapter.heartbeat();
        let mut heartbeat_timer = tokio::time::interval(
            heartbeat.map(|(interval, _)| interval).unwrap_or(Duration::from_secs(3600)),
        );
        heartbeat_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat_timer.reset();

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text),

                    // Control pings are answered in place, before
                    // the next frame is read.
                    Some(Ok(Message::Ping(payload))) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            METRICS.venue(venue).transport_errors.fetch_add(1, Ordering::Relaxed);
                            return false;
                        }
                    }

                    Some(Ok(Message::Close(_))) => {
                        debug!("{venue}/{}: {}", self.data_type, TransportError::PeerClose);
                        return false;
                    }

                    // Pongs and binary frames carry no data here.
                    Some(Ok(_)) => {}

                    Some(Err(e)) => {
                        METRICS.venue(venue).transport_errors.fetch_add(1, Ordering::Relaxed);
                        let err = TransportError::Stream(e.to_string());
                        warn!("{venue}/{}: {err}", self.data_type);
                        return false;
                    }

                    None => {
                        debug!("{venue}/{} stream ended", self.data_type);
                        return false;
                    }
                },

                cmd = commands.recv() => match cmd {
                    Some(ClientCommand::Send(frame)) => {
                        if let Err(e) = write.send(Message::Text(Utf8Bytes::from(frame))).await {
                            METRICS.venue(venue).transport_errors.fetch_add(1, Ordering::Relaxed);
                            let err = TransportError::Write(e.to_string());
                            warn!("{venue}/{}: {err}", self.data_type);
                            return false;
                        }
                        METRICS.venue(venue).subscriptions_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Some(ClientCommand::Stop) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        return true;
                    }
                },

                _ = heartbeat_timer.tick() => {
                    if let Some((_, frame)) = heartbeat {
                        if write.send(Message::Text(Utf8Bytes::from(frame))).await.is_err() {
                            METRICS.venue(venue).transport_errors.fetch_add(1, Ordering::Relaxed);
                            return false;
                        }
                    }
                }
            }
        }
    }

    /// Dispatches one text frame: timestamp, classify, parse,
    /// publish. CPU-bound, never suspends, never unwinds.
    fn handle_frame(&self, text: &str) {
        // Stamped before anything else looks at the frame.
        let gateway_ts_ns = util::now_ns();
        let venue = self.adapter.venue();
        METRICS.venue(venue).messages_in.fetch_add(1, Ordering::Relaxed);

        let result = match self.adapter.classify(text) {
            DataType::Ticker => self
                .adapter
                .parse_ticker(text, gateway_ts_ns)
                .map(|t| self.publisher.publish_ticker(&t)),
            DataType::Trades => self
                .adapter
                .parse_trade(text, gateway_ts_ns)
                .map(|t| self.publisher.publish_trade(&t)),
            DataType::OrderBook => self
                .adapter
                .parse_order_book(text, gateway_ts_ns)
                .map(|ob| self.publisher.publish_order_book(&ob)),
            // Acks, heartbeats and error envelopes are dropped
            // without a parser call.
            DataType::Unknown => return,
        };

        if let Err(e) = result {
            // Frames racing a shutdown are torn by design and
            // not reported.
            if !self.shared.stopping() {
                METRICS.venue(venue).parse_errors.fetch_add(1, Ordering::Relaxed);
                debug!("{venue}/{} parse error: {e}", self.data_type);
            }
        }
    }
}

/// Drains commands while sleeping in RECONNECT_WAIT; only Stop
/// matters there (subscribe frames race reconnects and are
/// reissued by reconciliation once OPEN again).
async fn wait_for_stop(commands: &mut mpsc::Receiver<ClientCommand>) -> bool {
    loop {
        match commands.recv().await {
            Some(ClientCommand::Stop) | None => return true,
            Some(ClientCommand::Send(_)) => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_the_atomic() {
        let shared = ClientShared::new(Venue::Okx, DataType::Trades);
        assert_eq!(shared.state(), ClientState::Init);
        shared.set_state(ClientState::Open);
        assert!(shared.is_open());
        shared.set_state(ClientState::ReconnectWait);
        assert_eq!(shared.state(), ClientState::ReconnectWait);
        shared.set_state(ClientState::Closed);
        assert_eq!(shared.state(), ClientState::Closed);
    }

    #[test]
    fn subscribe_attempts_reset_is_observable() {
        let shared = ClientShared::new(Venue::Binance, DataType::Ticker);
        assert_eq!(shared.subscribe_attempts(), 0);
        assert_eq!(shared.bump_subscribe_attempts(), 1);
        assert_eq!(shared.bump_subscribe_attempts(), 2);
        shared.set_subscribed();
        assert!(shared.is_subscribed());
        shared.reset_subscription_state();
        assert_eq!(shared.subscribe_attempts(), 0);
        assert!(!shared.is_subscribed());
    }

    #[tokio::test]
    async fn budget_exhaustion_reaches_closed() {
        // Unroutable endpoint: every connect fails fast.
        struct DeadAdapter;
        impl ExchangeAdapter for DeadAdapter {
            fn venue(&self) -> Venue {
                Venue::Binance
            }
            fn ws_url(&self) -> &'static str {
                "wss://127.0.0.1:1/ws"
            }
            fn build_subscribe_messages(&self, _: DataType, _: &[String]) -> Vec<String> {
                Vec::new()
            }
            fn classify(&self, _: &str) -> DataType {
                DataType::Unknown
            }
            fn parse_ticker(
                &self,
                _: &str,
                _: i64,
            ) -> Result<crate::schema::Ticker, crate::error::ParseError> {
                Err(crate::error::ParseError::Structure("unused"))
            }
            fn parse_trade(
                &self,
                _: &str,
                _: i64,
            ) -> Result<crate::schema::Trade, crate::error::ParseError> {
                Err(crate::error::ParseError::Structure("unused"))
            }
            fn parse_order_book(
                &self,
                _: &str,
                _: i64,
            ) -> Result<crate::schema::OrderBook, crate::error::ParseError> {
                Err(crate::error::ParseError::Structure("unused"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let publisher = Arc::new(Publisher::new(dir.path().to_path_buf()));
        let shared = ClientShared::new(Venue::Binance, DataType::Ticker);
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (_cmd_tx, cmd_rx) = mpsc::channel(16);

        let backoff = BackoffPolicy {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(2),
            multiplier: 1.0,
            budget: 2,
        };
        let client = StreamingClient::new(
            Arc::new(DeadAdapter),
            DataType::Ticker,
            publisher,
            shared.clone(),
            backoff,
            events_tx,
        );

        client.run(cmd_rx).await;

        assert_eq!(shared.state(), ClientState::Closed);
        assert_eq!(
            events_rx.recv().await,
            Some(ClientEvent::Closed(Venue::Binance, DataType::Ticker))
        );
    }

    #[tokio::test]
    async fn stop_request_short_circuits_reconnect_wait() {
        struct DeadAdapter;
        impl ExchangeAdapter for DeadAdapter {
            fn venue(&self) -> Venue {
                Venue::Bybit
            }
            fn ws_url(&self) -> &'static str {
                "wss://127.0.0.1:1/ws"
            }
            fn build_subscribe_messages(&self, _: DataType, _: &[String]) -> Vec<String> {
                Vec::new()
            }
            fn classify(&self, _: &str) -> DataType {
                DataType::Unknown
            }
            fn parse_ticker(
                &self,
                _: &str,
                _: i64,
            ) -> Result<crate::schema::Ticker, crate::error::ParseError> {
                Err(crate::error::ParseError::Structure("unused"))
            }
            fn parse_trade(
                &self,
                _: &str,
                _: i64,
            ) -> Result<crate::schema::Trade, crate::error::ParseError> {
                Err(crate::error::ParseError::Structure("unused"))
            }
            fn parse_order_book(
                &self,
                _: &str,
                _: i64,
            ) -> Result<crate::schema::OrderBook, crate::error::ParseError> {
                Err(crate::error::ParseError::Structure("unused"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let publisher = Arc::new(Publisher::new(dir.path().to_path_buf()));
        let shared = ClientShared::new(Venue::Bybit, DataType::Trades);
        let (events_tx, _events_rx) = mpsc::channel(16);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        // A long backoff that the stop must cut through.
        let backoff = BackoffPolicy {
            initial: Duration::from_secs(3600),
            max: Duration::from_secs(3600),
            multiplier: 1.0,
            budget: 10,
        };
        let client = StreamingClient::new(
            Arc::new(DeadAdapter),
            DataType::Trades,
            publisher,
            shared.clone(),
            backoff,
            events_tx,
        );

        let task = tokio::spawn(client.run(cmd_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shared.request_stop();
        cmd_tx.send(ClientCommand::Stop).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(shared.state(), ClientState::Closed);
    }
}
