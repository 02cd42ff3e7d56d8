//! Channel handle and connection worker.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use sessionkit_core::{
    ClientConfig, Envelope, ReconnectPolicy, ServiceUrl, SocketConnector, SocketEvent, WebSocket,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

use super::state::{Backoff, ChannelState, Connectivity};
use crate::auth::{CredentialStore, RefreshCoordinator};

/// Close code for an intentional closure. Never triggers a reconnect.
pub const NORMAL_CLOSURE: u16 = 1000;

/// A stream of domain messages from the channel.
pub struct ChannelEvents {
    inner: Pin<Box<dyn Stream<Item = Envelope> + Send>>,
}

impl ChannelEvents {
    fn new(mut rx: mpsc::UnboundedReceiver<Envelope>) -> Self {
        let stream = async_stream::stream! {
            while let Some(envelope) = rx.recv().await {
                yield envelope;
            }
        };
        Self {
            inner: Box::pin(stream),
        }
    }
}

impl Stream for ChannelEvents {
    type Item = Envelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Handle to the session's real-time channel.
///
/// The connection lives on a worker task. It opens once the session is
/// authenticated and reconnects with exponential backoff after abnormal
/// closes. Logout closes the socket and parks the channel in
/// [`ChannelState::Idle`] until the next login. It closes for good on
/// [`close`](Self::close), when the handle is dropped, on a normal close from
/// the server, or after giving up on reconnecting.
///
/// # Example
///
/// ```no_run
/// # async fn example(mut channel: sessionkit::RealtimeChannel) {
/// while let Some(message) = channel.recv().await {
///     println!("{:?}: {:?}", message.kind, message.payload);
/// }
/// # }
/// ```
pub struct RealtimeChannel {
    state: watch::Receiver<ChannelState>,
    connectivity: watch::Receiver<Connectivity>,
    messages: Option<mpsc::UnboundedReceiver<Envelope>>,
    shutdown: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
}

impl RealtimeChannel {
    /// Start the channel worker. Must be called within a tokio runtime.
    pub fn spawn(
        config: &ClientConfig,
        connector: Arc<dyn SocketConnector>,
        store: &CredentialStore,
        coordinator: RefreshCoordinator,
    ) -> Self {
        let (state_tx, state) = watch::channel(ChannelState::Idle);
        let (connectivity_tx, connectivity) = watch::channel(Connectivity::Offline);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (messages_tx, messages) = mpsc::unbounded_channel();

        let worker = Worker {
            connector,
            coordinator,
            base_url: config.base_url.clone(),
            endpoint: config.realtime_endpoint.clone(),
            policy: config.reconnect.clone(),
            backoff: Backoff::new(config.reconnect.clone()),
            auth: store.subscribe_auth(),
            shutdown: shutdown_rx,
            state: state_tx,
            connectivity: connectivity_tx,
            messages: messages_tx,
        };

        Self {
            state,
            connectivity,
            messages: Some(messages),
            shutdown,
            worker: Some(tokio::spawn(worker.run())),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    pub fn connectivity(&self) -> Connectivity {
        *self.connectivity.borrow()
    }

    pub fn subscribe_connectivity(&self) -> watch::Receiver<Connectivity> {
        self.connectivity.clone()
    }

    /// Next domain message. `None` once the channel is closed and drained,
    /// or if the messages were handed to [`events`](Self::events).
    pub async fn recv(&mut self) -> Option<Envelope> {
        match self.messages.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Take the message stream. Returns `None` after the first call.
    pub fn events(&mut self) -> Option<ChannelEvents> {
        self.messages.take().map(ChannelEvents::new)
    }

    /// Close the socket with the normal closure code and stop reconnecting.
    pub async fn close(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(worker) = self.worker.take()
            && let Err(e) = worker.await
        {
            error!(error = %e, "Channel worker failed");
        }
    }
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("state", &self.state())
            .field("connectivity", &self.connectivity())
            .finish()
    }
}

/// Why a connection (or an attempt at one) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Shutdown,
    LoggedOut,
    /// The server closed with [`NORMAL_CLOSURE`].
    ClosedByServer,
    /// Abnormal close, dropped socket, or failed handshake.
    Dropped,
    /// Nothing a retry could fix.
    Fatal,
}

struct Worker {
    connector: Arc<dyn SocketConnector>,
    coordinator: RefreshCoordinator,
    base_url: ServiceUrl,
    endpoint: String,
    policy: ReconnectPolicy,
    backoff: Backoff,
    auth: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<ChannelState>,
    connectivity: watch::Sender<Connectivity>,
    messages: mpsc::UnboundedSender<Envelope>,
}

// Resolves when the channel must stop: teardown was requested (or the handle
// dropped), or the session ended.
async fn interrupted(
    shutdown: &mut watch::Receiver<bool>,
    auth: &mut watch::Receiver<bool>,
) -> Outcome {
    tokio::select! {
        _ = shutdown.wait_for(|stop| *stop) => Outcome::Shutdown,
        _ = auth.wait_for(|authenticated| !*authenticated) => Outcome::LoggedOut,
    }
}

impl Worker {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn run(mut self) {
        while self.session().await == Outcome::LoggedOut {
            info!("Session ended; waiting for the next login");
            self.backoff.reset();
            self.set_state(ChannelState::Idle);
        }
        self.set_state(ChannelState::Closed);
    }

    // Serves one authenticated session. Returns `LoggedOut` when the session
    // ends and the channel should wait for the next login; anything else
    // closes the channel for good.
    async fn session(&mut self) -> Outcome {
        if let Some(outcome) = self.wait_for_login().await {
            debug!(?outcome, "Channel stopped before login");
            return Outcome::Shutdown;
        }

        loop {
            self.set_state(ChannelState::Connecting {
                attempt: self.backoff.attempt(),
            });

            let outcome = match self.connect().await {
                Ok(socket) => {
                    self.backoff.reset();
                    self.set_state(ChannelState::Open);
                    self.connectivity.send_replace(Connectivity::Online);
                    info!("Channel open");
                    let outcome = self.pump(socket).await;
                    self.connectivity.send_replace(Connectivity::Offline);
                    outcome
                }
                Err(outcome) => outcome,
            };

            match outcome {
                Outcome::Dropped => {}
                Outcome::LoggedOut => return outcome,
                Outcome::Shutdown | Outcome::ClosedByServer | Outcome::Fatal => {
                    info!(?outcome, "Channel closed");
                    return outcome;
                }
            }

            let Some(delay) = self.backoff.next_delay() else {
                warn!(
                    attempts = self.backoff.attempt(),
                    "Reconnect attempts exhausted; giving up"
                );
                self.connectivity.send_replace(Connectivity::GaveUp);
                return Outcome::Fatal;
            };
            self.set_state(ChannelState::Reconnecting {
                attempt: self.backoff.attempt(),
                delay,
            });

            tokio::select! {
                outcome = interrupted(&mut self.shutdown, &mut self.auth) => {
                    info!(?outcome, "Reconnect cancelled");
                    return outcome;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    // Returns `None` once authenticated, or why the channel stopped first.
    async fn wait_for_login(&mut self) -> Option<Outcome> {
        tokio::select! {
            _ = self.shutdown.wait_for(|stop| *stop) => Some(Outcome::Shutdown),
            authenticated = self.auth.wait_for(|authenticated| *authenticated) => match authenticated {
                Ok(_) => None,
                Err(_) => Some(Outcome::Shutdown),
            },
        }
    }

    async fn connect(&mut self) -> Result<Box<dyn WebSocket>, Outcome> {
        // A refresh in flight is about to replace the token; connecting with
        // the old one would only be rejected.
        let token = tokio::select! {
            outcome = interrupted(&mut self.shutdown, &mut self.auth) => return Err(outcome),
            token = self.coordinator.wait_for_refresh() => token,
        };
        // With the session gone the backoff wait sees the logout; otherwise
        // the store could not be read and a later attempt may succeed.
        let Some(token) = token else {
            warn!("No access token for the channel");
            return Err(Outcome::Dropped);
        };

        let url = match self.base_url.realtime_url(&self.endpoint, token.as_str()) {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "Cannot build channel URL");
                return Err(Outcome::Fatal);
            }
        };

        debug!("Connecting");
        tokio::select! {
            outcome = interrupted(&mut self.shutdown, &mut self.auth) => Err(outcome),
            result = self.connector.connect(&url) => result.map_err(|e| {
                warn!(error = %e, "Channel handshake failed");
                Outcome::Dropped
            }),
        }
    }

    async fn pump(&mut self, mut socket: Box<dyn WebSocket>) -> Outcome {
        let period = self.policy.keepalive_interval();
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                outcome = interrupted(&mut self.shutdown, &mut self.auth) => {
                    if let Err(e) = socket.close(NORMAL_CLOSURE).await {
                        debug!(error = %e, "Close frame not sent");
                    }
                    return outcome;
                }
                _ = keepalive.tick() => {
                    if let Err(e) = send_ping(&mut *socket).await {
                        warn!(error = %e, "Keepalive failed");
                        return Outcome::Dropped;
                    }
                }
                event = socket.next_event() => match event {
                    SocketEvent::Text(text) => self.dispatch(&text),
                    SocketEvent::Closed { code: Some(NORMAL_CLOSURE), reason } => {
                        info!(reason = %reason, "Server closed channel");
                        return Outcome::ClosedByServer;
                    }
                    SocketEvent::Closed { code, reason } => {
                        warn!(?code, reason = %reason, "Channel dropped");
                        return Outcome::Dropped;
                    }
                },
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match Envelope::parse(text) {
            Ok(envelope) if envelope.kind.is_control() => {
                trace!(kind = ?envelope.kind, "Control frame");
            }
            Ok(envelope) => {
                debug!(kind = ?envelope.kind, "Message");
                if self.messages.send(envelope).is_err() {
                    trace!("No consumer; message dropped");
                }
            }
            Err(e) => warn!(error = %e, "Unreadable frame dropped"),
        }
    }

    fn set_state(&self, state: ChannelState) {
        debug!(%state, "Channel state");
        self.state.send_replace(state);
    }
}

async fn send_ping(socket: &mut dyn WebSocket) -> Result<(), sessionkit_core::Error> {
    let text = Envelope::ping().to_text()?;
    trace!("Sending keepalive");
    socket.send_text(text).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ClientFrame, FakeConnector, MockTransport, ServerEnd};
    use futures_util::StreamExt;
    use sessionkit_core::{AccessToken, MessageKind, RefreshToken};
    use std::time::Duration;

    struct Fixture {
        channel: RealtimeChannel,
        store: CredentialStore,
        connector: Arc<FakeConnector>,
        servers: mpsc::UnboundedReceiver<ServerEnd>,
    }

    fn fixture(logged_in: bool) -> Fixture {
        let store = CredentialStore::ephemeral();
        if logged_in {
            store
                .set(AccessToken::new("a-1"), RefreshToken::new("r-1"))
                .unwrap();
        }
        let coordinator = RefreshCoordinator::new(
            store.clone(),
            MockTransport::fixed(500, ""),
            "https://subs.example.com/api/auth/refresh",
        );
        let (connector, servers) = FakeConnector::new();
        let config = ClientConfig::new(ServiceUrl::new("https://subs.example.com").unwrap());
        let channel = RealtimeChannel::spawn(&config, connector.clone(), &store, coordinator);
        Fixture {
            channel,
            store,
            connector,
            servers,
        }
    }

    async fn reach(channel: &RealtimeChannel, want: ChannelState) {
        let mut rx = channel.subscribe_state();
        let _ = rx.wait_for(|state| *state == want).await;
        assert_eq!(channel.state(), want);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_with_token_and_forwards_domain_messages() {
        let mut f = fixture(true);
        let server = f.servers.recv().await.unwrap();
        assert_eq!(
            server.url.as_str(),
            "wss://subs.example.com/api/ws?token=a-1"
        );
        reach(&f.channel, ChannelState::Open).await;
        assert_eq!(f.channel.connectivity(), Connectivity::Online);

        server.send(r#"{"type":"connected"}"#);
        server.send(r#"{"type":"pong"}"#);
        server.send("not json");
        server.send(r#"{"type":"mystery"}"#);
        server.send(r#"{"type":"payment_succeeded","amount":5}"#);

        let message = f.channel.recv().await.unwrap();
        assert_eq!(message.kind, MessageKind::PaymentSucceeded);
        assert_eq!(message.get("amount"), Some(&serde_json::json!(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn abnormal_close_reconnects_after_one_second() {
        let mut f = fixture(true);
        let server = f.servers.recv().await.unwrap();
        reach(&f.channel, ChannelState::Open).await;

        let closed_at = Instant::now();
        server.close(1006);
        reach(
            &f.channel,
            ChannelState::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(1_000),
            },
        )
        .await;

        let _server = f.servers.recv().await.unwrap();
        let elapsed = closed_at.elapsed();
        assert!(elapsed >= Duration::from_millis(1_000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1_100), "{elapsed:?}");
        reach(&f.channel, ChannelState::Open).await;
        assert_eq!(f.connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reconnect_doubles_the_delay() {
        let mut f = fixture(true);
        let server = f.servers.recv().await.unwrap();
        reach(&f.channel, ChannelState::Open).await;

        f.connector.refuse_next(1);
        let closed_at = Instant::now();
        server.close(1006);

        let _server = f.servers.recv().await.unwrap();
        let elapsed = closed_at.elapsed();
        // 1000ms, a refused handshake, then 2000ms.
        assert!(elapsed >= Duration::from_millis(3_000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(3_100), "{elapsed:?}");
        assert_eq!(f.connector.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn normal_close_never_reconnects() {
        let mut f = fixture(true);
        let server = f.servers.recv().await.unwrap();
        reach(&f.channel, ChannelState::Open).await;

        server.close(NORMAL_CLOSURE);
        reach(&f.channel, ChannelState::Closed).await;

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(f.connector.attempts(), 1);
        assert_eq!(f.channel.connectivity(), Connectivity::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_five_reconnects() {
        let f = fixture(true);
        f.connector.refuse_next(usize::MAX);
        let started = Instant::now();

        reach(&f.channel, ChannelState::Closed).await;

        assert_eq!(f.connector.attempts(), 6);
        assert_eq!(f.channel.connectivity(), Connectivity::GaveUp);
        // 1 + 2 + 4 + 8 + 16 seconds of backoff.
        assert_eq!(started.elapsed().as_secs(), 31);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_ping_every_25_seconds() {
        let mut f = fixture(true);
        let mut server = f.servers.recv().await.unwrap();
        reach(&f.channel, ChannelState::Open).await;
        let opened_at = Instant::now();

        let frame = server.recv().await.unwrap();
        assert_eq!(frame, ClientFrame::Text(r#"{"type":"ping"}"#.into()));
        assert_eq!(opened_at.elapsed().as_secs(), 25);

        let frame = server.recv().await.unwrap();
        assert_eq!(frame, ClientFrame::Text(r#"{"type":"ping"}"#.into()));
        assert_eq!(opened_at.elapsed().as_secs(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn logout_closes_normally_and_relogin_reconnects() {
        let mut f = fixture(true);
        let mut server = f.servers.recv().await.unwrap();
        reach(&f.channel, ChannelState::Open).await;

        f.store.clear().unwrap();

        assert_eq!(server.recv().await, Some(ClientFrame::Close(NORMAL_CLOSURE)));
        reach(&f.channel, ChannelState::Idle).await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(f.connector.attempts(), 1);

        f.store
            .set(AccessToken::new("a-2"), RefreshToken::new("r-2"))
            .unwrap();

        let server = f.servers.recv().await.unwrap();
        assert!(server.url.as_str().ends_with("token=a-2"));
        reach(&f.channel, ChannelState::Open).await;
        assert_eq!(f.connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn logout_during_backoff_returns_to_idle() {
        let mut f = fixture(true);
        let server = f.servers.recv().await.unwrap();
        reach(&f.channel, ChannelState::Open).await;

        f.connector.refuse_next(usize::MAX);
        server.close(1006);
        reach(
            &f.channel,
            ChannelState::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(1_000),
            },
        )
        .await;
        f.store.clear().unwrap();
        reach(&f.channel, ChannelState::Idle).await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(f.connector.attempts(), 1);

        // The backoff starts over for the new session.
        f.connector.refuse_next(0);
        f.store
            .set(AccessToken::new("a-3"), RefreshToken::new("r-3"))
            .unwrap();
        let _server = f.servers.recv().await.unwrap();
        reach(&f.channel, ChannelState::Open).await;
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_close_sends_normal_closure() {
        let mut f = fixture(true);
        let mut server = f.servers.recv().await.unwrap();
        reach(&f.channel, ChannelState::Open).await;

        f.channel.close().await;

        assert_eq!(server.drain(), vec![ClientFrame::Close(NORMAL_CLOSURE)]);
        assert_eq!(f.channel.state(), ChannelState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_tears_down() {
        let mut f = fixture(true);
        let mut server = f.servers.recv().await.unwrap();
        reach(&f.channel, ChannelState::Open).await;

        drop(f.channel);

        assert_eq!(server.recv().await, Some(ClientFrame::Close(NORMAL_CLOSURE)));
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_backoff_cancels_reconnect() {
        let mut f = fixture(true);
        let server = f.servers.recv().await.unwrap();
        reach(&f.channel, ChannelState::Open).await;

        server.close(1011);
        reach(
            &f.channel,
            ChannelState::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(1_000),
            },
        )
        .await;
        f.channel.close().await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(f.connector.attempts(), 1);
        assert_eq!(f.channel.state(), ChannelState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_until_login() {
        let mut f = fixture(false);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.channel.state(), ChannelState::Idle);
        assert_eq!(f.connector.attempts(), 0);

        f.store
            .set(AccessToken::new("a-9"), RefreshToken::new("r-9"))
            .unwrap();
        let server = f.servers.recv().await.unwrap();
        assert!(server.url.as_str().ends_with("token=a-9"));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_uses_current_token() {
        let mut f = fixture(true);
        let server = f.servers.recv().await.unwrap();
        reach(&f.channel, ChannelState::Open).await;

        f.store.set_access_only(AccessToken::new("a-2")).unwrap();
        server.close(1006);

        let server = f.servers.recv().await.unwrap();
        assert!(server.url.as_str().ends_with("token=a-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn events_stream_yields_forwarded_messages() {
        let mut f = fixture(true);
        let server = f.servers.recv().await.unwrap();
        reach(&f.channel, ChannelState::Open).await;

        let mut events = f.channel.events().unwrap();
        assert!(f.channel.events().is_none());

        server.send(r#"{"type":"pong"}"#);
        server.send(r#"{"type":"balance_updated","balance":120}"#);

        let event = events.next().await.unwrap();
        assert_eq!(event.kind, MessageKind::BalanceUpdated);
    }
}
