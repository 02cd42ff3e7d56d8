//! Fake capabilities shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sessionkit_core::error::{StorageError, TransportError};
use sessionkit_core::{
    HttpRequest, HttpResponse, HttpTransport, Location, Navigator, SocketConnector, SocketEvent,
    Storage, WebSocket,
};
use tokio::sync::mpsc;
use url::Url;

/// An unsigned token whose payload is `payload_json`.
pub fn jwt_with_payload(payload_json: &str) -> String {
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(payload_json.as_bytes())
    )
}

/// An unsigned token expiring at `exp`.
pub fn jwt(exp: i64) -> String {
    jwt_with_payload(&format!(r#"{{"exp":{},"sub":"user-1"}}"#, exp))
}

/// Storage where every operation fails.
pub struct FailingStorage;

impl Storage for FailingStorage {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable {
            message: "storage disabled".into(),
        })
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable {
            message: "storage disabled".into(),
        })
    }

    fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable {
            message: "storage disabled".into(),
        })
    }
}

type Responder = dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync;

/// An HTTP transport answering from a closure and recording every request.
pub struct MockTransport {
    responder: Box<Responder>,
    delay: Option<Duration>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            delay: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Like [`MockTransport::new`], but every response takes `delay`.
    pub fn delayed<F>(delay: Duration, responder: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            delay: Some(delay),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Always answers `status` with `body`.
    pub fn fixed(status: u16, body: &str) -> Arc<Self> {
        let body = body.to_string();
        Self::new(move |_| Ok(HttpResponse::new(status, body.clone().into_bytes())))
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests whose URL ends with `suffix`.
    pub fn count(&self, suffix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.ends_with(suffix))
            .count()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(&request)
    }
}

/// A navigator that records every navigation and moves to the new path.
pub struct RecordingNavigator {
    location: Mutex<Location>,
    visits: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn at(path: &str) -> Arc<Self> {
        Arc::new(Self {
            location: Mutex::new(Location::new("https://app.example.com", path)),
            visits: Mutex::new(Vec::new()),
        })
    }

    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn location(&self) -> Location {
        self.location.lock().unwrap().clone()
    }

    fn navigate(&self, path: &str) {
        self.visits.lock().unwrap().push(path.to_string());
        self.location.lock().unwrap().path = path.to_string();
    }
}

/// What the client did on a fake socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Text(String),
    Close(u16),
}

/// The server side of one fake connection.
pub struct ServerEnd {
    pub url: Url,
    to_client: mpsc::UnboundedSender<SocketEvent>,
    from_client: mpsc::UnboundedReceiver<ClientFrame>,
}

impl ServerEnd {
    pub fn send(&self, text: &str) {
        let _ = self.to_client.send(SocketEvent::Text(text.to_string()));
    }

    pub fn close(&self, code: u16) {
        let _ = self.to_client.send(SocketEvent::Closed {
            code: Some(code),
            reason: String::new(),
        });
    }

    /// Next frame the client sent, or `None` once the client side is gone.
    pub async fn recv(&mut self) -> Option<ClientFrame> {
        self.from_client.recv().await
    }

    /// Frames already sent by the client, without waiting.
    pub fn drain(&mut self) -> Vec<ClientFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

struct FakeSocket {
    incoming: mpsc::UnboundedReceiver<SocketEvent>,
    outgoing: mpsc::UnboundedSender<ClientFrame>,
}

#[async_trait]
impl WebSocket for FakeSocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.outgoing
            .send(ClientFrame::Text(text))
            .map_err(|_| TransportError::WebSocket {
                message: "server end dropped".into(),
            })
    }

    async fn next_event(&mut self) -> SocketEvent {
        self.incoming.recv().await.unwrap_or(SocketEvent::Closed {
            code: None,
            reason: "server end dropped".into(),
        })
    }

    async fn close(&mut self, code: u16) -> Result<(), TransportError> {
        let _ = self.outgoing.send(ClientFrame::Close(code));
        Ok(())
    }
}

/// A connector that hands the server end of each accepted connection to the
/// test. Refused attempts are counted but produce no server end.
pub struct FakeConnector {
    accepted: mpsc::UnboundedSender<ServerEnd>,
    refuse_remaining: AtomicUsize,
    attempts: AtomicUsize,
    urls: Mutex<VecDeque<Url>>,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            accepted,
            refuse_remaining: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            urls: Mutex::new(VecDeque::new()),
        });
        (connector, rx)
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.refuse_remaining.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<Url> {
        self.urls.lock().unwrap().iter().cloned().collect()
    }
}

#[async_trait]
impl SocketConnector for FakeConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn WebSocket>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push_back(url.clone());

        let refused = self
            .refuse_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connection {
                message: "connection refused".into(),
            });
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let _ = self.accepted.send(ServerEnd {
            url: url.clone(),
            to_client,
            from_client,
        });
        Ok(Box::new(FakeSocket { incoming, outgoing }))
    }
}
