#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use progress_client::{Connection, Transport, TransportError};
use progress_core::Frame;
use tokio::sync::mpsc;

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(progress_logging::initialize_for_tests);
}

/// How the next `connect` call behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    Accept,
    Refuse,
    /// Never completes, like a connect stuck in the handshake.
    Hang,
}

/// Server end of one scripted connection. Dropping it closes the stream.
pub struct ServerSide {
    pub task_id: String,
    frames: mpsc::UnboundedSender<Frame>,
    pub sent: mpsc::UnboundedReceiver<String>,
    closed_by_client: Arc<AtomicBool>,
}

impl ServerSide {
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.frames.send(Frame::Text(text.into()));
    }

    pub fn closed_by_client(&self) -> bool {
        self.closed_by_client.load(Ordering::SeqCst)
    }

    /// Sends a ping and waits for the pong, proving every earlier frame was handled.
    pub async fn barrier(&mut self) {
        self.send_text("ping");
        let reply = tokio::time::timeout(Duration::from_secs(5), self.sent.recv())
            .await
            .expect("pong in time");
        assert_eq!(reply.as_deref(), Some("pong"));
    }
}

#[derive(Default)]
struct Script {
    behaviors: VecDeque<ConnectBehavior>,
}

pub struct ScriptedTransport {
    script: Mutex<Script>,
    attempts: AtomicUsize,
    accepted: mpsc::UnboundedSender<ServerSide>,
}

impl ScriptedTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        let (accepted, accepted_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            script: Mutex::new(Script::default()),
            attempts: AtomicUsize::new(0),
            accepted,
        });
        (transport, accepted_rx)
    }

    /// Queues behaviors for upcoming connects; once exhausted every connect is accepted.
    pub fn script(&self, behaviors: &[ConnectBehavior]) {
        self.script
            .lock()
            .unwrap()
            .behaviors
            .extend(behaviors.iter().copied());
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, task_id: &str) -> Result<Box<dyn Connection>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .script
            .lock()
            .unwrap()
            .behaviors
            .pop_front()
            .unwrap_or(ConnectBehavior::Accept);
        match behavior {
            ConnectBehavior::Refuse => Err(TransportError::Connect("refused".to_string())),
            ConnectBehavior::Hang => std::future::pending().await,
            ConnectBehavior::Accept => {
                let (frames_tx, frames_rx) = mpsc::unbounded_channel();
                let (sent_tx, sent_rx) = mpsc::unbounded_channel();
                let closed_by_client = Arc::new(AtomicBool::new(false));
                let _ = self.accepted.send(ServerSide {
                    task_id: task_id.to_string(),
                    frames: frames_tx,
                    sent: sent_rx,
                    closed_by_client: closed_by_client.clone(),
                });
                Ok(Box::new(ScriptedConnection {
                    frames: frames_rx,
                    sent: sent_tx,
                    closed_by_client,
                }))
            }
        }
    }
}

struct ScriptedConnection {
    frames: mpsc::UnboundedReceiver<Frame>,
    sent: mpsc::UnboundedSender<String>,
    closed_by_client: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl Connection for ScriptedConnection {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.frames.recv().await.map(Ok)
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sent
            .send(text)
            .map_err(|_| TransportError::Protocol("peer gone".to_string()))
    }

    async fn close(&mut self) {
        self.closed_by_client.store(true, Ordering::SeqCst);
    }
}

pub fn envelope(kind: &str, processed: u64) -> String {
    format!(
        r#"{{"type":"{kind}","data":{{"stage":"extracting","progress":{},"message":"{kind} {processed}","processed":{processed},"total":20}}}}"#,
        processed * 5
    )
}
