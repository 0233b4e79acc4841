use std::sync::Arc;

use progress_core::{
    update, ClientState, Effect, Generation, Msg, Phase, ProgressView, ReconnectPolicy,
    TransportEvent,
};
use progress_logging::{progress_debug, progress_trace};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::Transport;

/// Something the owner has to act on beyond re-rendering the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerNotice {
    /// The task completed; refetch its status, results and analytics.
    RefreshRequested,
    TaskFailed { message: String },
}

/// Live view of one running task's progress.
///
/// Owns a single stream connection at a time and keeps it alive with a
/// fixed-delay reconnect until [`stop`](Self::stop) is called, the client is
/// dropped, or the task is no longer running. The latest [`ProgressView`] is
/// published through a watch channel.
///
/// Must be created inside a tokio runtime.
pub struct LiveProgressClient {
    task_id: String,
    msg_tx: mpsc::UnboundedSender<Msg>,
    view_rx: watch::Receiver<ProgressView>,
    notice_rx: mpsc::UnboundedReceiver<OwnerNotice>,
    actor: Option<JoinHandle<()>>,
}

impl LiveProgressClient {
    pub fn start(
        task_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
    ) -> Self {
        let task_id = task_id.into();
        let state = ClientState::new(policy);
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(state.view());
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            state,
            transport,
            msg_tx: msg_tx.clone(),
            view_tx,
            notice_tx,
            connection: None,
            reconnect: None,
            shutdown: CancellationToken::new(),
        };
        let _ = msg_tx.send(Msg::Start {
            task_id: task_id.clone(),
        });
        let actor = tokio::spawn(actor.run(msg_rx));

        Self {
            task_id,
            msg_tx,
            view_rx,
            notice_rx,
            actor: Some(actor),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn view(&self) -> ProgressView {
        self.view_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressView> {
        self.view_rx.clone()
    }

    pub fn try_recv_notice(&mut self) -> Option<OwnerNotice> {
        self.notice_rx.try_recv().ok()
    }

    /// Waits for the next notice; `None` once the client has stopped and
    /// every notice was drained.
    pub async fn next_notice(&mut self) -> Option<OwnerNotice> {
        self.notice_rx.recv().await
    }

    /// Feeds the owner's latest HTTP poll result into the reconnect decision.
    pub fn observe_task_running(&self, running: bool) {
        let _ = self.msg_tx.send(Msg::TaskStatusObserved { running });
    }

    /// Stops the client. Idempotent and safe before the connection is open.
    pub fn stop(&self) {
        let _ = self.msg_tx.send(Msg::Stop);
    }

    /// Stops the client and waits until the connection and timers are released.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(actor) = self.actor.take() {
            let _ = actor.await;
        }
    }
}

impl Drop for LiveProgressClient {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ConnectionHandle {
    generation: Generation,
    outgoing: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

struct Actor {
    state: ClientState,
    transport: Arc<dyn Transport>,
    msg_tx: mpsc::UnboundedSender<Msg>,
    view_tx: watch::Sender<ProgressView>,
    notice_tx: mpsc::UnboundedSender<OwnerNotice>,
    connection: Option<ConnectionHandle>,
    reconnect: Option<CancellationToken>,
    shutdown: CancellationToken,
}

impl Actor {
    async fn run(mut self, mut msg_rx: mpsc::UnboundedReceiver<Msg>) {
        while let Some(msg) = msg_rx.recv().await {
            let state = std::mem::take(&mut self.state);
            let (mut state, effects) = update(state, msg);
            let view = state.consume_dirty().then(|| state.view());
            let stopped = state.phase() == Phase::Stopped;
            self.state = state;

            for effect in effects {
                self.execute(effect);
            }
            if let Some(view) = view {
                self.view_tx.send_replace(view);
            }
            if stopped {
                break;
            }
        }
        // Cancels the reconnect timer and any connection still open or opening.
        self.shutdown.cancel();
        progress_debug!("live client actor finished task_id={:?}", self.state.task_id());
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Connect {
                task_id,
                generation,
            } => {
                if let Some(previous) = self.connection.take() {
                    previous.cancel.cancel();
                }
                let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
                let cancel = self.shutdown.child_token();
                tokio::spawn(drive_connection(
                    self.transport.clone(),
                    task_id,
                    generation,
                    self.msg_tx.clone(),
                    outgoing_rx,
                    cancel.clone(),
                ));
                self.connection = Some(ConnectionHandle {
                    generation,
                    outgoing,
                    cancel,
                });
            }
            Effect::SendText { generation, text } => match &self.connection {
                Some(connection) if connection.generation == generation => {
                    let _ = connection.outgoing.send(text);
                }
                _ => progress_trace!("dropping outgoing text for generation={}", generation),
            },
            Effect::CloseConnection { generation } => {
                if self
                    .connection
                    .as_ref()
                    .is_some_and(|connection| connection.generation == generation)
                {
                    if let Some(connection) = self.connection.take() {
                        connection.cancel.cancel();
                    }
                }
            }
            Effect::ScheduleReconnect { delay } => {
                if let Some(previous) = self.reconnect.take() {
                    previous.cancel();
                }
                let token = self.shutdown.child_token();
                let msg_tx = self.msg_tx.clone();
                let timer = token.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = timer.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            let _ = msg_tx.send(Msg::ReconnectDue);
                        }
                    }
                });
                self.reconnect = Some(token);
            }
            Effect::CancelReconnect => {
                if let Some(token) = self.reconnect.take() {
                    token.cancel();
                }
            }
            Effect::RefreshRequested => {
                let _ = self.notice_tx.send(OwnerNotice::RefreshRequested);
            }
            Effect::TaskFailed { message } => {
                let _ = self.notice_tx.send(OwnerNotice::TaskFailed { message });
            }
        }
    }
}

fn transport_msg(generation: Generation, event: TransportEvent) -> Msg {
    Msg::Transport { generation, event }
}

/// Runs one connection: opens it, pumps frames into the actor and writes
/// outgoing text. Once `cancel` fires it closes the stream without reporting
/// the close, so an intentional teardown never looks like a drop.
async fn drive_connection(
    transport: Arc<dyn Transport>,
    task_id: String,
    generation: Generation,
    msg_tx: mpsc::UnboundedSender<Msg>,
    mut outgoing_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = transport.connect(&task_id) => result,
    };
    let mut connection = match connected {
        Ok(connection) => connection,
        Err(err) => {
            let _ = msg_tx.send(transport_msg(generation, TransportEvent::Error(err.to_string())));
            let _ = msg_tx.send(transport_msg(generation, TransportEvent::Closed));
            return;
        }
    };
    if cancel.is_cancelled() {
        connection.close().await;
        return;
    }
    let _ = msg_tx.send(transport_msg(generation, TransportEvent::Opened));

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                connection.close().await;
                return;
            }
            Some(text) = outgoing_rx.recv() => {
                if let Err(err) = connection.send_text(text).await {
                    let _ = msg_tx.send(transport_msg(generation, TransportEvent::Error(err.to_string())));
                }
            }
            frame = connection.next_frame() => match frame {
                Some(Ok(frame)) => {
                    let _ = msg_tx.send(transport_msg(generation, TransportEvent::Frame(frame)));
                }
                Some(Err(err)) => {
                    let _ = msg_tx.send(transport_msg(generation, TransportEvent::Error(err.to_string())));
                    connection.close().await;
                    let _ = msg_tx.send(transport_msg(generation, TransportEvent::Closed));
                    return;
                }
                None => {
                    let _ = msg_tx.send(transport_msg(generation, TransportEvent::Closed));
                    return;
                }
            },
        }
    }
}
