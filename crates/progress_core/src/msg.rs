use crate::{Frame, Generation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Owner began displaying a running task.
    Start { task_id: String },
    /// Owner discarded the view or the task left the running state.
    Stop,
    /// Something happened on the connection opened for `generation`.
    Transport {
        generation: Generation,
        event: TransportEvent,
    },
    /// The scheduled reconnect delay elapsed.
    ReconnectDue,
    /// Owner's HTTP poll reported whether the task is still running.
    TaskStatusObserved { running: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    /// Transport-level failure; the following `Closed` drives recovery.
    Error(String),
    Closed,
    Frame(Frame),
}
