use crate::{Phase, ProgressSnapshot};

/// Read-only view of a live client handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressView {
    pub task_id: Option<String>,
    pub phase: Phase,
    pub is_connected: bool,
    pub reconnect_pending: bool,
    pub snapshot: Option<ProgressSnapshot>,
}
