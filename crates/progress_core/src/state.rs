use std::time::Duration;

use serde::Serialize;

use crate::view_model::ProgressView;
use crate::ProgressSnapshot;

/// Identifies one transport connection opened by a client.
pub type Generation = u64;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    /// Absorbing; nothing leaves this phase.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// Consecutive failed attempts after which retrying stops. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClientState {
    policy: ReconnectPolicy,
    task_id: Option<String>,
    phase: Phase,
    generation: Generation,
    snapshot: Option<ProgressSnapshot>,
    mounted: bool,
    task_running: bool,
    pending_reconnect: bool,
    failed_attempts: u32,
    refresh_sent: bool,
    /// Set once the server reported the task completed or failed.
    terminal: bool,
    dirty: bool,
}

impl ClientState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn view(&self) -> ProgressView {
        ProgressView {
            task_id: self.task_id.clone(),
            phase: self.phase,
            is_connected: self.is_connected(),
            reconnect_pending: self.pending_reconnect,
            snapshot: self.snapshot.clone(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn snapshot(&self) -> Option<&ProgressSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn is_task_running(&self) -> bool {
        self.task_running
    }

    pub fn reconnect_pending(&self) -> bool {
        self.pending_reconnect
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Whether the task reached `completed` or `error` on the stream.
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Returns whether the view changed since the last call and clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn bind(&mut self, task_id: String) -> Generation {
        self.task_id = Some(task_id);
        self.mounted = true;
        self.task_running = true;
        self.begin_attempt()
    }

    pub(crate) fn begin_attempt(&mut self) -> Generation {
        self.generation += 1;
        self.phase = Phase::Connecting;
        self.pending_reconnect = false;
        self.mark_dirty();
        self.generation
    }

    pub(crate) fn mark_open(&mut self) {
        self.phase = Phase::Connected;
        self.failed_attempts = 0;
        self.mark_dirty();
    }

    /// Moves to `Disconnected`; an attempt that never opened counts as failed.
    pub(crate) fn mark_closed(&mut self) {
        if self.phase == Phase::Connecting {
            self.failed_attempts = self.failed_attempts.saturating_add(1);
        }
        self.phase = Phase::Disconnected;
        self.mark_dirty();
    }

    pub(crate) fn unmount(&mut self) {
        self.phase = Phase::Stopped;
        self.mounted = false;
        self.pending_reconnect = false;
        self.mark_dirty();
    }

    pub(crate) fn set_pending_reconnect(&mut self, pending: bool) {
        if self.pending_reconnect != pending {
            self.pending_reconnect = pending;
            self.mark_dirty();
        }
    }

    /// A terminal task stays not running whatever later polls report.
    pub(crate) fn set_task_running(&mut self, running: bool) {
        self.task_running = running && !self.terminal;
    }

    pub(crate) fn mark_terminal(&mut self) {
        self.terminal = true;
        self.task_running = false;
    }

    pub(crate) fn replace_snapshot(&mut self, snapshot: ProgressSnapshot) {
        self.snapshot = Some(snapshot);
        self.mark_dirty();
    }

    pub(crate) fn clear_snapshot(&mut self) {
        if self.snapshot.take().is_some() {
            self.mark_dirty();
        }
    }

    /// Returns `true` the first time only.
    pub(crate) fn take_refresh(&mut self) -> bool {
        !std::mem::replace(&mut self.refresh_sent, true)
    }

    pub(crate) fn retries_exhausted(&self) -> bool {
        self.policy
            .max_attempts
            .is_some_and(|max| self.failed_attempts >= max)
    }
}
