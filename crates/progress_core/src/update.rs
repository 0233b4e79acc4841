use progress_logging::{progress_debug, progress_info, progress_trace, progress_warn};

use crate::{
    parse_inbound, ClientState, Effect, Frame, Generation, Inbound, Msg, Phase, ProgressSnapshot,
    TransportEvent, PONG,
};

/// Pure update function: applies a message to state and returns any effects.
///
/// This is the single entry point of the live progress client. The IO layer
/// feeds every owner command, transport event and timer expiry through here
/// and executes the returned effects in order.
pub fn update(mut state: ClientState, msg: Msg) -> (ClientState, Vec<Effect>) {
    let effects = match msg {
        Msg::Start { task_id } => {
            if state.phase() != Phase::Idle {
                progress_warn!(
                    "start ignored: client already bound task_id={:?} phase={:?}",
                    state.task_id(),
                    state.phase()
                );
                return (state, Vec::new());
            }
            let generation = state.bind(task_id.clone());
            progress_info!("connecting task_id={} generation={}", task_id, generation);
            vec![Effect::Connect {
                task_id,
                generation,
            }]
        }
        Msg::Stop => stop(&mut state),
        Msg::Transport { generation, event } => {
            if generation != state.generation() || state.phase() == Phase::Stopped {
                progress_trace!(
                    "stale transport event generation={} current={} phase={:?}",
                    generation,
                    state.generation(),
                    state.phase()
                );
                return (state, Vec::new());
            }
            on_transport(&mut state, generation, event)
        }
        Msg::ReconnectDue => {
            let due = state.phase() == Phase::Disconnected
                && state.reconnect_pending()
                && state.is_mounted()
                && state.is_task_running();
            if !due {
                state.set_pending_reconnect(false);
                return (state, Vec::new());
            }
            let Some(task_id) = state.task_id().map(ToOwned::to_owned) else {
                return (state, Vec::new());
            };
            let generation = state.begin_attempt();
            progress_info!("reconnecting task_id={} generation={}", task_id, generation);
            vec![Effect::Connect {
                task_id,
                generation,
            }]
        }
        Msg::TaskStatusObserved { running } => {
            if running && state.is_terminal() {
                progress_debug!(
                    "ignoring running status for finished task_id={:?}",
                    state.task_id()
                );
                return (state, Vec::new());
            }
            state.set_task_running(running);
            if !running && state.reconnect_pending() {
                state.set_pending_reconnect(false);
                vec![Effect::CancelReconnect]
            } else if running && state.phase() == Phase::Disconnected {
                schedule_reconnect(&mut state)
            } else {
                Vec::new()
            }
        }
    };

    (state, effects)
}

fn stop(state: &mut ClientState) -> Vec<Effect> {
    let phase = state.phase();
    if phase == Phase::Stopped {
        return Vec::new();
    }

    let mut effects = Vec::new();
    if state.reconnect_pending() {
        effects.push(Effect::CancelReconnect);
    }
    if matches!(phase, Phase::Connecting | Phase::Connected) {
        effects.push(Effect::CloseConnection {
            generation: state.generation(),
        });
    }
    state.unmount();
    progress_info!("stopped task_id={:?} from phase={:?}", state.task_id(), phase);
    effects
}

fn on_transport(
    state: &mut ClientState,
    generation: Generation,
    event: TransportEvent,
) -> Vec<Effect> {
    match event {
        TransportEvent::Opened => {
            if state.phase() == Phase::Connecting {
                state.mark_open();
                progress_info!(
                    "connected task_id={:?} generation={}",
                    state.task_id(),
                    generation
                );
            }
            Vec::new()
        }
        TransportEvent::Error(message) => {
            progress_debug!("transport error generation={}: {}", generation, message);
            Vec::new()
        }
        TransportEvent::Closed => {
            if !matches!(state.phase(), Phase::Connecting | Phase::Connected) {
                return Vec::new();
            }
            state.mark_closed();
            progress_info!(
                "disconnected task_id={:?} generation={}",
                state.task_id(),
                generation
            );
            schedule_reconnect(state)
        }
        TransportEvent::Frame(frame) => {
            if !matches!(state.phase(), Phase::Connected | Phase::Disconnected) {
                return Vec::new();
            }
            on_frame(state, generation, frame)
        }
    }
}

fn schedule_reconnect(state: &mut ClientState) -> Vec<Effect> {
    if !state.is_mounted()
        || !state.is_task_running()
        || state.is_terminal()
        || state.reconnect_pending()
    {
        return Vec::new();
    }
    if state.retries_exhausted() {
        progress_warn!(
            "giving up reconnecting task_id={:?} after {} failed attempts",
            state.task_id(),
            state.failed_attempts()
        );
        return Vec::new();
    }
    let delay = state.policy().delay;
    state.set_pending_reconnect(true);
    progress_info!(
        "reconnect scheduled task_id={:?} in {:?}",
        state.task_id(),
        delay
    );
    vec![Effect::ScheduleReconnect { delay }]
}

fn on_frame(state: &mut ClientState, generation: Generation, frame: Frame) -> Vec<Effect> {
    let text = match frame {
        Frame::Text(text) => text,
        Frame::Binary(bytes) => {
            progress_debug!("ignoring binary frame of {} bytes", bytes.len());
            return Vec::new();
        }
    };

    let inbound = match parse_inbound(&text) {
        Ok(inbound) => inbound,
        Err(err) => {
            progress_debug!("discarding frame: {}", err);
            return Vec::new();
        }
    };

    match inbound {
        Inbound::Ping => vec![Effect::SendText {
            generation,
            text: PONG.to_string(),
        }],
        Inbound::Pong => Vec::new(),
        Inbound::Progress(snapshot) => {
            let snapshot = with_task_id(state, snapshot);
            state.replace_snapshot(snapshot);
            Vec::new()
        }
        Inbound::Status(snapshot) => {
            let newer = state
                .snapshot()
                .is_none_or(|held| snapshot.processed > held.processed);
            if newer {
                let snapshot = with_task_id(state, snapshot);
                state.replace_snapshot(snapshot);
            } else {
                progress_debug!(
                    "status rejected: processed={} not ahead of held snapshot",
                    snapshot.processed
                );
            }
            Vec::new()
        }
        Inbound::Completed => {
            state.clear_snapshot();
            state.mark_terminal();
            progress_info!("task completed task_id={:?}", state.task_id());
            if state.take_refresh() {
                vec![Effect::RefreshRequested]
            } else {
                Vec::new()
            }
        }
        Inbound::Error { message } => {
            state.mark_terminal();
            state.mark_dirty();
            progress_warn!("task failed task_id={:?}: {}", state.task_id(), message);
            vec![Effect::TaskFailed { message }]
        }
    }
}

fn with_task_id(state: &ClientState, mut snapshot: ProgressSnapshot) -> ProgressSnapshot {
    if snapshot.task_id.is_empty() {
        if let Some(task_id) = state.task_id() {
            snapshot.task_id = task_id.to_string();
        }
    }
    snapshot
}
