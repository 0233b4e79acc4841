use std::time::Duration;

use crate::Generation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open a stream transport for the task, tagged with `generation`.
    Connect {
        task_id: String,
        generation: Generation,
    },
    SendText {
        generation: Generation,
        text: String,
    },
    /// Close the connection without feeding its close back as a drop.
    CloseConnection { generation: Generation },
    ScheduleReconnect { delay: Duration },
    CancelReconnect,
    /// Task finished; the owner should refetch status, results and analytics.
    RefreshRequested,
    TaskFailed { message: String },
}
