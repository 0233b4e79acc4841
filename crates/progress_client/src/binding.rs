use std::sync::Arc;

use progress_core::ReconnectPolicy;
use progress_logging::progress_info;

use crate::{LiveProgressClient, TaskStatus, Transport};

/// Keeps at most one [`LiveProgressClient`] alive for whichever task the
/// owner's status poll reports as running.
///
/// Construct one per view; dropping it stops the client it holds.
pub struct TaskProgressBinding {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    client: Option<LiveProgressClient>,
}

impl TaskProgressBinding {
    pub fn new(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        Self {
            transport,
            policy,
            client: None,
        }
    }

    /// Applies one status observation.
    ///
    /// A running task gets a client (replacing one bound to another task); a
    /// task that left the running state has its client stopped and dropped.
    /// Observations about tasks other than the bound one are ignored unless
    /// they report the task as running.
    pub fn observe(&mut self, task_id: &str, status: TaskStatus) {
        let bound_here = self
            .client
            .as_ref()
            .is_some_and(|client| client.task_id() == task_id);

        if status.is_running() {
            if bound_here {
                if let Some(client) = &self.client {
                    client.observe_task_running(true);
                }
                return;
            }
            progress_info!("binding live progress to task_id={}", task_id);
            self.client = Some(LiveProgressClient::start(
                task_id,
                self.transport.clone(),
                self.policy,
            ));
        } else if bound_here {
            progress_info!("task_id={} is {}, releasing live progress", task_id, status);
            if let Some(client) = self.client.take() {
                client.observe_task_running(false);
                client.stop();
            }
        }
    }

    pub fn client(&self) -> Option<&LiveProgressClient> {
        self.client.as_ref()
    }

    pub fn client_mut(&mut self) -> Option<&mut LiveProgressClient> {
        self.client.as_mut()
    }

    /// Drops the current client, if any. The owning view calls this when it
    /// is discarded.
    pub fn release(&mut self) {
        if let Some(client) = self.client.take() {
            client.stop();
        }
    }
}
