//! Progress client: stream transport, live progress client, HTTP API client
//! and the glue that binds a client to a running task.
mod api;
mod binding;
mod client;
mod error;
mod settings;
mod transport;
mod types;

pub use api::ApiClient;
pub use binding::TaskProgressBinding;
pub use client::{LiveProgressClient, OwnerNotice};
pub use error::{ApiError, SettingsError, TransportError};
pub use settings::{ClientSettings, HttpSettings};
pub use transport::{Connection, Transport, WsTransport};
pub use types::{AnalysisRequest, StartedTask, TaskRecord, TaskStatus};

pub use progress_core::{Phase, ProgressSnapshot, ProgressView, ReconnectPolicy, Stage};
