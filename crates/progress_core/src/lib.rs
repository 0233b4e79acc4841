//! Progress core: snapshot model, inbound frame decoding and the pure
//! live-client state machine.
mod effect;
mod frame;
mod msg;
mod snapshot;
mod state;
mod update;
mod view_model;

pub use effect::Effect;
pub use frame::{parse_inbound, Frame, FrameError, Inbound, PING, PONG};
pub use msg::{Msg, TransportEvent};
pub use snapshot::{parse_timestamp, ProgressSnapshot, Stage};
pub use state::{ClientState, Generation, Phase, ReconnectPolicy, DEFAULT_RECONNECT_DELAY};
pub use update::update;
pub use view_model::ProgressView;
