mod backoff;
pub use backoff::*;

pub mod capture;

mod device_agent;
pub use device_agent::*;

pub mod error;

mod frame_pump;
pub use frame_pump::*;

pub mod media_sinks;

pub mod mjpeg_preview;

mod recording_store;
pub use recording_store::*;

mod session_state;
pub use session_state::*;

mod signaling_relay;
pub use signaling_relay::*;

mod transport_session;
pub use transport_session::*;
