mod next_request_id;
mod now;

pub use next_request_id::next_request_id;
pub use now::{now, now_secs};
