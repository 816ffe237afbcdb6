pub mod constants;
pub mod demux;
pub mod message;
pub mod utils;
