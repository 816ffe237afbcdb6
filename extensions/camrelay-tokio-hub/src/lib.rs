mod connection_registry;
pub use connection_registry::*;

mod directory;
pub use directory::*;

pub mod error;

mod hub_server;
pub use hub_server::*;

mod pending_requests;
pub use pending_requests::*;

mod relay_hub;
pub use relay_hub::*;

pub mod utils;
