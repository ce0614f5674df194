//! WebSocket infrastructure for pushing sync and license events to
//! connected dashboard clients.

mod forwarder;
mod handler;
pub mod manager;

pub use forwarder::start_event_forwarder;
pub use handler::ws_handler;
pub use manager::WsManager;
