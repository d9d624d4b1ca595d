//! Liaison development relay
//!
//! Room-scoped WebSocket relay speaking the same event protocol as the
//! `liaison` client. Exposed as a library for integration tests.

mod connection;
mod state;

pub use connection::accept_connection;
pub use connection::authorize;
pub use connection::handle_connection;
pub use connection::handle_message;
pub use connection::Rejection;
pub use state::{ConnectionId, RelayState};
