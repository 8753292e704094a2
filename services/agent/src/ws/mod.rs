//! WebSocket Room
//!
//! Each WebSocket connection is one tutoring room with a single learner:
//!
//! - `protocol`: the JSON message format between the browser and the server.
//! - `room`: the `RoomTransport` implementation over the socket.
//! - `session`: the upgrade handler that runs a `SessionController` per connection.
//! - `provider`: the real-time voice model the session talks to.

pub mod protocol;
pub mod provider;
pub mod room;
pub mod session;

pub use session::ws_handler;
