//! Session Runtime and Protocol
//!
//! Async side of the crate: one task per session, request routing and the
//! observer message format. All game logic runs through `game/`.

pub mod protocol;
pub mod session;
pub mod manager;
pub mod connection;

pub use protocol::{ClientMessage, ServerMessage, ErrorCode, ServerError};
pub use session::{
    RunnerConfig, SessionError, SessionHandle, SessionId, SessionInfo, TeardownCause, TeardownLatch,
};
pub use manager::{JoinReceipt, SessionManager};
pub use connection::Connection;
