//! Client side of the chat: HTTP calls, the push socket, and the
//! conversation cache that ties them together.

pub mod api;
pub mod error;
pub mod push;
pub mod session;

pub use api::{ChatApi, HttpChatApi};
pub use error::ClientError;
pub use push::{connect_push, ClientEvent, PushConnection};
pub use session::{ChatSession, SessionUpdate, Subscription};

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
