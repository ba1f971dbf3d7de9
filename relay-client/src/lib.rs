//! Client for a line-oriented TCP relay hub.
//!
//! A hub assigns every connection a numeric identity, can list the other
//! connected identities, and forwards binary payloads between them. Control
//! lines are `\n`-terminated text; a relay header declares the byte length
//! of the raw payload that follows it.
//!
//! - [`session`] owns the connection and issues the `identity`, `list` and
//!   `relay` requests.
//! - [`receive`] runs in the background and turns inbound relays into
//!   [`IncomingMessage`]s on a Tokio `mpsc` channel.
//! - [`protocol`] holds the framing and reply parsing shared by both.
//! - [`ids`] encodes and decodes comma-joined identity lists.
//! - [`cli`] parses the command line of the `relay-client` binary.
//!
//! Control requests must finish before the receive loop starts: both read
//! the same stream and the protocol has no request ids to tell replies
//! apart. [`Session::start_receiving`] takes the read half away, so misuse
//! surfaces as an error instead of a misrouted reply.

pub mod cli;
pub mod error;
pub mod ids;
pub mod protocol;
pub mod receive;
pub mod session;

pub use error::{ClientError, ProtocolError};
pub use ids::Identity;
pub use receive::{IncomingMessage, ReceiveHandle};
pub use session::Session;
