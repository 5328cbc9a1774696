//! asynchronous websocket client/server toolkit
//!
//! Open an endpoint or an acceptor, assign the events you care about,
//! and exchange frames; i/o, buffering, timers and the protocol state
//! machine stay inside the library.
//!
//! ```no_run
//! use wsnet::{events::EndpointEvents, ClientOptions, Endpoint};
//!
//! # async fn run() {
//! let client = Endpoint::client(ClientOptions {
//!     address: "127.0.0.1".to_string(),
//!     port: 9000,
//!     path: "/chat".to_string(),
//!     ..Default::default()
//! });
//! let mut events = EndpointEvents::default();
//! events.on_message_received = Box::new(|payload, _is_binary| {
//!     println!("{}", String::from_utf8_lossy(payload));
//! });
//! client.set_events(events);
//! if client.connect().await {
//!     client.write("hello");
//!     client.end(1000, "done");
//! }
//! # }
//! ```

#![warn(missing_docs)]

use crate::handshake::Headers;
use crate::tls::SecurityContext;

/// server acceptor
pub mod acceptor;
/// connection lifecycle state machine
pub mod close;
/// frame codec impl
pub mod codec;
/// websocket connection, client and server side
pub mod endpoint;
/// websocket error definitions
pub mod errors;
/// typed event callback sets
pub mod events;
/// websocket transport unit
pub mod frame;
/// http upgrade build/parse utils
pub mod handshake;
/// plain/tls stream unification
pub mod stream;
/// tls context construction
pub mod tls;

pub use acceptor::WsAcceptor;
pub use close::{CloseInfo, ConnectionState};
pub use endpoint::{Endpoint, Role};
pub use errors::WsError;

/// address family used by listeners and the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// ipv4
    #[default]
    V4,
    /// ipv6
    V6,
}

/// client endpoint configuration
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// server host name or address
    pub address: String,
    /// server port
    pub port: u16,
    /// address family for resolution
    pub protocol: Protocol,
    /// request target of the upgrade
    pub path: String,
    /// extra headers sent with the upgrade request
    pub headers: Headers,
    /// offered `Sec-WebSocket-Protocol` values
    pub sub_protocols: Vec<String>,
    /// close handshake wait in seconds, 0 disables the timer
    pub idle_timeout_secs: u16,
    /// enables the tls variant when set
    pub security: Option<SecurityContext>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
            protocol: Protocol::V4,
            path: "/".to_string(),
            headers: Headers::new(),
            sub_protocols: vec![],
            idle_timeout_secs: close::CLOSE_HANDSHAKE_TIMEOUT_SECS,
            security: None,
        }
    }
}

/// server acceptor configuration
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// bind address; empty binds the unspecified address
    pub address: String,
    /// bind port, 0 picks a free one
    pub port: u16,
    /// address family of the listener
    pub protocol: Protocol,
    /// sets SO_REUSEADDR on the listener socket
    pub reuse_address: bool,
    /// maximum simultaneous accepted connections
    pub backlog: u32,
    /// close handshake wait in seconds, 0 disables the timer
    pub idle_timeout_secs: u16,
    /// enables the tls variant when set
    pub security: Option<SecurityContext>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 8080,
            protocol: Protocol::V4,
            reuse_address: true,
            backlog: u32::MAX,
            idle_timeout_secs: close::CLOSE_HANDSHAKE_TIMEOUT_SECS,
            security: None,
        }
    }
}
