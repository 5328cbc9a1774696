use std::fmt;

use crate::endpoint::Endpoint;
use crate::errors::WsError;
use crate::handshake::{HandshakeRequest, HandshakeResponse};

/// the peer's agreed handshake, kept on the endpoint after the upgrade
///
/// A server endpoint keeps the client's request; a client endpoint keeps
/// the server's response.
#[derive(Debug, Clone)]
pub enum PeerHandshake {
    /// client request, as seen by a server endpoint
    Request(HandshakeRequest),
    /// server response, as seen by a client endpoint
    Response(HandshakeResponse),
}

impl PeerHandshake {
    /// the request form, if this side is a server
    pub fn as_request(&self) -> Option<&HandshakeRequest> {
        match self {
            PeerHandshake::Request(request) => Some(request),
            PeerHandshake::Response(_) => None,
        }
    }

    /// the response form, if this side is a client
    pub fn as_response(&self) -> Option<&HandshakeResponse> {
        match self {
            PeerHandshake::Request(_) => None,
            PeerHandshake::Response(response) => Some(response),
        }
    }
}

/// per-endpoint event callbacks
///
/// Every slot defaults to a silent no-op, so an application only assigns
/// the events it cares about:
///
/// ```
/// use wsnet::events::EndpointEvents;
///
/// let mut events = EndpointEvents::default();
/// events.on_message_received = Box::new(|payload, is_binary| {
///     println!("got {} bytes (binary: {is_binary})", payload.len());
/// });
/// ```
pub struct EndpointEvents {
    /// the handshake completed and the connection is open
    pub on_connected: Box<dyn Fn(&PeerHandshake) + Send + Sync>,
    /// the peer's handshake was rejected; carries the parsed head
    pub on_unexpected_handshake: Box<dyn Fn(&PeerHandshake) + Send + Sync>,
    /// a text (`is_binary == false`) or binary data frame arrived
    ///
    /// There is no reassembly of fragmented messages: a continuation
    /// frame is delivered as an independent event with `is_binary` set.
    pub on_message_received: Box<dyn Fn(&[u8], bool) + Send + Sync>,
    /// a ping arrived; the pong reply is sent automatically
    pub on_ping: Box<dyn Fn() + Send + Sync>,
    /// a pong arrived
    pub on_pong: Box<dyn Fn() + Send + Sync>,
    /// the connection reached its final state; fires exactly once
    pub on_close: Box<dyn Fn(u16, &str) + Send + Sync>,
    /// an i/o, tls or protocol error occurred
    pub on_error: Box<dyn Fn(&WsError) + Send + Sync>,
}

impl Default for EndpointEvents {
    fn default() -> Self {
        Self {
            on_connected: Box::new(|_| {}),
            on_unexpected_handshake: Box::new(|_| {}),
            on_message_received: Box::new(|_, _| {}),
            on_ping: Box::new(|| {}),
            on_pong: Box::new(|| {}),
            on_close: Box::new(|_, _| {}),
            on_error: Box::new(|_| {}),
        }
    }
}

impl fmt::Debug for EndpointEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EndpointEvents { .. }")
    }
}

/// acceptor-level event callbacks, silent by default
pub struct AcceptorEvents {
    /// a peer completed its upgrade; fires with the accepted endpoint
    /// and the parsed request, before any frame is dispatched
    pub on_connection: Box<dyn Fn(&Endpoint, &HandshakeRequest) + Send + Sync>,
    /// the acceptor finished closing
    pub on_close: Box<dyn Fn() + Send + Sync>,
    /// an accept or listener error occurred; the accept loop continues
    pub on_error: Box<dyn Fn(&WsError) + Send + Sync>,
}

impl Default for AcceptorEvents {
    fn default() -> Self {
        Self {
            on_connection: Box::new(|_, _| {}),
            on_close: Box::new(|| {}),
            on_error: Box::new(|_| {}),
        }
    }
}

impl fmt::Debug for AcceptorEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AcceptorEvents { .. }")
    }
}
