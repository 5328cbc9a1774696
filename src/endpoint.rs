use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tokio_util::codec::Decoder;

use crate::close::{
    ConnectionState, StateCell, CLOSE_ABNORMAL, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR,
};
use crate::codec::FrameCodec;
use crate::errors::{ProtocolError, WsError};
use crate::events::{EndpointEvents, PeerHandshake};
use crate::frame::{gen_mask, parse_close_payload, Frame, OpCode};
use crate::handshake::{
    self, encode_request, encode_response, parse_request, parse_response, HandshakeRequest,
    HandshakeResponse,
};
use crate::stream::WsStream;
use crate::{ClientOptions, Protocol};

const MAX_HANDSHAKE_HEAD: usize = 64 * 1024;
const MAX_DIAGNOSTIC_BODY: usize = 64 * 1024;

/// which handshake side this endpoint runs, deciding the masking rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// initiates the upgrade, masks outbound frames
    Client,
    /// answers the upgrade, sends frames unmasked
    Server,
}

enum WriteCmd {
    Frame(Bytes),
    CloseFrame {
        bytes: Bytes,
        code: u16,
        reason: String,
        wait_for_peer: bool,
    },
    Shutdown,
}

/// a single websocket connection, client or server side
///
/// Cheap to clone; clones share the connection. Created closed, opened
/// by [`Endpoint::connect`] (client) or by a [`crate::acceptor::WsAcceptor`]
/// (server). All traffic and lifecycle notifications arrive through the
/// endpoint's [`EndpointEvents`].
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<Inner>,
}

struct Inner {
    role: Role,
    state: StateCell,
    connecting: AtomicBool,
    wait_close_frame_response: AtomicBool,
    idle_timeout: Option<Duration>,
    client_options: Option<ClientOptions>,
    events: RwLock<Arc<EndpointEvents>>,
    peer_handshake: RwLock<Option<PeerHandshake>>,
    peer_addr: Mutex<Option<SocketAddr>>,
    writer_tx: Mutex<Option<mpsc::UnboundedSender<WriteCmd>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    timer_task: Mutex<Option<JoinHandle<()>>>,
    detach_hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.state.shutdown() != ConnectionState::Closed {
            let events = self.events.read().unwrap().clone();
            (events.on_close)(CLOSE_ABNORMAL, "Abnormal closure");
        }
    }
}

impl Endpoint {
    /// construct a client endpoint in the closed state
    pub fn client(options: ClientOptions) -> Self {
        Self::with_role(Role::Client, options.idle_timeout_secs, Some(options))
    }

    pub(crate) fn server(idle_timeout_secs: u16) -> Self {
        Self::with_role(Role::Server, idle_timeout_secs, None)
    }

    fn with_role(role: Role, idle_timeout_secs: u16, client_options: Option<ClientOptions>) -> Self {
        let idle_timeout = match idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs as u64)),
        };
        Self {
            inner: Arc::new(Inner {
                role,
                state: StateCell::default(),
                connecting: AtomicBool::new(false),
                wait_close_frame_response: AtomicBool::new(true),
                idle_timeout,
                client_options,
                events: RwLock::new(Arc::new(EndpointEvents::default())),
                peer_handshake: RwLock::new(None),
                peer_addr: Mutex::new(None),
                writer_tx: Mutex::new(None),
                reader_task: Mutex::new(None),
                timer_task: Mutex::new(None),
                detach_hook: Mutex::new(None),
            }),
        }
    }

    /// replace the event callbacks
    ///
    /// Safe at any time; the read loop picks up the new set before the
    /// next dispatch. Server applications typically call this from the
    /// acceptor's `on_connection`.
    pub fn set_events(&self, events: EndpointEvents) {
        *self.inner.events.write().unwrap() = Arc::new(events);
    }

    /// which side of the handshake this endpoint runs
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.inner.state.load()
    }

    /// the peer's agreed handshake, once open
    pub fn handshake(&self) -> Option<PeerHandshake> {
        self.inner.peer_handshake.read().unwrap().clone()
    }

    /// the peer's socket address, once connected
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.inner.peer_addr.lock().unwrap()
    }

    pub(crate) fn set_detach_hook(&self, hook: Box<dyn FnOnce() + Send>) {
        *self.inner.detach_hook.lock().unwrap() = Some(hook);
    }

    /// resolve, connect, and upgrade to an open websocket (client only)
    ///
    /// Returns `false` when the endpoint is not closed or a connect is
    /// already running. Failures are reported through the event set per
    /// the error table; the endpoint stays closed and may retry.
    pub async fn connect(&self) -> bool {
        if self.inner.role != Role::Client {
            return false;
        }
        if self.inner.state.load() != ConnectionState::Closed
            || self.inner.connecting.swap(true, Ordering::AcqRel)
        {
            return false;
        }
        self.run_connect().await;
        self.inner.connecting.store(false, Ordering::Release);
        true
    }

    async fn run_connect(&self) {
        let inner = &self.inner;
        let options = inner.client_options.as_ref().expect("client options");

        let target = format!("{}:{}", options.address, options.port);
        let addr = match lookup_host(target.clone()).await {
            Ok(addrs) => {
                let mut addrs = addrs.filter(|addr| match options.protocol {
                    Protocol::V4 => addr.is_ipv4(),
                    Protocol::V6 => addr.is_ipv6(),
                });
                match addrs.next() {
                    Some(addr) => addr,
                    None => {
                        inner.fire_error(&WsError::ResolveFailed(target));
                        return;
                    }
                }
            }
            Err(e) => {
                inner.fire_error(&WsError::ResolveFailed(format!("{target}: {e}")));
                return;
            }
        };

        let tcp = match TcpStream::connect(addr).await {
            Ok(tcp) => tcp,
            Err(e) => {
                inner.fire_error(&WsError::ConnectionFailed(format!("{addr}: {e}")));
                return;
            }
        };
        *inner.peer_addr.lock().unwrap() = tcp.peer_addr().ok();

        let mut stream = match &options.security {
            None => WsStream::Plain(tcp),
            Some(ctx) => {
                let config = match crate::tls::client_config(ctx) {
                    Ok(config) => config,
                    Err(e) => {
                        inner.fire_error(&e);
                        inner.fire_close_pre_open(CLOSE_PROTOCOL_ERROR, "SSL/TLS handshake failed");
                        return;
                    }
                };
                let name = match crate::tls::server_name(ctx, &options.address) {
                    Ok(name) => name,
                    Err(e) => {
                        inner.fire_error(&e);
                        inner.fire_close_pre_open(CLOSE_PROTOCOL_ERROR, "SSL/TLS handshake failed");
                        return;
                    }
                };
                let connector = TlsConnector::from(Arc::new(config));
                match connector.connect(name, tcp).await {
                    Ok(tls) => WsStream::ClientTls(Box::new(tls)),
                    Err(e) => {
                        inner.fire_error(&WsError::TlsFailed(e.to_string()));
                        inner.fire_close_pre_open(CLOSE_PROTOCOL_ERROR, "SSL/TLS handshake failed");
                        return;
                    }
                }
            }
        };

        let key = handshake::gen_key();
        let request = handshake::upgrade_request(
            &options.path,
            &key,
            &options.sub_protocols,
            &options.headers,
        );
        let wire = encode_request(&request, &options.address, options.port);
        if let Err(e) = stream.write_all(wire.as_bytes()).await {
            inner.fire_error(&e.into());
            return;
        }

        let mut buf = BytesMut::with_capacity(1024);
        let head = match read_head(&mut stream, &mut buf).await {
            Ok(head) => head,
            Err(e) => {
                inner.fire_error(&e);
                return;
            }
        };
        let mut response = match parse_response(&head) {
            Ok(response) => response,
            Err(e) => {
                inner.fire_error(&e);
                inner.reject_response(
                    &mut stream,
                    HandshakeResponse::with_status(505),
                )
                .await;
                return;
            }
        };
        read_diagnostic_body(&mut stream, &mut buf, &mut response).await;

        if let Err(reason) = handshake::validate_response(&response, &key) {
            tracing::debug!("handshake rejected: {reason}");
            inner.reject_response(&mut stream, response).await;
            return;
        }

        tracing::debug!("client handshake complete with {addr}");
        let peer = PeerHandshake::Response(response);
        *inner.peer_handshake.write().unwrap() = Some(peer.clone());
        let read_half = self.open(stream);
        (inner.events_snapshot().on_connected)(&peer);
        self.start_reader(read_half, buf);
    }

    pub(crate) async fn accept<F>(
        &self,
        tcp: TcpStream,
        tls: Option<tokio_rustls::TlsAcceptor>,
        on_upgraded: F,
    ) where
        F: FnOnce(&Endpoint, &HandshakeRequest),
    {
        let inner = &self.inner;
        *inner.peer_addr.lock().unwrap() = tcp.peer_addr().ok();

        let mut stream = match tls {
            None => WsStream::Plain(tcp),
            Some(acceptor) => match acceptor.accept(tcp).await {
                Ok(tls) => WsStream::ServerTls(Box::new(tls)),
                Err(e) => {
                    inner.fire_error(&WsError::TlsFailed(e.to_string()));
                    inner.fire_close_pre_open(CLOSE_PROTOCOL_ERROR, "SSL/TLS handshake failed");
                    return;
                }
            },
        };

        let mut buf = BytesMut::with_capacity(1024);
        let head = match read_head(&mut stream, &mut buf).await {
            Ok(head) => head,
            Err(e) => {
                inner.fire_error(&e);
                inner.fire_close_pre_open(CLOSE_PROTOCOL_ERROR, "Error trying to read handshake");
                return;
            }
        };
        let request = match parse_request(&head) {
            Ok(request) => request,
            Err(_) => {
                self.reject_request(stream, HandshakeRequest::default(), 400, "malformed request")
                    .await;
                return;
            }
        };

        if request.method != "GET" {
            self.reject_request(stream, request, 405, "").await;
            return;
        }
        if request.version != "1.1" {
            self.reject_request(stream, request, 505, "").await;
            return;
        }
        let key = match handshake::validate_request(&request) {
            Ok(key) => key,
            Err(diagnostic) => {
                self.reject_request(stream, request, 400, &diagnostic).await;
                return;
            }
        };

        let response = handshake::upgrade_response(&key);
        if let Err(e) = stream.write_all(encode_response(&response).as_bytes()).await {
            inner.fire_error(&e.into());
            inner.fire_close_pre_open(CLOSE_ABNORMAL, "Abnormal closure");
            return;
        }

        tracing::debug!(peer = ?self.peer_addr(), "server handshake complete");
        let peer = PeerHandshake::Request(request.clone());
        *inner.peer_handshake.write().unwrap() = Some(peer.clone());
        let read_half = self.open(stream);
        on_upgraded(self, &request);
        (inner.events_snapshot().on_connected)(&peer);
        self.start_reader(read_half, buf);
    }

    /// write the error response, notify, and tear the socket down
    async fn reject_request(
        &self,
        mut stream: WsStream,
        request: HandshakeRequest,
        status: u16,
        diagnostic: &str,
    ) {
        let mut response = HandshakeResponse::with_status(status);
        response.body = diagnostic.to_string();
        let _ = stream.write_all(encode_response(&response).as_bytes()).await;
        let _ = stream.shutdown().await;
        let events = self.inner.events_snapshot();
        (events.on_unexpected_handshake)(&PeerHandshake::Request(request));
        self.inner
            .fire_close_pre_open(CLOSE_PROTOCOL_ERROR, "Protocol error");
    }

    /// transition to open and start the writer; the caller fires the
    /// connected notifications before handing the read half to
    /// [`Endpoint::start_reader`], so no message event can precede them
    fn open(&self, stream: WsStream) -> ReadHalf<WsStream> {
        let inner = &self.inner;
        inner.wait_close_frame_response.store(true, Ordering::Release);
        inner.state.set(ConnectionState::Open);

        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        *inner.writer_tx.lock().unwrap() = Some(tx);
        tokio::spawn(write_loop(inner.clone_arc(), write_half, rx));
        read_half
    }

    fn start_reader(&self, read_half: ReadHalf<WsStream>, remainder: BytesMut) {
        let inner = &self.inner;
        if inner.state.load() == ConnectionState::Closed {
            return;
        }
        *inner.reader_task.lock().unwrap() = Some(tokio::spawn(read_loop(
            inner.clone_arc(),
            read_half,
            remainder,
        )));
    }

    /// send one text frame; false when the connection is not open or
    /// `text` is empty
    pub fn write(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        self.inner
            .send_data(Frame::text(self.inner.mask_for_role(), text))
    }

    /// send one binary frame; false when the connection is not open or
    /// `data` is empty
    pub fn write_buffer(&self, data: &[u8]) -> bool {
        if data.is_empty() {
            return false;
        }
        self.inner
            .send_data(Frame::binary(self.inner.mask_for_role(), data))
    }

    /// send a ping control frame with an empty payload
    pub fn ping(&self) -> bool {
        self.inner
            .send_data(Frame::ping(self.inner.mask_for_role(), b""))
    }

    /// send a pong control frame with an empty payload
    pub fn pong(&self) -> bool {
        self.inner
            .send_data(Frame::pong(self.inner.mask_for_role(), b""))
    }

    /// initiate the graceful close handshake
    ///
    /// Sends a close frame carrying `code` and `reason`, keeps reading
    /// for the peer's echo, and bounds the wait with the idle timer.
    /// Idempotent; a no-op unless the connection is open.
    pub fn end(&self, code: u16, reason: &str) {
        if self
            .inner
            .state
            .transition(ConnectionState::Open, ConnectionState::Closing)
        {
            self.inner.send_close_frame(code, reason, true);
        }
    }

    /// force an immediate shutdown from any state; idempotent
    pub fn close(&self, code: u16, reason: &str) {
        self.inner.close_now(code, reason);
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.inner.role)
            .field("state", &self.inner.state.load())
            .field("peer_addr", &self.peer_addr())
            .finish()
    }
}

impl Inner {
    fn clone_arc(self: &Arc<Self>) -> Arc<Self> {
        Arc::clone(self)
    }

    fn events_snapshot(&self) -> Arc<EndpointEvents> {
        self.events.read().unwrap().clone()
    }

    fn mask_for_role(&self) -> Option<[u8; 4]> {
        match self.role {
            Role::Client => Some(gen_mask()),
            Role::Server => None,
        }
    }

    fn fire_error(&self, error: &WsError) {
        tracing::debug!(?error, "connection error");
        (self.events_snapshot().on_error)(error);
    }

    /// close notification for failures before the connection opened;
    /// the state stays closed so the single-fire gate never ran
    fn fire_close_pre_open(&self, code: u16, reason: &str) {
        (self.events_snapshot().on_close)(code, reason);
        self.run_detach_hook();
    }

    fn run_detach_hook(&self) {
        if let Some(hook) = self.detach_hook.lock().unwrap().take() {
            hook();
        }
    }

    fn send_data(&self, frame: Frame) -> bool {
        if self.state.load() != ConnectionState::Open {
            return false;
        }
        let tx = self.writer_tx.lock().unwrap();
        match tx.as_ref() {
            Some(tx) => tx.send(WriteCmd::Frame(frame.encode_to_bytes())).is_ok(),
            None => false,
        }
    }

    /// queue the close frame; `wait_for_peer` keeps the connection in
    /// the closing state until the peer echoes or the timer fires
    fn send_close_frame(&self, code: u16, reason: &str, wait_for_peer: bool) {
        self.wait_close_frame_response
            .store(wait_for_peer, Ordering::Release);
        let mut reason_wire = reason;
        while reason_wire.len() > 123 {
            let mut cut = reason_wire.len() - 1;
            while !reason_wire.is_char_boundary(cut) {
                cut -= 1;
            }
            reason_wire = &reason_wire[..cut];
        }
        let frame = Frame::close(self.mask_for_role(), code, reason_wire);
        let sent = {
            let tx = self.writer_tx.lock().unwrap();
            match tx.as_ref() {
                Some(tx) => tx
                    .send(WriteCmd::CloseFrame {
                        bytes: frame.encode_to_bytes(),
                        code,
                        reason: reason.to_string(),
                        wait_for_peer,
                    })
                    .is_ok(),
                None => false,
            }
        };
        if !sent {
            self.close_now(code, reason);
        }
    }

    /// the writer finished sending our close frame
    fn close_frame_sent(self: &Arc<Self>, code: u16, reason: &str, wait_for_peer: bool) {
        if !wait_for_peer || !self.wait_close_frame_response.load(Ordering::Acquire) {
            self.close_now(code, reason);
            return;
        }
        self.start_idle_timer();
    }

    fn start_idle_timer(self: &Arc<Self>) {
        let timeout = match self.idle_timeout {
            Some(timeout) => timeout,
            None => return,
        };
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if inner.state.load() != ConnectionState::Closed {
                tracing::debug!("close handshake timed out");
                inner.close_now(CLOSE_NORMAL, "Timeout");
            }
        });
        if let Some(old) = self.timer_task.lock().unwrap().replace(handle) {
            old.abort();
        }
    }

    /// final transition; the state swap makes on_close single-fire
    fn close_now(&self, code: u16, reason: &str) {
        if self.state.shutdown() == ConnectionState::Closed {
            return;
        }
        self.wait_close_frame_response.store(true, Ordering::Release);
        if let Some(timer) = self.timer_task.lock().unwrap().take() {
            timer.abort();
        }
        if let Some(reader) = self.reader_task.lock().unwrap().take() {
            reader.abort();
        }
        if let Some(tx) = self.writer_tx.lock().unwrap().take() {
            let _ = tx.send(WriteCmd::Shutdown);
        }
        tracing::debug!(code, reason, "connection closed");
        (self.events_snapshot().on_close)(code, reason);
        self.run_detach_hook();
    }

    /// protocol violation: send 1002 to the peer, then shut down without
    /// waiting for an echo
    fn protocol_violation(self: &Arc<Self>, reason: &str) {
        if self
            .state
            .transition(ConnectionState::Open, ConnectionState::Closing)
        {
            self.send_close_frame(CLOSE_PROTOCOL_ERROR, reason, false);
        } else {
            self.close_now(CLOSE_PROTOCOL_ERROR, reason);
        }
    }

    fn handle_peer_close(self: &Arc<Self>, code: u16, reason: &str) {
        if self
            .state
            .transition(ConnectionState::Open, ConnectionState::Closing)
        {
            // peer initiated: echo its code, then finish
            self.send_close_frame(code, reason, false);
        } else {
            // our close frame is out; the peer's echo completes the exchange
            self.close_now(code, reason);
        }
    }

    fn abnormal_close(&self, error: Option<WsError>) {
        if let Some(error) = error {
            self.fire_error(&error);
        }
        self.close_now(CLOSE_ABNORMAL, "Abnormal closure");
    }

    /// dispatch one decoded frame; false stops the read loop
    fn dispatch(self: &Arc<Self>, frame: Frame) -> bool {
        let masked = frame.masking_key.is_some();
        let violation = match self.role {
            // a server must only see masked data frames
            Role::Server => frame.opcode.is_data() && !masked,
            // a client must never see masked frames
            Role::Client => masked,
        };
        if violation {
            let error = match self.role {
                Role::Server => ProtocolError::MissingMask,
                Role::Client => ProtocolError::UnexpectedMask,
            };
            self.fire_error(&WsError::protocol(CLOSE_PROTOCOL_ERROR, error));
            self.protocol_violation("Protocol error - unexpected payload mask");
            return false;
        }
        if frame.opcode.is_reserved() {
            self.fire_error(&WsError::protocol(
                CLOSE_PROTOCOL_ERROR,
                ProtocolError::UnsupportedFrame(frame.opcode),
            ));
            self.protocol_violation("Protocol error - failed to decode payload");
            return false;
        }
        if frame.opcode.is_control() {
            if !frame.fin {
                self.fire_error(&WsError::protocol(
                    CLOSE_PROTOCOL_ERROR,
                    ProtocolError::FragmentedControlFrame,
                ));
                self.protocol_violation("Protocol error - invalid control frame");
                return false;
            }
            if frame.payload_len() > 125 {
                self.fire_error(&WsError::protocol(
                    CLOSE_PROTOCOL_ERROR,
                    ProtocolError::ControlFrameTooBig(frame.payload_len()),
                ));
                self.protocol_violation("Protocol error - invalid control frame");
                return false;
            }
        }

        let open = self.state.load() == ConnectionState::Open;
        let events = self.events_snapshot();
        match frame.opcode {
            OpCode::Text if open => (events.on_message_received)(&frame.payload, false),
            OpCode::Binary | OpCode::Continue if open => {
                (events.on_message_received)(&frame.payload, true)
            }
            OpCode::Text | OpCode::Binary | OpCode::Continue => {}
            OpCode::Ping => {
                (events.on_ping)();
                if open {
                    self.send_data(Frame::pong(self.mask_for_role(), b""));
                }
            }
            OpCode::Pong => (events.on_pong)(),
            OpCode::Close => {
                let info = parse_close_payload(&frame.payload);
                self.handle_peer_close(info.code, &info.reason);
                return false;
            }
            OpCode::ReservedNonControl | OpCode::ReservedControl => unreachable!(),
        }
        self.state.load() != ConnectionState::Closed
    }
}

async fn write_loop(
    inner: Arc<Inner>,
    mut write_half: WriteHalf<WsStream>,
    mut rx: mpsc::UnboundedReceiver<WriteCmd>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WriteCmd::Frame(bytes) => {
                if let Err(e) = write_half.write_all(&bytes).await {
                    inner.abnormal_close(Some(e.into()));
                    break;
                }
            }
            WriteCmd::CloseFrame {
                bytes,
                code,
                reason,
                wait_for_peer,
            } => {
                if let Err(e) = write_half.write_all(&bytes).await {
                    inner.fire_error(&e.into());
                    inner.close_now(code, &reason);
                    break;
                }
                inner.close_frame_sent(code, &reason, wait_for_peer);
            }
            WriteCmd::Shutdown => break,
        }
    }
    // graceful tls close_notify, then tcp shutdown
    let _ = write_half.shutdown().await;
}

async fn read_loop(inner: Arc<Inner>, mut read_half: ReadHalf<WsStream>, mut buf: BytesMut) {
    let mut codec = FrameCodec::default();
    loop {
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => {
                    if !inner.dispatch(frame) {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    inner.fire_error(&e);
                    inner.protocol_violation("Protocol error - failed to decode payload");
                    return;
                }
            }
        }
        if inner.state.load() == ConnectionState::Closed {
            return;
        }
        match read_half.read_buf(&mut buf).await {
            Ok(0) => {
                inner.abnormal_close(Some(WsError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed without a close frame",
                ))));
                return;
            }
            Ok(_) => {}
            Err(e) => {
                inner.abnormal_close(Some(e.into()));
                return;
            }
        }
    }
}

impl Inner {
    async fn reject_response(&self, stream: &mut WsStream, response: HandshakeResponse) {
        let _ = stream.shutdown().await;
        let events = self.events_snapshot();
        (events.on_unexpected_handshake)(&PeerHandshake::Response(response));
        self.fire_close_pre_open(CLOSE_PROTOCOL_ERROR, "Protocol error");
    }
}

/// read until the blank line ending the http head; the remainder stays
/// in `buf` for the frame loop
async fn read_head<S>(stream: &mut S, buf: &mut BytesMut) -> Result<Vec<u8>, WsError>
where
    S: tokio::io::AsyncRead + Unpin,
{
    loop {
        if let Some(at) = find_head_end(buf) {
            return Ok(buf.split_to(at).to_vec());
        }
        if buf.len() > MAX_HANDSHAKE_HEAD {
            return Err(WsError::HandshakeFailed("handshake head too large".to_string()));
        }
        if stream.read_buf(buf).await? == 0 {
            return Err(WsError::HandshakeFailed(
                "connection closed during handshake".to_string(),
            ));
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|at| at + 4)
}

/// best-effort read of a content-length delimited diagnostic body
async fn read_diagnostic_body(
    stream: &mut WsStream,
    buf: &mut BytesMut,
    response: &mut HandshakeResponse,
) {
    let length = response
        .headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0)
        .min(MAX_DIAGNOSTIC_BODY);
    if length == 0 || response.status_code == 101 {
        return;
    }
    while buf.len() < length {
        match stream.read_buf(buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
    let take = length.min(buf.len());
    let body = buf.split_to(take);
    response.body = String::from_utf8_lossy(&body).to_string();
}
