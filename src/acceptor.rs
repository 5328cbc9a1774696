use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::endpoint::Endpoint;
use crate::errors::WsError;
use crate::events::AcceptorEvents;
use crate::{Protocol, ServerOptions};

const LISTEN_BACKLOG: u32 = 1024;

/// websocket server acceptor
///
/// Binds a listener, accepts peers forever and runs one [`Endpoint`]
/// per accepted socket. The acceptor owns the listener and shares each
/// endpoint with the application, which may keep a clone past the
/// acceptor's lifetime. While `backlog` endpoints are live, additional
/// sockets are shut immediately without an `on_connection`.
#[derive(Clone)]
pub struct WsAcceptor {
    inner: Arc<AcceptorInner>,
}

struct AcceptorInner {
    options: ServerOptions,
    is_open: AtomicBool,
    events: RwLock<Arc<AcceptorEvents>>,
    local_addr: Mutex<Option<SocketAddr>>,
    clients: Mutex<HashMap<u64, Endpoint>>,
    next_id: AtomicU64,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl WsAcceptor {
    /// construct a closed acceptor with the given bind options
    pub fn new(options: ServerOptions) -> Self {
        Self {
            inner: Arc::new(AcceptorInner {
                options,
                is_open: AtomicBool::new(false),
                events: RwLock::new(Arc::new(AcceptorEvents::default())),
                local_addr: Mutex::new(None),
                clients: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                accept_task: Mutex::new(None),
            }),
        }
    }

    /// replace the acceptor event callbacks
    pub fn set_events(&self, events: AcceptorEvents) {
        *self.inner.events.write().unwrap() = Arc::new(events);
    }

    /// bound listener address, once open (useful with port 0)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock().unwrap()
    }

    /// number of live endpoints
    pub fn connection_count(&self) -> usize {
        self.inner.clients.lock().unwrap().len()
    }

    /// bind, listen and start the perpetual accept loop
    ///
    /// Returns `false` when the acceptor is already open or the bind
    /// fails; bind failures are also reported through `on_error`.
    /// A closed acceptor may be opened again.
    pub fn open(&self) -> bool {
        let inner = &self.inner;
        if inner.is_open.swap(true, Ordering::AcqRel) {
            return false;
        }

        let listener = match inner.bind() {
            Ok(listener) => listener,
            Err(e) => {
                inner.fire_error(&e);
                inner.is_open.store(false, Ordering::Release);
                return false;
            }
        };
        let tls = match &inner.options.security {
            None => None,
            Some(ctx) => match crate::tls::server_config(ctx) {
                Ok(config) => Some(TlsAcceptor::from(Arc::new(config))),
                Err(e) => {
                    inner.fire_error(&e);
                    inner.is_open.store(false, Ordering::Release);
                    return false;
                }
            },
        };

        *inner.local_addr.lock().unwrap() = listener.local_addr().ok();
        tracing::debug!(addr = ?self.local_addr(), "acceptor listening");
        *inner.accept_task.lock().unwrap() = Some(tokio::spawn(accept_loop(
            Arc::clone(inner),
            listener,
            tls,
        )));
        true
    }

    /// stop accepting, force-close every live endpoint and release the
    /// listener; idempotent, and `open` may be called again afterwards
    pub fn close(&self) {
        let inner = &self.inner;
        if !inner.is_open.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = inner.accept_task.lock().unwrap().take() {
            task.abort();
        }
        // drain first: the endpoints' detach hooks must not contend on
        // the live set while it is being walked
        let drained: Vec<Endpoint> = inner.clients.lock().unwrap().drain().map(|(_, c)| c).collect();
        for endpoint in drained {
            endpoint.close(1000, "");
        }
        *inner.local_addr.lock().unwrap() = None;
        tracing::debug!("acceptor closed");
        (inner.events_snapshot().on_close)();
    }
}

impl std::fmt::Debug for WsAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsAcceptor")
            .field("open", &self.inner.is_open.load(Ordering::Acquire))
            .field("local_addr", &self.local_addr())
            .field("connections", &self.connection_count())
            .finish()
    }
}

impl AcceptorInner {
    fn events_snapshot(&self) -> Arc<AcceptorEvents> {
        self.events.read().unwrap().clone()
    }

    fn fire_error(&self, error: &WsError) {
        tracing::debug!(?error, "acceptor error");
        (self.events_snapshot().on_error)(error);
    }

    fn bind(&self) -> Result<TcpListener, WsError> {
        let ip: IpAddr = if self.options.address.is_empty() {
            match self.options.protocol {
                Protocol::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                Protocol::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            }
        } else {
            self.options
                .address
                .parse()
                .map_err(|_| WsError::ConnectionFailed(format!("invalid bind address `{}`", self.options.address)))?
        };
        let socket = match self.options.protocol {
            Protocol::V4 => TcpSocket::new_v4()?,
            Protocol::V6 => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(self.options.reuse_address)?;
        socket.bind(SocketAddr::new(ip, self.options.port))?;
        Ok(socket.listen(LISTEN_BACKLOG)?)
    }
}

async fn accept_loop(
    inner: Arc<AcceptorInner>,
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
) {
    loop {
        match listener.accept().await {
            Ok((tcp, addr)) => {
                let over_backlog = {
                    let clients = inner.clients.lock().unwrap();
                    clients.len() as u64 >= inner.options.backlog as u64
                };
                if over_backlog {
                    tracing::debug!(%addr, "backlog full, dropping connection");
                    shut_socket(tcp).await;
                    continue;
                }

                let endpoint = Endpoint::server(inner.options.idle_timeout_secs);
                let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
                inner.clients.lock().unwrap().insert(id, endpoint.clone());
                let weak = Arc::downgrade(&inner);
                endpoint.set_detach_hook(Box::new(move || {
                    if let Some(acceptor) = weak.upgrade() {
                        acceptor.clients.lock().unwrap().remove(&id);
                    }
                }));

                let inner = Arc::clone(&inner);
                let tls = tls.clone();
                tokio::spawn(async move {
                    endpoint
                        .accept(tcp, tls, |endpoint, request| {
                            (inner.events_snapshot().on_connection)(endpoint, request);
                        })
                        .await;
                });
            }
            Err(e) => {
                if !inner.is_open.load(Ordering::Acquire) {
                    return;
                }
                inner.fire_error(&e.into());
            }
        }
    }
}

async fn shut_socket(mut tcp: TcpStream) {
    let _ = tcp.shutdown().await;
}
