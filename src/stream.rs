use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{client, server};

/// byte transport for one connection, cleartext or tls
///
/// Frame and handshake logic never sees which variant it runs on. On the
/// tls variants `poll_shutdown` sends the close_notify alert before the
/// tcp shutdown.
#[derive(Debug)]
pub enum WsStream {
    /// cleartext tcp
    Plain(TcpStream),
    /// client side tls
    ClientTls(Box<client::TlsStream<TcpStream>>),
    /// server side tls
    ServerTls(Box<server::TlsStream<TcpStream>>),
}

impl AsyncRead for WsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            WsStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            WsStream::ClientTls(stream) => Pin::new(stream).poll_read(cx, buf),
            WsStream::ServerTls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for WsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        match self.get_mut() {
            WsStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            WsStream::ClientTls(stream) => Pin::new(stream).poll_write(cx, buf),
            WsStream::ServerTls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            WsStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            WsStream::ClientTls(stream) => Pin::new(stream).poll_flush(cx),
            WsStream::ServerTls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            WsStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            WsStream::ClientTls(stream) => Pin::new(stream).poll_shutdown(cx),
            WsStream::ServerTls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
