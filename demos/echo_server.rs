use clap::Parser;
use tracing::Level;
use tracing_subscriber::util::SubscriberInitExt;
use wsnet::{
    events::{AcceptorEvents, EndpointEvents},
    ServerOptions, WsAcceptor,
};

/// websocket echo server demo
#[derive(Parser)]
struct Args {
    /// server host
    #[clap(long, default_value = "127.0.0.1")]
    host: String,
    /// server port
    #[clap(short, long, default_value = "9000")]
    port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::fmt()
        .with_max_level(Level::DEBUG)
        .finish()
        .try_init()
        .expect("failed to init log");
    let args = Args::parse();
    tracing::info!("binding on {}:{}", args.host, args.port);

    let acceptor = WsAcceptor::new(ServerOptions {
        address: args.host,
        port: args.port,
        ..Default::default()
    });
    let mut events = AcceptorEvents::default();
    events.on_connection = Box::new(|endpoint, request| {
        tracing::info!("got connect from {:?} on {}", endpoint.peer_addr(), request.path);
        let peer = endpoint.clone();
        let mut endpoint_events = EndpointEvents::default();
        endpoint_events.on_message_received = Box::new(move |payload, is_binary| {
            if is_binary {
                peer.write_buffer(payload);
            } else {
                peer.write(&String::from_utf8_lossy(payload));
            }
        });
        endpoint_events.on_close = Box::new(|code, reason| {
            tracing::info!("one conn down ({code} {reason})");
        });
        endpoint.set_events(endpoint_events);
    });
    events.on_error = Box::new(|error| tracing::warn!("accept error: {error}"));
    acceptor.set_events(events);

    if !acceptor.open() {
        tracing::error!("failed to open acceptor");
        return;
    }
    tokio::signal::ctrl_c().await.ok();
    acceptor.close();
}
