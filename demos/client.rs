use std::io::Write;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::util::SubscriberInitExt;
use wsnet::{events::EndpointEvents, ClientOptions, Endpoint};

/// interactive websocket client demo
#[derive(Parser)]
struct Args {
    /// server host
    #[clap(long, default_value = "127.0.0.1")]
    host: String,
    /// server port
    #[clap(short, long, default_value = "9000")]
    port: u16,
    /// request path
    #[clap(long, default_value = "/")]
    path: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::fmt()
        .with_max_level(Level::INFO)
        .finish()
        .try_init()
        .expect("failed to init log");
    let args = Args::parse();

    let client = Endpoint::client(ClientOptions {
        address: args.host,
        port: args.port,
        path: args.path,
        ..Default::default()
    });
    let mut events = EndpointEvents::default();
    events.on_message_received = Box::new(|payload, _is_binary| {
        println!("[RECV] > {}", String::from_utf8_lossy(payload).trim());
    });
    events.on_close = Box::new(|code, reason| {
        println!("[CLOSE] > {code} {reason}");
        std::process::exit(0);
    });
    events.on_error = Box::new(|error| eprintln!("[ERROR] > {error}"));
    client.set_events(events);

    if !client.connect().await {
        return;
    }

    let stdin = std::io::stdin();
    let mut input = String::new();
    loop {
        print!("[SEND] > ");
        std::io::stdout().flush().unwrap();
        input.clear();
        if stdin.read_line(&mut input).unwrap() == 0 || input.trim() == "quit" {
            break;
        }
        client.write(input.trim());
    }
    client.end(1000, "");
    tokio::time::sleep(std::time::Duration::from_secs(6)).await;
}
