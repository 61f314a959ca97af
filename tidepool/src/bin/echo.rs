//! Echo service - a UDP server answering `{"cmd":"echo"}` and a client for it.
//!
//! # Usage
//!
//! Terminal 1:
//! ```bash
//! cargo run --bin tidepool-echo -- serve --port 4000
//! ```
//!
//! Terminal 2:
//! ```bash
//! cargo run --bin tidepool-echo -- send --to udp://127.0.0.1:4000 --message ble
//! ```

use std::rc::Rc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;
use tidepool::{
    Client, Pattern, RequestPacket, ResponsePacket, Router, Server, TokioDatagramProvider,
    TransportOptions,
};
use tokio::task::LocalSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "tidepool-echo")]
#[command(about = "Echo service over tidepool UDP sessions", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve echo requests until Ctrl-C
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind
        #[arg(short, long, default_value = "4000")]
        port: u16,
    },
    /// Send one echo request and print the reply
    Send {
        /// Server URL, e.g. udp://127.0.0.1:4000
        #[arg(long)]
        to: String,

        /// Text to echo
        #[arg(short, long, default_value = "ble")]
        message: String,

        /// Reply timeout in milliseconds
        #[arg(long, default_value = "2000")]
        timeout_ms: u64,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tidepool=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let local = LocalSet::new();
    local
        .run_until(async move {
            match args.command {
                Command::Serve { host, port } => serve(host, port).await,
                Command::Send {
                    to,
                    message,
                    timeout_ms,
                } => send(to, message, Duration::from_millis(timeout_ms)).await,
            }
        })
        .await
}

async fn serve(host: String, port: u16) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = Router::new().route(Pattern::cmd("echo"), |request: RequestPacket| async move {
        tracing::info!(remote = ?request.remote, "echo");
        Ok(ResponsePacket::ok(request.body))
    });

    let server = Server::new(
        TokioDatagramProvider,
        TransportOptions::default().with_address(host, port),
    );
    let addr = server.start(Rc::new(router)).await?;
    tracing::info!(%addr, "echo server ready, Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    server.shutdown().await?;
    Ok(())
}

async fn send(
    to: String,
    message: String,
    timeout: Duration,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let client = Client::new(TokioDatagramProvider, TransportOptions::default());
    let request = RequestPacket::new(Pattern::cmd("echo"))
        .with_url(to)
        .with_body(json!({ "message": message }))
        .with_timeout(timeout);

    let response = client.send(request).await?.into_result()?;
    match response.body.as_json() {
        Some(value) => println!("{value}"),
        None => println!("{:?}", response.body),
    }
    client.shutdown();
    Ok(())
}
