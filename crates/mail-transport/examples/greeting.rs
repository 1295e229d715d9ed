//! Example: open a transport, print the server greeting and log out
//!
//! ## Running
//!
//! ```bash
//! RUST_LOG=mail_transport=debug cargo run --package mail-transport --example greeting -- imap.example.com 993
//! ```
//!
//! Pass `--insecure` as a third argument to accept any certificate.

use std::sync::Arc;

use anyhow::Context;
use mail_transport::{Config, Connector, DataChannelState, Flags, MailTransport, StatusListener};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct PrintListener;

impl StatusListener for PrintListener {
    fn set_data_channel_state(&self, state: DataChannelState) {
        eprintln!("data channel state: {state}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().context("usage: greeting <host> [port] [--insecure]")?;
    let port = args
        .next()
        .map(|port| port.parse::<u16>())
        .transpose()
        .context("port must be a number")?
        .unwrap_or(993);
    let insecure = args.next().is_some_and(|arg| arg == "--insecure");

    let config = Config::builder(host)
        .port(port)
        .encrypt(port == 993)
        .trust_all(insecure)
        .build();
    let encrypted = config.flags.contains(Flags::ENCRYPT);
    let connector = Connector::new(config).with_status_listener(Arc::new(PrintListener));
    let mut transport = MailTransport::new(connector);

    transport.open().await?;
    println!("connected (tls: {encrypted})");

    let greeting = transport.read_line(true).await?;
    println!("{greeting}");

    transport.write_line("A1 LOGOUT", None).await?;
    loop {
        let line = transport.read_line(true).await?;
        println!("{line}");
        if line.is_empty() || line.starts_with("A1 ") {
            break;
        }
    }

    transport.close().await;
    Ok(())
}
