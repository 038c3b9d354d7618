//! # Example: TCP echo server under a supervisor
//!
//! A root group with one echo service. `on_start` binds the listener and spawns the
//! accept loop; every connection becomes a task of the same node, so Ctrl-C cancels
//! the accept loop and all open connections before `on_stop` runs.
//!
//! Run with:
//! ```text
//! cargo run --example tcp_echo --features logging
//! # then: nc 127.0.0.1 7007
//! ```

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::EnvFilter;

use servisor::{
    BoxError, CancellationToken, LogWriter, Service, ServiceNode, Settings, Subscribe,
    Supervisor, parse_address,
};

struct EchoServer {
    host: String,
    port: u16,
    bound: Mutex<Option<SocketAddr>>,
}

impl EchoServer {
    fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let raw = settings
            .get_as::<String>("echo.address")
            .context("reading echo.address")?
            .unwrap_or_else(|| "127.0.0.1".to_string());
        let (host, port) = parse_address(&raw, Some(7007)).context("parsing echo.address")?;
        Ok(Self {
            host,
            port: port.unwrap_or(7007),
            bound: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Service for EchoServer {
    fn name(&self) -> &str {
        "echo"
    }

    async fn on_start(&self, node: &ServiceNode) -> Result<(), BoxError> {
        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;
        let addr = listener.local_addr()?;
        *self.bound.lock() = Some(addr);
        tracing::info!(%addr, "echo listening");

        let owner = node.clone();
        node.spawn("accept", move |ctx| accept_loop(listener, owner, ctx))?;
        Ok(())
    }

    async fn on_stop(&self, _node: &ServiceNode) -> Result<(), BoxError> {
        if let Some(addr) = self.bound.lock().take() {
            tracing::info!(%addr, "echo closed");
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    node: ServiceNode,
    ctx: CancellationToken,
) -> Result<(), BoxError> {
    loop {
        let (stream, peer) = tokio::select! {
            _ = ctx.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        node.spawn(format!("conn-{peer}"), move |ctx| echo(stream, ctx))?;
    }
}

async fn echo(mut stream: TcpStream, ctx: CancellationToken) -> Result<(), BoxError> {
    let mut buf = [0u8; 4096];
    loop {
        let n = tokio::select! {
            _ = ctx.cancelled() => return Ok(()),
            read = stream.read(&mut buf) => read?,
        };
        if n == 0 {
            return Ok(());
        }
        stream.write_all(&buf[..n]).await?;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut settings = Settings::default();
    settings.set_default("listen", json!("127.0.0.1:7007"));
    settings.set_default("echo.address", json!("${listen}"));

    let echo = match EchoServer::from_settings(&settings) {
        Ok(echo) => echo,
        Err(err) => {
            tracing::error!(error = format!("{err:#}"), "invalid settings");
            return ExitCode::FAILURE;
        }
    };

    let root = ServiceNode::group("app");
    if let Err(err) = root.add_child(ServiceNode::new(echo)) {
        tracing::error!(error = %err, "cannot build tree");
        return ExitCode::FAILURE;
    }

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let sup = Supervisor::builder(root).with_subscribers(subs).build();

    let outcome = sup.run().await;
    if let Err(err) = &outcome {
        tracing::error!(error = %err, "service tree failed");
    }
    Supervisor::exit_code(&outcome)
}
