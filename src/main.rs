//! Echo server demonstrating `duplexwire`.
//!
//! Every accepted TCP connection is treated as already upgraded: text and
//! binary messages are echoed back and idle sessions are reaped.

mod cli;

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use clap::Parser;
use duplexwire::{
    CoreConfig,
    Endpoint,
    HandshakeContext,
    Message,
    Session,
    SessionRegistry,
    TimeoutReaper,
    driver::UpgradedConnection,
    panic::CallbackError,
};
use log::warn;
use tokio::net::TcpListener;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::info;

struct EchoEndpoint;

impl Endpoint for EchoEndpoint {
    fn on_open(&self, session: &Session) -> Result<(), CallbackError> {
        info!(session_id = %session.id(), "session opened");
        Ok(())
    }

    fn on_message(&self, session: &Session, message: Message) -> Result<(), CallbackError> {
        match message {
            Message::Text(text) => session.send_text(text)?,
            Message::Binary(data) => session.send_binary(data)?,
            _ => {}
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    #[cfg(feature = "metrics")]
    if let Some(addr) = cli.prometheus {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
    }
    #[cfg(not(feature = "metrics"))]
    if cli.prometheus.is_some() {
        warn!("built without the metrics feature; --prometheus ignored");
    }

    let max_message_size = NonZeroUsize::new(cli.max_message_size).ok_or("message size must be non-zero")?;
    let config = CoreConfig::builder()
        .max_message_size(max_message_size)
        .initial_read_buffer(max_message_size.min(CoreConfig::default().initial_read_buffer))
        .session_idle_timeout(cli.idle_timeout_ms.map(Duration::from_millis))
        .build()?;

    let listener = TcpListener::bind(cli.listen).await?;
    info!(addr = %listener.local_addr()?, "listening");

    let registry = Arc::new(SessionRegistry::new());
    let reaper = Arc::new(TimeoutReaper::new(config.reaper_interval));
    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();
    let reaper_task = Arc::clone(&reaper).spawn(shutdown.clone());

    loop {
        tokio::select! {
            biased;

            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                shutdown.cancel();
                break;
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        warn!("accept failed: error={error}");
                        continue;
                    }
                };
                let connection = UpgradedConnection::new(
                    stream,
                    Arc::clone(&registry),
                    config.clone(),
                    HandshakeContext::new("/"),
                    Arc::new(EchoEndpoint),
                )?;
                reaper.register(connection.coordinator());
                let token = shutdown.clone();
                tracker.spawn(async move {
                    if let Err(error) = connection.run(token).await {
                        warn!("connection failed: peer={peer}, error={error}");
                    }
                });
            }
        }
    }

    tracker.close();
    tracker.wait().await;
    reaper_task.await?;
    Ok(())
}
