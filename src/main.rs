pub mod cli;
pub mod config;
pub mod mqtt;

use crate::cli::Args;
use crate::mqtt::config::{BrokerAddress, MqttConfig};
use crate::mqtt::message_manager::PrintHandler;
use crate::mqtt::mqtt_handler::RumqttTransport;
use crate::mqtt::session::Subscriber;
use color_eyre::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_or_exit();
    setup(args.log_level())?;

    info!("Starting MQTT subscriber...");
    let target = args.config_sources().resolve()?;
    let settings = MqttConfig::load(args.settings.as_deref())?;
    info!(
        "Connecting to {} and subscribing to topic '{}'",
        target.broker(),
        target.topic()
    );

    let broker = BrokerAddress::parse(target.broker())?;
    let transport = RumqttTransport::new(&broker, &settings);

    let connected = Subscriber::create(target, Box::new(transport))
        .connect()
        .await?;
    info!(
        "Connected to MQTT broker with client ID '{}' and broker URI '{}'",
        settings.client_id,
        connected.target().broker()
    );

    let subscribed = connected
        .subscribe(Box::new(PrintHandler::new(settings.print_timestamps)))
        .await?;

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());
    info!("Listening to topic. Press Ctrl+C to disconnect.");

    let closed = subscribed.run_until_shutdown(shutdown).await.shutdown().await;
    info!("Session closed after {} messages", closed.messages_received());

    Ok(())
}

fn setup(level: Level) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env(level);
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(level > Level::INFO)
        .with_line_number(level > Level::INFO)
        .init();
}

/// Cancels `shutdown` on Ctrl+C, or on SIGTERM where available.
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut terminate) => {
                    tokio::select! {
                        result = tokio::signal::ctrl_c() => {
                            if let Err(e) = result {
                                error!("Unable to listen for Ctrl+C: {}", e);
                            }
                        }
                        _ = terminate.recv() => {}
                    }
                }
                Err(e) => {
                    error!("Unable to listen for SIGTERM: {}", e);
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Unable to listen for Ctrl+C: {}", e);
                    }
                }
            }
        }
        #[cfg(not(unix))]
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl+C: {}", e);
        }

        info!("Interrupt received.");
        shutdown.cancel();
    });
}
