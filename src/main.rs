use clap::Parser;
use secret_mirror::config::{self, Cli};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing::subscriber::set_global_default(config::subscriber(cli.log_level, cli.log_formatter))?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Running secret-mirror with config: {:?}", cli
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    secret_mirror::run(&cli, cancel).await
}

async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => warn!("Got signal from OS: interrupt"),
        _ = terminate => warn!("Got signal from OS: terminate"),
    }

    cancel.cancel();
}
