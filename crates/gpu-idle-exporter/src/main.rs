use anyhow::Result;
use clap::Parser;
use gpu_idle_exporter::app::ApplicationBuilder;
use gpu_idle_exporter::config::Cli;
use gpu_idle_exporter::config::Commands;
use gpu_idle_exporter::config::DaemonArgs;
use gpu_idle_exporter::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(*daemon_args).await,
    }
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    let _guard = logging::init(daemon_args.gpu_metrics_file.as_deref())?;

    tracing::info!("Starting gpu idle exporter {}", &**version::VERSION);

    let app = ApplicationBuilder::new(daemon_args).build()?;
    app.run().await?;

    Ok(())
}
