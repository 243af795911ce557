use anyhow::Result;
use clap::Parser;
use gke_operator::app::Application;
use gke_operator::app::ApplicationServices;
use gke_operator::config::Cli;
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
    let _guard = utils::logging::init();

    tracing::info!("Starting gke-operator {}", &**version::VERSION);

    let services = ApplicationServices::from_args(&cli.global)?;
    let app = Application::new(services, cli.global);

    if let Some(result) = app.run(cli.command).await? {
        println!("{result}");
    }

    Ok(())
}
