use clap::{CommandFactory, Parser};
use clap_complete::aot::generate;
use pekit::cli::{Cli, Commands};
use pekit::commands;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.global.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_file = cli.global.config_file.as_deref();

    let result = match cli.command {
        Commands::Up { no_dashboard } => commands::up::run(config_file, no_dashboard).await,
        Commands::Status => commands::status::run(config_file).await,
        Commands::Images => commands::images::run_list(config_file).await,
        Commands::Pull { role, image } => {
            commands::images::run_pull(config_file, role, &image).await
        }
        Commands::Rmi { role, image } => {
            commands::images::run_remove(config_file, role, &image).await
        }
        Commands::Toggle { role } => commands::toggle::run(config_file, role).await,
        Commands::Provision { agent_only } => {
            commands::provision::run(config_file, agent_only).await
        }
        Commands::Run { role } => commands::provision::run_agent(config_file, role).await,
        Commands::CleanCerts => commands::provision::run_clean_certs(config_file).await,
        Commands::Doctor => commands::doctor::run(config_file).await,
        Commands::Validate => commands::validate::run(config_file),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "pekit", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
