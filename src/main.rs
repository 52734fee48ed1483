use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use viper::app::Application;
use viper::config::{load_config, validate_config, AppConfig};

#[derive(Parser)]
#[command(name = "viper")]
#[command(about = "Serve the Viper sample application", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `server.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

fn configure(cli: &Cli) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    config.apply_process_env();
    if let Some(bind) = &cli.bind {
        config.server.bind_address = bind.clone();
    }
    if let Err(errors) = validate_config(&config) {
        let joined = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
        return Err(format!("invalid configuration: {joined}").into());
    }
    Ok(config)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match configure(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("viper: {e}");
            return ExitCode::FAILURE;
        }
    };

    viper::logging::init(&config.logging);
    if config.is_production() && config.auth.jwt_secret == AppConfig::default().auth.jwt_secret {
        tracing::warn!("JWT_SECRET is the built-in default; set it before exposing this service");
    }

    let mut app = Application::new(config);
    viper::demo::register(&mut app);

    match app.listen() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server stopped");
            ExitCode::FAILURE
        }
    }
}
