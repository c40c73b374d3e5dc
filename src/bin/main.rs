use std::{
    io::{self, BufReader},
    process::ExitCode,
};

use tracing_subscriber::EnvFilter;

use svcwrap::{
    cli::{Cli, Commands, parse_args},
    config::ConfigStore,
    controller::ServiceController,
    error::ServiceError,
    reporter::Reporter,
    service::SystemdServiceManager,
};

fn main() -> ExitCode {
    let args = parse_args();
    // Diagnostics of an installed service go to its log file only.
    let as_service = matches!(args.command, Commands::Run { .. });
    if !as_service {
        init_logging(&args);
    }

    let controller = ServiceController::new(
        ConfigStore::from_env(),
        SystemdServiceManager::default(),
        Reporter::default(),
    );

    match dispatch(&controller, args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            controller.reporter().error(&err);
            if !as_service {
                eprintln!("svcwrap: {err}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn dispatch(
    controller: &ServiceController<SystemdServiceManager>,
    command: Commands,
) -> Result<(), ServiceError> {
    match command {
        Commands::Install { name, overrides } => {
            let path = controller.install(&name, &overrides)?;
            println!("Installed '{name}' ({})", path.display());
        }
        Commands::Update { name, overrides } => {
            let path = controller.update(&name, &overrides)?;
            println!("Updated '{name}' ({})", path.display());
        }
        Commands::Uninstall { name } => {
            controller.uninstall(&name)?;
            println!("Uninstalled '{name}'");
        }
        Commands::Start { name, overrides } => controller.start(&name, &overrides)?,
        Commands::Stop { name, overrides } => controller.stop(&name, &overrides)?,
        Commands::Run { name } => controller.run(&name)?,
        Commands::Test { name, overrides } => {
            controller.test(&name, &overrides, BufReader::new(io::stdin()))?
        }
        Commands::Print { name } => println!("{}", controller.print(&name)?),
    }

    Ok(())
}
