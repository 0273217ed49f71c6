mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use mplaunch::app::App;
use mplaunch::config::AppConfig;
use mplaunch::control::ServiceStatus;
use mplaunch::menu::{InquirePrompter, Menu};
use mplaunch::multipass::{Instance, InstanceCommand, InstanceState};

fn main() {
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    match real_main() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    }
}

/// Returns the process exit code
fn real_main() -> Result<i32> {
    let args = cli::Args::parse();

    let cfg_path = match args.config {
        Some(path) => path,
        None => AppConfig::default_path()?,
    };
    let config = AppConfig::load_or_create(&cfg_path)?;
    config
        .ensure_cloud_init()
        .context("Failed to prepare cloud-init template")?;

    let app = App::new(config);

    match args.sub.unwrap_or(cli::Cmd::Menu) {
        cli::Cmd::Menu => Menu::new(&app, InquirePrompter).run().map(|()| 0),
        cli::Cmd::Status => handle_status(&app),
        cli::Cmd::Install => handle_install(&app),
        cli::Cmd::EnsureService => {
            app.ensure_service()?;
            println!("{} is running", app.config.service_name);
            Ok(0)
        }
        cli::Cmd::List => {
            app.prepare()?;
            print_instances(&app.list()?);
            Ok(0)
        }
        cli::Cmd::Launch { shell } => handle_launch(&app, shell),
        cli::Cmd::Shell { name } => run_on(&app, InstanceCommand::Shell, name),
        cli::Cmd::Start { name } => run_on(&app, InstanceCommand::Start, name),
        cli::Cmd::Stop { name } => run_on(&app, InstanceCommand::Stop, name),
        cli::Cmd::Restart { name } => run_on(&app, InstanceCommand::Restart, name),
        cli::Cmd::Suspend { name } => run_on(&app, InstanceCommand::Suspend, name),
        cli::Cmd::Delete { name } => run_on(&app, InstanceCommand::Delete, name),
        cli::Cmd::Info { name } => run_on(&app, InstanceCommand::Info, name),
        cli::Cmd::Purge => {
            println!("{}", app.purge()?);
            Ok(0)
        }
        cli::Cmd::Uninstall => {
            app.clear_installation_files()?;
            println!("Installation files removed");
            Ok(0)
        }
    }
}

/// Exit 0 when installed and running, 1 otherwise
fn handle_status(app: &App) -> Result<i32> {
    let status = app.status()?;
    println!(
        "multipass: {}",
        if status.installed { "installed" } else { "not installed" }
    );
    match status.service {
        Some(state) => println!("{}: {state:?}", app.config.service_name),
        None => println!("{}: not registered", app.config.service_name),
    }
    Ok(if status.installed && status.service == Some(ServiceStatus::Running) {
        0
    } else {
        1
    })
}

fn handle_install(app: &App) -> Result<i32> {
    if app.ensure_installed()? {
        println!("Multipass is installed");
        Ok(0)
    } else {
        println!("Multipass is still not installed");
        Ok(1)
    }
}

fn handle_launch(app: &App, open_shell: bool) -> Result<i32> {
    app.prepare()?;
    let Some(instance) = app.create_instance()? else {
        anyhow::bail!("Launch finished but no instance is listed");
    };
    info!("Instance {} is {}", instance.name, instance.state);
    if open_shell {
        app.execute(InstanceCommand::Shell, &instance)?;
    } else {
        print_instances(std::slice::from_ref(&instance));
    }
    Ok(0)
}

fn run_on(app: &App, command: InstanceCommand, name: String) -> Result<i32> {
    app.prepare()?;
    let instance = Instance {
        name,
        state: InstanceState::Unknown,
        ipv4: String::new(),
    };
    let output = app.execute(command, &instance)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(0)
}

fn print_instances(instances: &[Instance]) {
    if instances.is_empty() {
        println!("No instances found");
        return;
    }
    for instance in instances {
        println!("{instance}");
    }
}
