use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Multipass bootstrapper and instance menu")]
pub struct Args {
    /// Path to configuration file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Sub‑commands (menu if omitted)
    #[command(subcommand)]
    pub sub: Option<Cmd>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Cmd {
    /// Interactive instance menu (default if no sub‑command)
    Menu,
    /// Report installation and daemon state (Exit 0 = running, 1 = not)
    Status,
    /// Install Multipass if it is missing
    Install,
    /// Start the Multipass daemon and wait until it runs
    EnsureService,
    /// List instances
    List,
    /// Create an instance from the cloud-init template
    Launch {
        /// Open a shell on the new instance
        #[arg(long)]
        shell: bool,
    },
    /// Open a shell on an instance
    Shell { name: String },
    Start { name: String },
    Stop { name: String },
    Restart { name: String },
    Suspend { name: String },
    Delete { name: String },
    Info { name: String },
    /// Permanently remove deleted instances
    Purge,
    /// Remove the login relaunch entry and downloaded installers
    Uninstall,
}
