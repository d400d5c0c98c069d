use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::app_config::ServerConfig;
use crate::module_mount::plan;
use crate::module_registry::ModuleRegistry;
use crate::module_resolve::{MountOverrides, ProcessEnv};
use crate::modules::builtin_registry;
use crate::server;

/// Top-level CLI interface for modgate
#[derive(Parser)]
#[command(name = "modgate", version, about = "Modular HTTP gateway")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mount enabled modules and serve HTTP (default)
    Serve {
        /// Listen address; overrides HTTP_ADDR
        #[arg(long)]
        addr: Option<String>,
    },

    /// Show which modules would mount, in order, and under which prefix
    Plan,

    /// List registered modules with their defaults
    Modules,
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let registry = builtin_registry().context("registering built-in modules")?;

    match cli.command.unwrap_or(Commands::Serve { addr: None }) {
        Commands::Serve { addr } => {
            let mut config = ServerConfig::load().context("loading server config")?;
            if let Some(addr) = addr {
                config.addr = addr;
            }
            server::serve(config, registry).await
        }
        Commands::Plan => {
            print!("{}", render_plan(&registry, &MountOverrides::capture(&ProcessEnv, &registry)));
            Ok(())
        }
        Commands::Modules => {
            for name in registry.names() {
                if let Some(module) = registry.get(&name) {
                    let state = if module.default_enabled() { "enabled" } else { "disabled" };
                    println!("{name:<12} {:<20} {state}", module.default_prefix());
                }
            }
            Ok(())
        }
    }
}

fn render_plan(registry: &ModuleRegistry, overrides: &MountOverrides) -> String {
    let plan = plan(registry, overrides);
    let mut out = String::new();
    for (i, entry) in plan.entries.iter().enumerate() {
        out.push_str(&format!("{}. {} -> {}\n", i + 1, entry.name, entry.prefix));
    }
    for name in &plan.disabled {
        out.push_str(&format!("-  {name} (disabled)\n"));
    }
    out
}
