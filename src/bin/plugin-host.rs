use clap::{Parser, Subcommand};
use plugin_host_core::{HostConfig, PluginManager};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "plugin-host", about = "Manage installed host plugins")]
struct Cli {
    /// Data root holding plugins, settings and cache
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,

    /// JSON config file; takes precedence over --data-root
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load and list all plugins
    List,
    /// Install a .spkg package
    Install { package: PathBuf },
    /// Mark a plugin for removal on next start
    Uninstall { plugin_id: String },
    /// Remove the staging area
    Cleanup,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match (&cli.config, &cli.data_root) {
        (Some(path), _) => HostConfig::load(path)?,
        (None, Some(root)) => HostConfig::from_data_root(root),
        (None, None) => HostConfig::default(),
    };
    let mut manager = PluginManager::from_config(&config)?;

    match cli.command {
        Command::List => {
            let report = manager.load_all();
            println!(
                "Installed plugins: {} ({} failed, {} duplicates)",
                manager.registry().len(),
                report.failed(),
                report.duplicates.len()
            );
            for entry in manager.plugins() {
                let manifest = &entry.manifest;
                println!(
                    "{}\t{}\tv{}\t{}\t{}",
                    manifest.plugin_id,
                    manifest.name,
                    manifest.version,
                    manifest.kind(),
                    manifest.capabilities
                );
            }
        }
        Command::Install { package } => {
            manager.load_all();
            let manifest = manager.install_from_package(&package)?;
            println!("Installed {} v{} ({})", manifest.name, manifest.version, manifest.plugin_id);
            manager.cleanup_temp_files();
        }
        Command::Uninstall { plugin_id } => {
            manager.load_all();
            let manifest = match manager.get(&plugin_id) {
                Some(entry) => entry.manifest.clone(),
                None => anyhow::bail!("Plugin not installed: {}", plugin_id),
            };
            manager.uninstall_plugin(&manifest);
            println!("Uninstalled {}; files are removed on next start", manifest.name);
        }
        Command::Cleanup => manager.cleanup_temp_files(),
    }

    Ok(())
}
