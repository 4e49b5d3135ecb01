use clap::Parser;
use std::path::PathBuf;
use worldforge_lib::Config;

/// World document store: per-user project directories with git history.
#[derive(Parser, Debug)]
#[command(name = "worldforge", version, about)]
struct Cli {
    /// Root directory for users, projects and logs (env: DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Interface to bind (env: HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (env: PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Convert legacy single-file projects to the directory layout, then exit
    #[arg(long)]
    migrate_legacy: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    if cli.migrate_legacy {
        let migrated = worldforge_lib::migrate_all_legacy(&config)?;
        for meta in &migrated {
            println!("migrated {}", meta.slug);
        }
        println!("{} project(s) migrated", migrated.len());
        return Ok(());
    }

    eprintln!("worldforge listening on http://{}", config.bind_addr());
    worldforge_lib::run(config)?;
    Ok(())
}
