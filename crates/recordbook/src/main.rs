//! `recordbook` - CLI for the record-keeping web application
//!
//! Runs the HTTP server and the one-shot administrative commands.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::Context;
use clap::Parser;

use recordbook::cli::{Cli, Command, ConfigCommand, ServeCommand};
use recordbook::{init_logging, Config, StoreFactory};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Serve(serve_cmd) => handle_serve(config, serve_cmd),
        Command::InitDb => handle_init_db(&config),
        Command::Status(status_cmd) => handle_status(&config, status_cmd.json),
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
    }
}

fn handle_serve(mut config: Config, cmd: ServeCommand) -> anyhow::Result<()> {
    if let Some(bind) = cmd.bind {
        config.server.bind_address = bind;
        config.validate()?;
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(recordbook::web::serve(&config))?;
    Ok(())
}

fn handle_init_db(config: &Config) -> anyhow::Result<()> {
    StoreFactory::from_config(config).bootstrap()?;
    println!("Database initialized.");
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let factory = StoreFactory::from_config(config);
    if !factory.is_initialized()? {
        anyhow::bail!(
            "database at {} is not initialized; run `recordbook init-db`",
            factory.path().display()
        );
    }
    let stats = factory.open()?.stats()?;

    if json {
        let status = serde_json::json!({
            "database_path": factory.path(),
            "total_records": stats.total_records,
            "oldest_record": stats.oldest_record,
            "newest_record": stats.newest_record,
            "db_size_bytes": stats.db_size_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
            t.map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
        };
        println!("recordbook status");
        println!("-----------------");
        println!("Database:      {}", factory.path().display());
        println!("Records:       {}", stats.total_records);
        println!("Oldest:        {}", fmt_time(stats.oldest_record));
        println!("Newest:        {}", fmt_time(stats.newest_record));
        println!("Size (bytes):  {}", stats.db_size_bytes);
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                let mut shown = config.clone();
                shown.server.secret_key = "<redacted>".to_string();
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Server]");
                println!("  Bind address:       {}", config.server.bind_address);
                println!(
                    "  Secret key:         {}",
                    if config.uses_dev_secret() {
                        "default (change before deploying)"
                    } else {
                        "custom"
                    }
                );
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Busy timeout (ms):  {}", config.storage.busy_timeout_ms);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
