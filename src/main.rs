use std::fs;
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use loya_ledger::{repositories::PgStore, services, settings};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    #[arg(short, long)]
    listen: Option<String>,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    dotenv::dotenv().ok();

    init_logging(&args.log4rs)?;
    let settings = settings::Settings::new(&args.config)
        .map_err(|e| anyhow::anyhow!("Could not load config file: {}", e))?;
    log::info!("Starting Loya ledger.");

    let conn = PgPoolOptions::new()
        .max_connections(settings.postgres.max_connections)
        .connect(&settings.postgres.url)
        .await
        .map_err(|e| anyhow::anyhow!("Could not connect to database: {}", e))?;

    if settings.postgres.run_migrations {
        sqlx::migrate!("./migrations").run(&conn).await?;
        log::info!("Database migrations applied.");
    }

    let listen = args
        .listen
        .unwrap_or_else(|| settings.server.listen.clone());
    services::start_services(PgStore::new(conn), &settings, &listen).await
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            println!("[*] Logging initialized successfully.");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] Failed to initialize logging: {}", e);
            Err(anyhow::anyhow!("Could not initialize logging: {}", e))
        }
    }
}
