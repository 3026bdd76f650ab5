use std::path::PathBuf;
use std::sync::Arc;

use carlink::{CarlinkError, DirectoryCarSource, PostgresStore, reconcile};
use clap::Parser;
use dotenv::dotenv;
use tracing::info;

#[derive(Parser)]
#[command(name = "carlink")]
#[command(about = "Reconcile CAR archives against the file_ranges table", long_about = None)]
struct Cli {
    /// Path to the CAR storage directory
    car_dir: PathBuf,
    /// Worker threads (defaults to available parallelism)
    #[arg(long)]
    workers: Option<usize>,
}

fn main() -> Result<(), CarlinkError> {
    dotenv().ok();
    carlink::init_tracing();
    let cli = Cli::parse();

    let conn_str = std::env::var("DATABASE_CONNECTION_STRING").map_err(|_| {
        CarlinkError::Config(
            "DATABASE_CONNECTION_STRING must point at the database".to_string(),
        )
    })?;

    info!("starting");
    let mut store = PostgresStore::connect(&conn_str)?;
    store.ensure_schema()?;

    let source = Arc::new(DirectoryCarSource::new(cli.car_dir));
    let outcome = reconcile(&mut store, source, cli.workers)?;
    info!(
        "done: {} associations across {} cars ({} file ranges considered)",
        outcome.associations, outcome.cars, outcome.file_ranges
    );
    Ok(())
}
