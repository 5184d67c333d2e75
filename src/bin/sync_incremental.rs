//! Incremental last-write-wins sync from the local database to the cloud one
//!
//! Env: DATABASE_URL, CLOUD_DATABASE_URL, optional SYNC_SINCE (RFC 3339)

use tracing::{error, info};

use proposal_desk::config::SyncConfig;
use proposal_desk::sync::{PgSyncStore, Synchronizer};
use proposal_desk::util::logging::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = SyncConfig::from_env()?;
    init_tracing(&config.log_level, false);

    let source = PgSyncStore::connect(&config.database_url, "local").await?;
    let target = PgSyncStore::connect(&config.cloud_database_url, "cloud").await?;

    let sync = Synchronizer::new(source, target, config.since);
    let report = sync.run().await;

    for table in &report.tables {
        info!(
            table = %table.table,
            inserted = table.inserted,
            updated = table.updated,
            skipped = table.skipped,
            failed = table.failed,
            "Summary"
        );
    }
    info!(
        written = report.total_written(),
        elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "Sync finished"
    );

    if report.has_failures() {
        error!("Sync completed with failures");
        std::process::exit(1);
    }
    Ok(())
}
