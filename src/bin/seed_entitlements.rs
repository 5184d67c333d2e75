//! Create the default entitlement rows for the listed tenants
//!
//! Env: DATABASE_REST_URL, DATABASE_SERVICE_KEY, SEED_TENANT_IDS (comma-separated)

use tracing::{error, info};

use proposal_desk::config::SeedConfig;
use proposal_desk::services::EntitlementService;
use proposal_desk::store::{Db, PostgrestClient};
use proposal_desk::util::logging::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = SeedConfig::from_env()?;
    init_tracing(&config.log_level, false);

    let store = PostgrestClient::with_credentials(&config.database_rest_url, &config.database_service_key);
    let entitlements = EntitlementService::new(Db::new(store));

    let mut failed = 0;
    for tenant_id in &config.tenant_ids {
        match entitlements.seed_defaults(*tenant_id).await {
            Ok(created) => info!(tenant_id = %tenant_id, created, "Tenant seeded"),
            Err(e) => {
                error!(tenant_id = %tenant_id, error = %e, "Seeding failed");
                failed += 1;
            }
        }
    }

    info!(tenants = config.tenant_ids.len(), failed, "Seeding finished");
    if failed > 0 {
        anyhow::bail!("{} tenant(s) could not be seeded", failed);
    }
    Ok(())
}
