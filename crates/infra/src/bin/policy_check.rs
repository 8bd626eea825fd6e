//! Startup check: persisted policy rows versus the compiled-in catalog.
//!
//! Exits non-zero when a persisted key is unknown to the catalog or a row
//! cannot be decoded. Pass `--apply-schema` to create missing tables first.

use anyhow::{Context, bail};

use workforce_auth::{PolicyCatalog, RoleStore};
use workforce_infra::{InMemoryDirectory, InfraConfig, PostgresDirectory};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    workforce_observability::init();

    let config = InfraConfig::from_env().context("invalid configuration")?;
    let apply_schema = std::env::args().skip(1).any(|arg| arg == "--apply-schema");

    let policies = match &config.database_url {
        Some(url) => {
            let directory = PostgresDirectory::connect(url)
                .await
                .context("failed to connect to postgres")?;
            if apply_schema {
                directory
                    .apply_schema()
                    .await
                    .context("failed to apply schema")?;
            }
            directory
                .list_policies()
                .await
                .context("failed to load persisted policies")?
        }
        None => {
            tracing::warn!("persistent stores disabled; checking a catalog-seeded in-memory directory");
            InMemoryDirectory::with_catalog().list_policies().await?
        }
    };

    let catalog = PolicyCatalog::global();
    let report = catalog.reconcile(&policies);

    tracing::info!(
        profile = ?config.auth.profile,
        assign_role_policy = %config.auth.assign_role_policy(),
        catalog_keys = catalog.len(),
        persisted = policies.len(),
        unpersisted = report.unpersisted.len(),
        inactive = report.inactive.len(),
        "policy catalog reconciled"
    );
    for key in &report.unpersisted {
        tracing::warn!(key = %key, "catalog policy has no persisted row; no role can grant it");
    }
    for key in &report.inactive {
        tracing::warn!(key = %key, "catalog policy is deactivated");
    }

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_healthy() {
        for key in &report.unknown {
            tracing::error!(key = %key, "persisted policy key is not in the catalog");
        }
        bail!(
            "{} persisted policy key(s) unknown to the catalog",
            report.unknown.len()
        );
    }
    Ok(())
}
