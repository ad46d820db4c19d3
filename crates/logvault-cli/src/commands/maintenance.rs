//! One-shot archive and sweep commands.

use anyhow::Result;
use logvault_core::{Config, LogVault};
use tracing::info;

/// Migrate hot entries older than `days_old` days into the archive.
pub async fn archive(config: Config, days_old: u32) -> Result<()> {
    info!(
        days_old = days_old,
        archive_root = %config.archive.root.display(),
        batch_size = config.archive.batch_size,
        "Running archive"
    );

    println!("Running archive...");
    println!("  Archive root: {}", config.archive.root.display());
    println!("  Older than:   {} days", days_old);
    println!();

    let vault = LogVault::open(config).await?;
    let result = vault.archive(days_old).await?;

    println!("Archive completed:");
    println!("  Entries archived: {}", result.archived);
    println!("  Partitions written: {}", result.partitions.len());

    if !result.partitions.is_empty() {
        println!("\nPartitions:");
        for p in &result.partitions {
            println!("  - {}/{}.jsonl ({} entries)", p.date, p.service, p.count);
        }
    }

    Ok(())
}

/// Delete archive date partitions past the retention window.
pub async fn sweep(config: Config) -> Result<()> {
    info!(
        archive_root = %config.archive.root.display(),
        retention_days = config.archive.retention_days,
        "Running retention sweep"
    );

    println!("Running retention sweep...");
    println!("  Archive root: {}", config.archive.root.display());
    println!("  Retention:    {} days", config.archive.retention_days);
    println!();

    let vault = LogVault::open(config).await?;
    let result = vault.sweep().await?;

    println!("Sweep completed:");
    println!("  Partitions deleted: {}", result.deleted);

    if !result.failed.is_empty() {
        println!("\nFailed to delete:");
        for failure in &result.failed {
            println!("  - {}: {}", failure.path.display(), failure.reason);
        }
        anyhow::bail!(
            "{} archive partitions could not be deleted",
            result.failed.len()
        );
    }

    Ok(())
}
