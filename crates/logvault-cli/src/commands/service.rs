//! Service administration commands.

use anyhow::Result;
use logvault_core::{Config, LogVault};

/// Register a service and print its API key.
pub async fn create(config: Config, name: &str) -> Result<()> {
    let vault = LogVault::open(config).await?;
    let service = vault.create_service(name).await?;

    println!("Service created:");
    println!("  ID:      {}", service.id);
    println!("  Name:    {}", service.name);
    println!("  API key: {}", service.api_key);
    println!("\nStore the API key now; it is not shown again.");
    Ok(())
}

/// List registered services, newest first.
pub async fn list(config: Config) -> Result<()> {
    let vault = LogVault::open(config).await?;
    let services = vault.list_services().await?;

    if services.is_empty() {
        println!("No services registered.");
        return Ok(());
    }

    println!("{:<38} {:<32} CREATED", "ID", "NAME");
    for service in services {
        println!(
            "{:<38} {:<32} {}",
            service.id,
            service.name,
            logvault_core::model::format_timestamp(&service.created_at)
        );
    }
    Ok(())
}
