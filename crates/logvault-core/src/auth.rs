//! API-key authentication and service provisioning.

use rand::RngCore;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AuthError;
use crate::hot::ServiceCatalog;
use crate::model::{now_millis, Service};
use crate::validation::validate_service_name;
use crate::Result;

/// Prefix of generated service keys.
pub const API_KEY_PREFIX: &str = "sk_";

/// Random bytes behind each key (64 hex chars).
const API_KEY_BYTES: usize = 32;

/// Generate a fresh service API key: `sk_` followed by 64 hex characters.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; API_KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);

    let mut key = String::with_capacity(API_KEY_PREFIX.len() + API_KEY_BYTES * 2);
    key.push_str(API_KEY_PREFIX);
    for b in bytes {
        // Writing to a String cannot fail
        let _ = write!(key, "{:02x}", b);
    }
    key
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Resolves API keys to services and guards admin operations.
pub struct ApiKeyAuthenticator {
    catalog: Arc<dyn ServiceCatalog>,
    admin_key: Option<String>,
}

impl ApiKeyAuthenticator {
    /// Create an authenticator. A blank admin key counts as unset.
    pub fn new(catalog: Arc<dyn ServiceCatalog>, admin_key: Option<String>) -> Self {
        Self {
            catalog,
            admin_key: admin_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// Whether admin operations are possible at all.
    pub fn admin_configured(&self) -> bool {
        self.admin_key.is_some()
    }

    /// Resolve a service API key.
    pub async fn authenticate(&self, key: Option<&str>) -> Result<Service> {
        let key = match key.map(str::trim) {
            Some(k) if !k.is_empty() => k,
            _ => return Err(AuthError::MissingKey.into()),
        };

        match self.catalog.find_by_api_key(key).await? {
            Some(service) => Ok(service),
            None => {
                warn!("Rejected request with unknown API key");
                Err(AuthError::InvalidKey.into())
            }
        }
    }

    /// Require the configured admin key. Fails closed when none is set.
    pub fn authorize_admin(&self, key: Option<&str>) -> Result<()> {
        let expected = self
            .admin_key
            .as_deref()
            .ok_or(AuthError::AdminNotConfigured)?;

        let key = match key.map(str::trim) {
            Some(k) if !k.is_empty() => k,
            _ => return Err(AuthError::MissingKey.into()),
        };

        if constant_time_eq(key.as_bytes(), expected.as_bytes()) {
            Ok(())
        } else {
            warn!("Rejected admin request with non-admin key");
            Err(AuthError::NotAdmin.into())
        }
    }
}

/// Register a new service with a generated id and key.
pub async fn create_service(catalog: &dyn ServiceCatalog, name: &str) -> Result<Service> {
    let name = name.trim();
    validate_service_name(name)?;

    let service = Service {
        id: Uuid::new_v4(),
        name: name.to_string(),
        api_key: generate_api_key(),
        created_at: now_millis(),
    };
    catalog.create_service(&service).await?;

    info!(service = %service.name, id = %service.id, "Service created");
    Ok(service)
}
