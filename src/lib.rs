//! Vaultwright - async lifecycle management for Azure Key Vault resources.
//!
//! Vaultwright creates, reads, updates and deletes vaults, access policies,
//! keys, secrets, certificates, certificate issuers, managed storage accounts,
//! managed HSMs and HSM role assignments. It takes care of the parts of the
//! Key Vault API that make this hard to do by hand:
//!
//! - **Soft delete**: deletes optionally purge, creates optionally recover a
//!   soft-deleted item of the same name
//! - **Eventual consistency**: every mutation waits until the change is
//!   visible before returning
//! - **Base URL resolution**: data-plane items are addressed by the vault's
//!   URI, which is resolved from its resource ID and cached
//! - **Serialised mutations**: writes to the same vault or the same access
//!   policy set never race
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vaultwright::resources::{secret::SecretConfig, Resource, SecretResource};
//! use vaultwright::{Config, Provider};
//!
//! #[tokio::main]
//! async fn main() -> vaultwright::Result<()> {
//!     let config = Config::from_env()?;
//!     let provider = Arc::new(Provider::new(config)?);
//!
//!     let secrets = SecretResource::new(provider);
//!     let vault_id = "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.KeyVault/vaults/kv1";
//!     let state = secrets
//!         .create(&SecretConfig::new(vault_id, "api-key", "sk-secret123"))
//!         .await?;
//!     println!("created {}", state.id);
//!     Ok(())
//! }
//! ```
//!
//! # Transports
//!
//! | Transport | Feature Flag | Notes |
//! |-----------|-------------|-------|
//! | Mock | `mock` (default) | Scripted in-memory responses for tests |
//! | HTTP | `http` (default) | reqwest, client-credential or static-token auth |

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod ids;
pub mod locks;
pub mod poll;
pub mod provider;
pub mod purge;
pub mod recovery;
pub mod resources;
pub mod transport;
pub mod validation;

pub use config::{Config, KeyVaultFeatures, OperationTimeouts, TransportType};
pub use error::{Result, VaultwrightError};
pub use provider::Provider;

use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes the library.
///
/// This registers all compiled transports with the factory. It's called
/// automatically by [`Provider::new`], but can be called explicitly if
/// needed (it's idempotent).
pub fn init() {
    INIT.call_once(transport::register_all);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_initialization() {
        init();
        init();
    }
}
