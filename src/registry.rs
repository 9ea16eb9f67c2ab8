//! Address registry: allocation, listing and deactivation of generated
//! addresses.
//!
//! All state lives in the `Database`; the registry itself holds nothing
//! mutable, so any number of invocations can share one instance.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tracing::{info, warn};

use crate::error::RegistryError;
use crate::model::{Address, AddressState};
use crate::store::{Database, InsertOutcome, TransitionOutcome};

/// Collisions tolerated before `generate` gives up.
pub const MAX_ALLOCATION_ATTEMPTS: u32 = 5;

/// Length of a generated address id.
pub const ADDRESS_ID_LEN: usize = 8;

const ADDRESS_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Source of candidate address ids.
pub type IdGenerator = Box<dyn Fn() -> String + Send + Sync>;

/// Result of a deactivate request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deactivation {
    pub address: Address,
    /// False when the address was already disabled.
    pub newly_disabled: bool,
}

pub struct AddressRegistry {
    db: Arc<dyn Database>,
    next_id: IdGenerator,
}

impl AddressRegistry {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self::with_id_generator(db, Box::new(random_address_id))
    }

    pub fn with_id_generator(db: Arc<dyn Database>, next_id: IdGenerator) -> Self {
        Self { db, next_id }
    }

    /// Allocate a fresh ACTIVE address for `owner_id`.
    pub async fn generate(&self, owner_id: &str) -> Result<Address, RegistryError> {
        for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
            let address = Address::new((self.next_id)(), owner_id);
            match self.db.insert_address_if_absent(&address).await? {
                InsertOutcome::Inserted => {
                    info!(owner_id, address_id = %address.address_id, "Address generated");
                    return Ok(address);
                }
                InsertOutcome::Duplicate => {
                    warn!(attempt, address_id = %address.address_id, "Address id collision");
                }
            }
        }
        Err(RegistryError::AllocationExhausted {
            attempts: MAX_ALLOCATION_ATTEMPTS,
        })
    }

    /// Every address of `owner_id`, oldest first.
    pub async fn list(&self, owner_id: &str) -> Result<Vec<Address>, RegistryError> {
        Ok(self.db.list_addresses(owner_id).await?)
    }

    /// Disable an address owned by `owner_id`. Repeating it is a no-op.
    pub async fn deactivate(
        &self,
        owner_id: &str,
        address_id: &str,
    ) -> Result<Deactivation, RegistryError> {
        let address = self.owned_address(owner_id, address_id).await?;
        if !address.is_active() {
            return Ok(Deactivation {
                address,
                newly_disabled: false,
            });
        }

        let outcome = self.db.disable_address(address_id, Utc::now()).await?;
        // Re-read so a concurrent winner's disabled_at is what we report.
        let address = self
            .db
            .get_address(address_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(address_id.to_string()))?;

        let newly_disabled = outcome == TransitionOutcome::Applied;
        if newly_disabled {
            info!(owner_id, address_id, "Address disabled");
        }
        Ok(Deactivation {
            address,
            newly_disabled,
        })
    }

    /// Current lifecycle state of an address.
    pub async fn resolve_state(&self, address_id: &str) -> Result<AddressState, RegistryError> {
        self.db
            .get_address(address_id)
            .await?
            .map(|a| a.state)
            .ok_or_else(|| RegistryError::NotFound(address_id.to_string()))
    }

    /// Address lookup that enforces ownership.
    pub async fn owned_address(
        &self,
        owner_id: &str,
        address_id: &str,
    ) -> Result<Address, RegistryError> {
        let address = self
            .db
            .get_address(address_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(address_id.to_string()))?;

        if address.owner_id != owner_id {
            return Err(RegistryError::Forbidden {
                owner_id: owner_id.to_string(),
                address_id: address_id.to_string(),
            });
        }
        Ok(address)
    }
}

/// Random id of `ADDRESS_ID_LEN` chars from `[a-z0-9]`.
pub fn random_address_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ADDRESS_ID_LEN)
        .map(|_| ADDRESS_ALPHABET[rng.gen_range(0..ADDRESS_ALPHABET.len())] as char)
        .collect()
}

/// Accept `abcd1234` or `abcd1234@domain`; returns the lowercased local part.
pub fn normalize_address_input(input: &str) -> Option<String> {
    let local = input.trim().split('@').next()?.trim().to_lowercase();
    if local.is_empty() { None } else { Some(local) }
}
