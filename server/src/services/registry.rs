//! Oracle registration
//!
//! Identities are registered one at a time: the ledger assigns indexes as a
//! side effect of a confirmed registration, so each transaction has to land
//! before its indexes can be read back. Once the registration phase is over
//! the table is frozen into a [`RegistrySnapshot`] and handed to the relay.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::{LedgerError, RegistrationError};
use crate::ledger::LedgerClient;
use crate::models::{AccountHandle, Identity, IdentityStatus, Index, IndexSet};

/// Reads of a fresh registration's indexes before the identity is given up.
const INDEX_READ_BACK_ATTEMPTS: u32 = 3;
const INDEX_READ_BACK_DELAY: Duration = Duration::from_millis(500);

/// What to do with accounts that may already be registered from an earlier
/// run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationMode {
    /// Adopt indexes the ledger already holds; register only the rest.
    #[default]
    Reconcile,
    /// Register every account, paying the fee each time.
    Fresh,
}

impl FromStr for RegistrationMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reconcile" => Ok(RegistrationMode::Reconcile),
            "fresh" => Ok(RegistrationMode::Fresh),
            other => Err(format!("expected `reconcile` or `fresh`, got `{other}`")),
        }
    }
}

impl fmt::Display for RegistrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationMode::Reconcile => f.write_str("reconcile"),
            RegistrationMode::Fresh => f.write_str("fresh"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Number of identities to aim for.
    pub target: usize,
    /// Position of the first ledger account used as an oracle.
    pub account_offset: usize,
    /// Fee override; read from the ledger when `None`.
    pub fee: Option<u128>,
    pub mode: RegistrationMode,
}

/// Append-only identity table, filled during the registration phase.
#[derive(Debug, Default)]
pub struct OracleRegistry {
    identities: Vec<Identity>,
}

impl OracleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an identity unless its account is already present.
    pub fn push(&mut self, identity: Identity) -> bool {
        if self.contains(&identity.account) {
            return false;
        }
        self.identities.push(identity);
        true
    }

    pub fn contains(&self, account: &AccountHandle) -> bool {
        self.identities
            .iter()
            .any(|identity| &identity.account == account)
    }

    pub fn all_identities(&self) -> &[Identity] {
        &self.identities
    }

    /// Registers up to `options.target` ledger accounts.
    ///
    /// Per-account failures are returned and leave the account out of the
    /// table. An `Err` means registration could not continue at all;
    /// identities registered before that point are kept.
    pub async fn register_all(
        &mut self,
        ledger: &dyn LedgerClient,
        options: &RegistryOptions,
    ) -> Result<Vec<RegistrationError>, RegistrationError> {
        let accounts = ledger
            .get_accounts()
            .await
            .map_err(RegistrationError::Accounts)?;

        let candidates: Vec<AccountHandle> = accounts
            .into_iter()
            .skip(options.account_offset)
            .take(options.target)
            .collect();
        if candidates.len() < options.target {
            warn!(
                available = candidates.len(),
                target = options.target,
                offset = options.account_offset,
                "fewer ledger accounts than oracles requested"
            );
        }

        info!(
            candidates = candidates.len(),
            mode = %options.mode,
            "registering oracles"
        );

        let mut fee = options.fee;
        let mut failures = Vec::new();

        for account in candidates {
            if self.contains(&account) {
                debug!(oracle = %account, "oracle already in registry");
                continue;
            }

            match self.register_one(ledger, &account, options.mode, &mut fee).await {
                Ok(identity) => {
                    info!(
                        oracle = %identity.account,
                        indexes = %identity.indexes,
                        status = ?identity.status,
                        "oracle ready"
                    );
                    self.identities.push(identity);
                }
                Err(err @ RegistrationError::Fee(_)) => {
                    error!(error = %err, "cannot register oracles without the registration fee");
                    return Err(err);
                }
                Err(err) => {
                    error!(oracle = %account, error = %err, "oracle registration failed");
                    failures.push(err);
                }
            }
        }

        info!(
            registered = self.identities.len(),
            target = options.target,
            failed = failures.len(),
            "oracle registration phase complete"
        );
        Ok(failures)
    }

    async fn register_one(
        &self,
        ledger: &dyn LedgerClient,
        account: &AccountHandle,
        mode: RegistrationMode,
        fee: &mut Option<u128>,
    ) -> Result<Identity, RegistrationError> {
        if mode == RegistrationMode::Reconcile {
            match ledger.get_assigned_indexes(account).await {
                Ok(indexes) => {
                    return Ok(Identity::new(
                        account.clone(),
                        indexes,
                        IdentityStatus::Reconciled,
                    ))
                }
                Err(LedgerError::NotRegistered(_)) => {
                    debug!(oracle = %account, "no prior registration; registering");
                }
                // registering again would replace indexes the ledger may hold
                Err(err) => {
                    return Err(RegistrationError::Network {
                        account: account.clone(),
                        source: err,
                    })
                }
            }
        }

        let amount = match *fee {
            Some(amount) => amount,
            None => {
                let amount = ledger
                    .registration_fee()
                    .await
                    .map_err(RegistrationError::Fee)?;
                info!(fee_wei = amount, "read registration fee from the app contract");
                *fee = Some(amount);
                amount
            }
        };

        let confirmation = ledger
            .register_oracle(account, amount)
            .await
            .map_err(|err| RegistrationError::from_ledger(account, err))?;
        debug!(oracle = %account, tx_hash = %confirmation.tx_hash, "registration confirmed");

        let indexes = read_back_indexes(ledger, account)
            .await
            .map_err(|source| RegistrationError::IndexReadBack {
                account: account.clone(),
                source,
            })?;

        Ok(Identity::new(account.clone(), indexes, IdentityStatus::Registered))
    }

    /// Ends the registration phase.
    pub fn freeze(self) -> RegistrySnapshot {
        RegistrySnapshot {
            identities: self.identities.into(),
        }
    }
}

async fn read_back_indexes(
    ledger: &dyn LedgerClient,
    account: &AccountHandle,
) -> Result<IndexSet, LedgerError> {
    let mut attempt = 1;
    loop {
        match ledger.get_assigned_indexes(account).await {
            Ok(indexes) => return Ok(indexes),
            Err(err) if attempt < INDEX_READ_BACK_ATTEMPTS => {
                warn!(oracle = %account, attempt, error = %err, "index read-back failed; retrying");
                sleep(INDEX_READ_BACK_DELAY * attempt).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Read-only view of the registered identities, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    identities: Arc<[Identity]>,
}

impl RegistrySnapshot {
    pub fn all_identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Identities selected for `index`, in registration order.
    pub fn matching(&self, index: Index) -> impl Iterator<Item = &Identity> + '_ {
        self.identities
            .iter()
            .filter(move |identity| identity.matches(index))
    }
}

impl From<Vec<Identity>> for RegistrySnapshot {
    fn from(identities: Vec<Identity>) -> Self {
        let mut registry = OracleRegistry::new();
        for identity in identities {
            registry.push(identity);
        }
        registry.freeze()
    }
}
