use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::ledger::RpcLedgerConfig;
use crate::models::AccountHandle;
use crate::services::{RegistrationMode, RegistryOptions, RelayOptions};

/// Which ledger the relay talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMode {
    Rpc,
    Simulated,
}

impl FromStr for LedgerMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rpc" => Ok(LedgerMode::Rpc),
            "simulated" => Ok(LedgerMode::Simulated),
            other => Err(format!("expected `rpc` or `simulated`, got `{other}`")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub ledger_mode: LedgerMode,
    pub rpc_url: String,
    pub app_address: Option<AccountHandle>,
    pub oracle_count: usize,
    pub account_offset: usize,
    pub registration_fee: Option<u128>,
    pub registration_mode: RegistrationMode,
    pub request_timeout: Duration,
    pub max_concurrent_submissions: usize,
    pub tracked_requests: usize,
    pub poll_interval: Duration,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub simulated_request_interval: Duration,
    pub port: u16,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let app_address = lookup("FLIGHT_SURETY_APP_ADDRESS")
            .filter(|value| !value.trim().is_empty())
            .map(AccountHandle::new);
        if let Some(address) = &app_address {
            if !address.is_address() {
                return Err(ConfigError::Invalid {
                    var: "FLIGHT_SURETY_APP_ADDRESS",
                    value: address.to_string(),
                    reason: "expected a 0x-prefixed 20-byte hex address".to_string(),
                });
            }
        }

        let config = Self {
            ledger_mode: parse(&lookup, "LEDGER_MODE", LedgerMode::Rpc)?,
            rpc_url: lookup("LEDGER_RPC_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8545".to_string()),
            app_address,
            oracle_count: parse(&lookup, "ORACLE_COUNT", 20)?,
            account_offset: parse(&lookup, "ORACLE_ACCOUNT_OFFSET", 0)?,
            registration_fee: parse_optional(&lookup, "ORACLE_REGISTRATION_FEE_WEI")?,
            registration_mode: parse(&lookup, "ORACLE_REGISTRATION_MODE", RegistrationMode::Reconcile)?,
            request_timeout: Duration::from_secs(parse(&lookup, "RELAY_REQUEST_TIMEOUT_SECONDS", 30)?),
            max_concurrent_submissions: parse(&lookup, "RELAY_MAX_CONCURRENT_SUBMISSIONS", 16)?,
            tracked_requests: parse(&lookup, "RELAY_TRACKED_REQUESTS", 1024)?,
            poll_interval: Duration::from_millis(parse(&lookup, "LEDGER_POLL_INTERVAL_MS", 1_000)?),
            gas_limit: parse(&lookup, "LEDGER_GAS_LIMIT", 4_712_388)?,
            gas_price: parse(&lookup, "LEDGER_GAS_PRICE_WEI", 100_000_000_000)?,
            simulated_request_interval: Duration::from_secs(parse(
                &lookup,
                "SIMULATED_REQUEST_INTERVAL_SECONDS",
                15,
            )?),
            port: parse(&lookup, "PORT", 3000)?,
        };

        if config.ledger_mode == LedgerMode::Rpc && config.app_address.is_none() {
            return Err(ConfigError::Missing("FLIGHT_SURETY_APP_ADDRESS"));
        }
        if config.max_concurrent_submissions == 0 {
            return Err(ConfigError::Invalid {
                var: "RELAY_MAX_CONCURRENT_SUBMISSIONS",
                value: "0".to_string(),
                reason: "at least one submission must be allowed".to_string(),
            });
        }

        Ok(config)
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            target: self.oracle_count,
            account_offset: self.account_offset,
            fee: self.registration_fee,
            mode: self.registration_mode,
        }
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            request_timeout: self.request_timeout,
            max_concurrent_submissions: self.max_concurrent_submissions,
            tracked_requests: self.tracked_requests,
        }
    }

    pub fn rpc_ledger_config(&self) -> Result<RpcLedgerConfig, ConfigError> {
        let app_address = self
            .app_address
            .clone()
            .ok_or(ConfigError::Missing("FLIGHT_SURETY_APP_ADDRESS"))?;

        Ok(RpcLedgerConfig {
            rpc_url: self.rpc_url.clone(),
            app_address,
            gas_limit: self.gas_limit,
            gas_price: self.gas_price,
            poll_interval: self.poll_interval,
            receipt_timeout: self.request_timeout,
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    Ok(parse_optional(lookup, var)?.unwrap_or(default))
}

fn parse_optional<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|err: T::Err| ConfigError::Invalid {
                var,
                value,
                reason: err.to_string(),
            }),
        _ => Ok(None),
    }
}
