//! Runtime configuration, read from the environment.
//!
//! Every key is optional. `main` loads a `.env` file first, so local
//! overrides can live there instead of in the shell.

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_DATABASE_URL: &str = "sqlite:marketplace.db";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_CORS_ORIGIN: &str = "http://localhost:8080";

/// Reserved identity of the marketplace operator's wallet
pub const DEFAULT_PLATFORM_WALLET_ID: &str = "platform";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub bind_addr: SocketAddr,
    pub cors_origin: String,
    pub wallet: WalletPolicy,
    pub commission: CommissionConfig,
    pub retry: RetryPolicy,
    pub paging: PageConfig,
}

/// Opening balances handed out when a wallet is created lazily
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletPolicy {
    pub platform_wallet_id: String,
    pub user_opening_balance: i64,
    pub platform_opening_balance: i64,
}

impl WalletPolicy {
    pub fn opening_balance_for(&self, owner_id: &str) -> i64 {
        if owner_id == self.platform_wallet_id {
            self.platform_opening_balance
        } else {
            self.user_opening_balance
        }
    }
}

impl Default for WalletPolicy {
    fn default() -> Self {
        Self {
            platform_wallet_id: DEFAULT_PLATFORM_WALLET_ID.to_string(),
            user_opening_balance: 10_000,
            platform_opening_balance: 0,
        }
    }
}

/// Commission rates in basis points, one per settlement context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionConfig {
    pub product_bps: u32,
    pub service_bps: u32,
    pub event_bps: u32,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            product_bps: 1_000,
            service_bps: 500,
            event_bps: 500,
        }
    }
}

/// How hard the settlement engine tries a credit leg before handing it to recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageConfig {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl PageConfig {
    /// Clamp a requested page size into `1..=max_limit`
    pub fn clamp(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit)
    }
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 100,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 8,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            cors_origin: DEFAULT_CORS_ORIGIN.to_string(),
            wallet: WalletPolicy::default(),
            commission: CommissionConfig::default(),
            retry: RetryPolicy::default(),
            paging: PageConfig::default(),
        }
    }
}

impl AppConfig {
    /// Build the configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid BIND_ADDR: {}", bind_addr))?;

        let wallet = WalletPolicy {
            platform_wallet_id: env::var("PLATFORM_WALLET_ID")
                .unwrap_or(defaults.wallet.platform_wallet_id),
            user_opening_balance: parse_var(
                "WALLET_OPENING_BALANCE",
                defaults.wallet.user_opening_balance,
            )?,
            platform_opening_balance: parse_var(
                "PLATFORM_OPENING_BALANCE",
                defaults.wallet.platform_opening_balance,
            )?,
        };
        if wallet.user_opening_balance < 0 || wallet.platform_opening_balance < 0 {
            anyhow::bail!("Opening balances must not be negative");
        }

        let commission = CommissionConfig {
            product_bps: parse_var("COMMISSION_PRODUCT_BPS", defaults.commission.product_bps)?,
            service_bps: parse_var("COMMISSION_SERVICE_BPS", defaults.commission.service_bps)?,
            event_bps: parse_var("COMMISSION_EVENT_BPS", defaults.commission.event_bps)?,
        };
        for bps in [commission.product_bps, commission.service_bps, commission.event_bps] {
            if bps > 10_000 {
                anyhow::bail!("Commission rate {} bps exceeds 100%", bps);
            }
        }

        let retry = RetryPolicy {
            max_attempts: parse_var("CREDIT_RETRY_ATTEMPTS", defaults.retry.max_attempts)?.max(1),
            backoff: Duration::from_millis(parse_var(
                "CREDIT_RETRY_BACKOFF_MS",
                defaults.retry.backoff.as_millis() as u64,
            )?),
        };

        let paging = PageConfig {
            default_limit: parse_var("DEFAULT_PAGE_SIZE", defaults.paging.default_limit)?,
            max_limit: parse_var("MAX_PAGE_SIZE", defaults.paging.max_limit)?,
        };
        if paging.max_limit == 0 {
            anyhow::bail!("MAX_PAGE_SIZE must be at least 1");
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", defaults.max_connections)?,
            bind_addr,
            cors_origin: env::var("CORS_ORIGIN").unwrap_or(defaults.cors_origin),
            wallet,
            commission,
            retry,
            paging,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: {}", name, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_gets_its_own_opening_balance() {
        let policy = WalletPolicy::default();
        assert_eq!(policy.opening_balance_for("platform"), 0);
        assert_eq!(policy.opening_balance_for("buyer-1"), 10_000);
    }

    #[test]
    fn test_page_clamp() {
        let paging = PageConfig::default();
        assert_eq!(paging.clamp(None), 20);
        assert_eq!(paging.clamp(Some(0)), 1);
        assert_eq!(paging.clamp(Some(500)), 100);
        assert_eq!(paging.clamp(Some(7)), 7);
    }

    #[test]
    fn test_parse_var_falls_back_to_default() {
        let value: u32 = parse_var("MARKETPLACE_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }
}
