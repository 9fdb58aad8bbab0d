//! Wallet store.
//!
//! Every user has exactly one wallet, created on first touch with the
//! configured opening balance. Balances only change through the
//! conditional primitives below, and a debit never takes a balance under
//! zero.

use std::sync::Arc;
use tracing::{debug, info};

use crate::config::WalletPolicy;
use crate::domain::errors::WalletError;
use crate::domain::models::wallet::Wallet;
use crate::storage::{Connection, DebitOutcome, WalletStorage};

#[derive(Clone)]
pub struct WalletService<C: Connection> {
    wallet_repository: C::WalletRepository,
    policy: WalletPolicy,
}

impl<C: Connection> WalletService<C> {
    pub fn new(connection: Arc<C>, policy: WalletPolicy) -> Self {
        let wallet_repository = connection.create_wallet_repository();
        Self {
            wallet_repository,
            policy,
        }
    }

    pub fn policy(&self) -> &WalletPolicy {
        &self.policy
    }

    pub fn opening_balance_for(&self, owner_id: &str) -> i64 {
        self.policy.opening_balance_for(owner_id)
    }

    /// Return the owner's wallet, opening it if this is the first time we see them
    pub async fn get_or_create(&self, owner_id: &str) -> Result<Wallet, WalletError> {
        let wallet = self
            .wallet_repository
            .get_or_create_wallet(owner_id, self.opening_balance_for(owner_id))
            .await?;
        Ok(wallet)
    }

    pub async fn balance(&self, owner_id: &str) -> Result<i64, WalletError> {
        Ok(self.get_or_create(owner_id).await?.balance)
    }

    pub async fn get(&self, owner_id: &str) -> Result<Wallet, WalletError> {
        self.wallet_repository
            .get_wallet(owner_id)
            .await?
            .ok_or_else(|| WalletError::WalletNotFound(owner_id.to_string()))
    }

    /// Debit `amount` if the balance covers it. Returns the new balance.
    pub async fn try_debit(&self, owner_id: &str, amount: i64) -> Result<i64, WalletError> {
        if amount <= 0 {
            return Err(WalletError::InvalidAmount(amount));
        }
        match self.wallet_repository.try_debit(owner_id, amount).await? {
            DebitOutcome::Debited { new_balance } => {
                debug!("Debited {} from {}, balance now {}", amount, owner_id, new_balance);
                Ok(new_balance)
            }
            DebitOutcome::InsufficientFunds { available } => {
                info!(
                    "Debit of {} from {} refused: only {} available",
                    amount, owner_id, available
                );
                Err(WalletError::InsufficientFunds {
                    required: amount,
                    available,
                })
            }
            DebitOutcome::WalletMissing => Err(WalletError::WalletNotFound(owner_id.to_string())),
        }
    }

    /// Credit `amount`. Returns the new balance.
    pub async fn credit(&self, owner_id: &str, amount: i64) -> Result<i64, WalletError> {
        if amount <= 0 {
            return Err(WalletError::InvalidAmount(amount));
        }
        let new_balance = self
            .wallet_repository
            .credit(owner_id, amount)
            .await?
            .ok_or_else(|| WalletError::WalletNotFound(owner_id.to_string()))?;
        debug!("Credited {} to {}, balance now {}", amount, owner_id, new_balance);
        Ok(new_balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryConnection;

    fn create_test_service() -> (WalletService<MemoryConnection>, Arc<MemoryConnection>) {
        let connection = Arc::new(MemoryConnection::new());
        let service = WalletService::new(connection.clone(), WalletPolicy::default());
        (service, connection)
    }

    #[tokio::test]
    async fn test_first_touch_opens_wallet_with_policy_balance() {
        let (service, _) = create_test_service();
        assert_eq!(service.balance("buyer").await.unwrap(), 10_000);
        assert_eq!(service.balance("platform").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_debit_and_credit() {
        let (service, _) = create_test_service();
        service.get_or_create("buyer").await.unwrap();

        assert_eq!(service.try_debit("buyer", 2_500).await.unwrap(), 7_500);
        assert_eq!(service.credit("buyer", 500).await.unwrap(), 8_000);
        assert_eq!(service.get("buyer").await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_overdraw_is_refused_without_change() {
        let (service, connection) = create_test_service();
        connection.set_balance("buyer", 500);

        let err = service.try_debit("buyer", 1_000).await.unwrap_err();
        assert!(matches!(
            err,
            WalletError::InsufficientFunds {
                required: 1_000,
                available: 500
            }
        ));
        assert_eq!(service.balance("buyer").await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_non_positive_amounts_are_rejected() {
        let (service, _) = create_test_service();
        service.get_or_create("buyer").await.unwrap();
        assert!(matches!(
            service.try_debit("buyer", 0).await,
            Err(WalletError::InvalidAmount(0))
        ));
        assert!(matches!(
            service.credit("buyer", -5).await,
            Err(WalletError::InvalidAmount(-5))
        ));
    }

    #[tokio::test]
    async fn test_unknown_wallet() {
        let (service, _) = create_test_service();
        assert!(matches!(
            service.credit("ghost", 10).await,
            Err(WalletError::WalletNotFound(_))
        ));
        assert!(matches!(
            service.get("ghost").await,
            Err(WalletError::WalletNotFound(_))
        ));
    }
}
