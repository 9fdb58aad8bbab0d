use chrono::{DateTime, Utc};

/// A user's custodial balance, in the smallest currency unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    pub owner_id: String,
    pub balance: i64,
    /// Balance the wallet was created with; the reconciliation baseline
    pub opening_balance: i64,
    /// Bumped on every successful credit or debit
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn open(owner_id: &str, opening_balance: i64) -> Self {
        let now = Utc::now();
        Self {
            owner_id: owner_id.to_string(),
            balance: opening_balance,
            opening_balance,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
