use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::error::DomainError;

/// Narrow interface onto the credits ledger. The core only needs an atomic
/// debit; balance management is the package shop's concern.
#[async_trait]
pub trait CreditsLedger: Send + Sync {
    async fn balance(&self, customer_id: i64) -> Result<i64, DomainError>;

    /// Debit `amount` credits. Returns false without mutating when the
    /// balance is insufficient.
    async fn debit(&self, customer_id: i64, amount: i64) -> Result<bool, DomainError>;
}

pub struct DbCreditsLedger {
    db: SqlitePool,
}

impl DbCreditsLedger {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CreditsLedger for DbCreditsLedger {
    async fn balance(&self, customer_id: i64) -> Result<i64, DomainError> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM lesson_credits WHERE customer_id = ?")
                .bind(customer_id)
                .fetch_optional(&self.db)
                .await?;
        Ok(balance.unwrap_or(0))
    }

    async fn debit(&self, customer_id: i64, amount: i64) -> Result<bool, DomainError> {
        // Guarded decrement: the balance check and the write are one statement
        let updated = sqlx::query(
            "UPDATE lesson_credits SET balance = balance - ?
             WHERE customer_id = ? AND balance >= ?",
        )
        .bind(amount)
        .bind(customer_id)
        .bind(amount)
        .execute(&self.db)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn test_debit_insufficient_balance() {
        let pool = db::test_support::test_pool().await;
        let ledger = DbCreditsLedger::new(pool.clone());

        sqlx::query("INSERT INTO lesson_credits (customer_id, balance) VALUES (1, 2)")
            .execute(&pool)
            .await
            .unwrap();

        assert!(ledger.debit(1, 2).await.unwrap());
        assert_eq!(ledger.balance(1).await.unwrap(), 0);
        assert!(!ledger.debit(1, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_customer_has_zero_balance() {
        let pool = db::test_support::test_pool().await;
        let ledger = DbCreditsLedger::new(pool);
        assert_eq!(ledger.balance(99).await.unwrap(), 0);
        assert!(!ledger.debit(99, 1).await.unwrap());
    }
}
