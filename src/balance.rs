// src/balance.rs
//! Balance arithmetic shared by every store backend.
//!
//! Stores call these while holding the row locks for the users involved, so
//! the checks and the writes that follow happen in one transaction.

use crate::error::BalanceError;
use uuid::Uuid;

/// Tokens granted to every account on registration.
pub const SIGNUP_GRANT: i64 = 100;

pub fn debit(balance: i64, amount: i64) -> Result<i64, BalanceError> {
    if amount <= 0 {
        return Err(BalanceError::InvalidAmount(amount));
    }
    if balance < amount {
        return Err(BalanceError::InsufficientFunds {
            balance,
            required: amount,
        });
    }
    Ok(balance - amount)
}

pub fn credit(balance: i64, amount: i64) -> Result<i64, BalanceError> {
    if amount <= 0 {
        return Err(BalanceError::InvalidAmount(amount));
    }
    balance.checked_add(amount).ok_or(BalanceError::Overflow)
}

/// Row lock acquisition order: ascending id, duplicates removed.
pub fn lock_order(ids: &[Uuid]) -> Vec<Uuid> {
    let mut ordered = ids.to_vec();
    ordered.sort();
    ordered.dedup();
    ordered
}
