// src/ledger.rs
//! Append-only token history.
//!
//! Entries are only ever built here and inserted by a store inside the same
//! transaction as the balance change they describe. Nothing updates or
//! deletes them.

use crate::models::{ConsumableItem, Direction, ItemKind, LedgerEntry};
use chrono::Utc;
use uuid::Uuid;

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const MAX_HISTORY_LIMIT: i64 = 200;

pub const SIGNUP_REASON: &str = "signup bonus";
pub const SUBSCRIPTION_REASON: &str = "subscription";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryPage {
    pub limit: i64,
    pub offset: i64,
}

impl HistoryPage {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit
                .unwrap_or(DEFAULT_HISTORY_LIMIT)
                .clamp(1, MAX_HISTORY_LIMIT),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

impl Default for HistoryPage {
    fn default() -> Self {
        Self::new(None, None)
    }
}

pub fn entry(
    user_id: Uuid,
    direction: Direction,
    amount: i64,
    reason: impl Into<String>,
    related_item_id: Option<Uuid>,
    transfer_id: Option<Uuid>,
) -> LedgerEntry {
    LedgerEntry {
        id: Uuid::new_v4(),
        user_id,
        direction,
        amount,
        reason: reason.into(),
        related_item_id,
        transfer_id,
        created_at: Utc::now(),
    }
}

pub fn earned(user_id: Uuid, amount: i64, reason: impl Into<String>) -> LedgerEntry {
    entry(user_id, Direction::Earned, amount, reason, None, None)
}

fn spent_reason(item: &ConsumableItem) -> String {
    match item.kind {
        ItemKind::Lecture => format!("Watched lecture: {}", item.title),
        ItemKind::Video => format!("Watched premium video: {}", item.title),
    }
}

fn earned_reason(item: &ConsumableItem) -> String {
    match item.kind {
        ItemKind::Lecture => format!("Tokens from lecture view: {}", item.title),
        ItemKind::Video => format!("Tokens from premium video view: {}", item.title),
    }
}

/// The `spent`/`earned` pair for one viewer -> owner transfer of `item`'s price.
pub fn transfer_pair(transfer_id: Uuid, viewer_id: Uuid, item: &ConsumableItem) -> [LedgerEntry; 2] {
    [
        entry(
            viewer_id,
            Direction::Spent,
            item.price_tokens,
            spent_reason(item),
            Some(item.id),
            Some(transfer_id),
        ),
        entry(
            item.owner_id,
            Direction::Earned,
            item.price_tokens,
            earned_reason(item),
            Some(item.id),
            Some(transfer_id),
        ),
    ]
}

/// True when `entries` holds exactly one spent and one earned row of the same
/// amount, item and transfer.
pub fn is_balanced_pair(entries: &[LedgerEntry]) -> bool {
    let [a, b] = entries else {
        return false;
    };
    let (spent, earned) = match (a.direction, b.direction) {
        (Direction::Spent, Direction::Earned) => (a, b),
        (Direction::Earned, Direction::Spent) => (b, a),
        _ => return false,
    };
    spent.amount == earned.amount
        && spent.amount > 0
        && spent.related_item_id == earned.related_item_id
        && spent.transfer_id.is_some()
        && spent.transfer_id == earned.transfer_id
}
