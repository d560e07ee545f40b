// src/store/mod.rs
//! Persistence for balances, ledger, catalog, progress and payments.
//!
//! Every method that changes a balance also appends the matching ledger rows
//! and commits both together or not at all.

use crate::error::StoreError;
use crate::ledger::{self, HistoryPage};
use crate::models::{
    ConsumableItem, ConsumptionRecord, LedgerEntry, PaymentOrder, Subscription, User,
};
use async_trait::async_trait;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A priced viewer -> owner transfer, ready to be applied in one transaction.
#[derive(Clone, Debug)]
pub struct TransferPlan {
    pub transfer_id: Uuid,
    pub viewer_id: Uuid,
    pub item: ConsumableItem,
    pub entries: [LedgerEntry; 2],
}

impl TransferPlan {
    pub fn new(viewer_id: Uuid, item: &ConsumableItem) -> Self {
        let transfer_id = Uuid::new_v4();
        Self {
            transfer_id,
            viewer_id,
            item: item.clone(),
            entries: ledger::transfer_pair(transfer_id, viewer_id, item),
        }
    }

    pub fn owner_id(&self) -> Uuid {
        self.item.owner_id
    }

    pub fn amount(&self) -> i64 {
        self.item.price_tokens
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    Charged {
        viewer_balance: i64,
        owner_balance: i64,
    },
    /// The viewer already has a `spent` row for the item.
    AlreadyPaid {
        viewer_balance: i64,
        owner_balance: i64,
    },
    InsufficientFunds {
        balance: i64,
    },
    ViewerMissing,
    OwnerMissing,
}

#[derive(Clone, Debug)]
pub struct CreditGrant {
    pub user_id: Uuid,
    pub amount: i64,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct PaymentCompletion {
    pub order_id: String,
    pub payment_id: String,
    pub grant: CreditGrant,
    pub subscription: Subscription,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    Granted { balance: i64 },
    OrderMissing,
    AlreadyProcessed,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts the user with `signup_grant` tokens and its `earned` ledger row.
    async fn create_user(&self, user: &User, signup_grant: i64) -> Result<User, StoreError>;

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn create_item(&self, item: &ConsumableItem) -> Result<(), StoreError>;

    async fn find_item(&self, id: Uuid) -> Result<Option<ConsumableItem>, StoreError>;

    /// Locks viewer and owner in ascending id order, then debits, credits,
    /// appends both ledger rows, records completion and bumps the view count.
    /// A viewer who already paid for the item is not charged again; progress
    /// records alone never count as payment.
    async fn transfer(&self, plan: &TransferPlan) -> Result<TransferOutcome, StoreError>;

    /// Upserts a completed consumption record without moving tokens. Returns
    /// true when the record was newly created.
    async fn record_progress(
        &self,
        user_id: Uuid,
        item: &ConsumableItem,
    ) -> Result<bool, StoreError>;

    /// Sets the completion percentage, creating the record if needed.
    async fn update_progress(
        &self,
        user_id: Uuid,
        item: &ConsumableItem,
        completion_percentage: i32,
    ) -> Result<ConsumptionRecord, StoreError>;

    /// Credits the user and appends the `earned` row. Returns the new balance.
    async fn credit(&self, grant: &CreditGrant) -> Result<i64, StoreError>;

    /// Newest first.
    async fn history_for(
        &self,
        user_id: Uuid,
        page: HistoryPage,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn progress_for(&self, user_id: Uuid) -> Result<Vec<ConsumptionRecord>, StoreError>;

    async fn create_payment_order(&self, order: &PaymentOrder) -> Result<(), StoreError>;

    async fn find_payment_order(&self, order_id: &str)
    -> Result<Option<PaymentOrder>, StoreError>;

    /// Marks a pending order failed. Settled orders are left untouched.
    async fn fail_payment_order(&self, user_id: Uuid, order_id: &str) -> Result<(), StoreError>;

    /// Settles a pending order: status, subscription and the grant's credit.
    async fn complete_payment(
        &self,
        completion: &PaymentCompletion,
    ) -> Result<PaymentOutcome, StoreError>;

    async fn active_subscription(&self, user_id: Uuid)
    -> Result<Option<Subscription>, StoreError>;
}
