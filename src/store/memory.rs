// src/store/memory.rs
//! In-process store used by tests and local runs without Postgres.
//!
//! One async mutex serializes every transaction. Each mutating method computes
//! all new values first and only writes them back once nothing can fail, so an
//! error at any point leaves the state untouched.

use super::{
    CreditGrant, LedgerStore, PaymentCompletion, PaymentOutcome, TransferOutcome, TransferPlan,
};
use crate::balance;
use crate::error::{BalanceError, StoreError};
use crate::ledger::{self, HistoryPage};
use crate::models::{
    ConsumableItem, ConsumptionRecord, Direction, LedgerEntry, PaymentOrder, PaymentStatus,
    Subscription, SubscriptionStatus, User,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    items: HashMap<Uuid, ConsumableItem>,
    ledger: Vec<LedgerEntry>,
    consumption: HashMap<(Uuid, Uuid), ConsumptionRecord>,
    orders: HashMap<String, PaymentOrder>,
    subscriptions: Vec<Subscription>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    pending_faults: AtomicU32,
}

impl State {
    fn has_paid(&self, user_id: Uuid, item_id: Uuid) -> bool {
        self.ledger.iter().any(|e| {
            e.user_id == user_id
                && e.direction == Direction::Spent
                && e.related_item_id == Some(item_id)
        })
    }

    /// Writes `completion_percentage` into the record, inserting it if absent.
    /// Returns true on insert.
    fn set_progress(
        &mut self,
        user_id: Uuid,
        item: &ConsumableItem,
        completion_percentage: i32,
    ) -> bool {
        let now = Utc::now();
        if let Some(existing) = self.consumption.get_mut(&(user_id, item.id)) {
            existing.completion_percentage = completion_percentage;
            existing.is_completed = completion_percentage == 100;
            existing.updated_at = now;
            return false;
        }
        self.consumption.insert(
            (user_id, item.id),
            ConsumptionRecord {
                id: Uuid::new_v4(),
                user_id,
                item_id: item.id,
                item_kind: item.kind,
                completion_percentage,
                is_completed: completion_percentage == 100,
                created_at: now,
                updated_at: now,
            },
        );
        true
    }

    /// Credits and appends the `earned` row. Fails before writing anything.
    fn apply_credit(&mut self, grant: &CreditGrant) -> Result<i64, StoreError> {
        let current = self
            .users
            .get(&grant.user_id)
            .map(|u| u.tokens)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", grant.user_id)))?;
        let updated = balance::credit(current, grant.amount)?;

        if let Some(user) = self.users.get_mut(&grant.user_id) {
            user.tokens = updated;
        }
        self.ledger
            .push(ledger::earned(grant.user_id, grant.amount, grant.reason.clone()));
        Ok(updated)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` transfers fail with a conflict after the viewer debit
    /// has been computed and before the owner is credited.
    pub fn inject_conflicts(&self, count: u32) {
        self.pending_faults.store(count, Ordering::SeqCst);
    }

    fn take_fault(&self) -> Result<(), StoreError> {
        let injected = self
            .pending_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Conflict("injected failure after debit".into()));
        }
        Ok(())
    }

    pub async fn balance_of(&self, user_id: Uuid) -> Option<i64> {
        self.state.lock().await.users.get(&user_id).map(|u| u.tokens)
    }

    pub async fn total_tokens(&self) -> i64 {
        self.state.lock().await.users.values().map(|u| u.tokens).sum()
    }

    /// Every ledger row in append order.
    pub async fn ledger_snapshot(&self) -> Vec<LedgerEntry> {
        self.state.lock().await.ledger.clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn create_user(&self, user: &User, signup_grant: i64) -> Result<User, StoreError> {
        let mut state = self.state.lock().await;
        if state.users.contains_key(&user.id) || state.users.values().any(|u| u.email == user.email)
        {
            return Err(StoreError::Duplicate(format!("user {}", user.email)));
        }

        let mut created = user.clone();
        created.tokens = signup_grant.max(0);
        if signup_grant > 0 {
            state
                .ledger
                .push(ledger::earned(created.id, signup_grant, ledger::SIGNUP_REASON));
        }
        state.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn create_item(&self, item: &ConsumableItem) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&item.owner_id) {
            return Err(StoreError::NotFound(format!("owner {}", item.owner_id)));
        }
        if state.items.contains_key(&item.id) {
            return Err(StoreError::Duplicate(format!("item {}", item.id)));
        }
        state.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn find_item(&self, id: Uuid) -> Result<Option<ConsumableItem>, StoreError> {
        Ok(self.state.lock().await.items.get(&id).cloned())
    }

    async fn transfer(&self, plan: &TransferPlan) -> Result<TransferOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let owner_id = plan.owner_id();

        let Some(viewer_tokens) = state.users.get(&plan.viewer_id).map(|u| u.tokens) else {
            return Ok(TransferOutcome::ViewerMissing);
        };
        let Some(owner_tokens) = state.users.get(&owner_id).map(|u| u.tokens) else {
            return Ok(TransferOutcome::OwnerMissing);
        };

        if state.has_paid(plan.viewer_id, plan.item.id) {
            return Ok(TransferOutcome::AlreadyPaid {
                viewer_balance: viewer_tokens,
                owner_balance: owner_tokens,
            });
        }

        let viewer_balance = match balance::debit(viewer_tokens, plan.amount()) {
            Ok(remaining) => remaining,
            Err(BalanceError::InsufficientFunds { balance, .. }) => {
                return Ok(TransferOutcome::InsufficientFunds { balance });
            }
            Err(err) => return Err(err.into()),
        };
        self.take_fault()?;
        let owner_balance = balance::credit(owner_tokens, plan.amount())?;

        // commit
        if let Some(viewer) = state.users.get_mut(&plan.viewer_id) {
            viewer.tokens = viewer_balance;
        }
        if let Some(owner) = state.users.get_mut(&owner_id) {
            owner.tokens = owner_balance;
        }
        let committed_at = Utc::now();
        state.ledger.extend(plan.entries.iter().cloned().map(|mut entry| {
            entry.created_at = committed_at;
            entry
        }));
        state.set_progress(plan.viewer_id, &plan.item, 100);
        if let Some(item) = state.items.get_mut(&plan.item.id) {
            item.view_count += 1;
        }

        Ok(TransferOutcome::Charged {
            viewer_balance,
            owner_balance,
        })
    }

    async fn record_progress(
        &self,
        user_id: Uuid,
        item: &ConsumableItem,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let inserted = state.set_progress(user_id, item, 100);
        if inserted {
            if let Some(stored) = state.items.get_mut(&item.id) {
                stored.view_count += 1;
            }
        }
        Ok(inserted)
    }

    async fn update_progress(
        &self,
        user_id: Uuid,
        item: &ConsumableItem,
        completion_percentage: i32,
    ) -> Result<ConsumptionRecord, StoreError> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&user_id) {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        state.set_progress(user_id, item, completion_percentage);
        state
            .consumption
            .get(&(user_id, item.id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("progress for {}", item.id)))
    }

    async fn credit(&self, grant: &CreditGrant) -> Result<i64, StoreError> {
        self.state.lock().await.apply_credit(grant)
    }

    async fn history_for(
        &self,
        user_id: Uuid,
        page: HistoryPage,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.lock().await;
        // Reverse append order first so equal timestamps stay newest first.
        let mut entries: Vec<LedgerEntry> = state
            .ledger
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(entries
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn progress_for(&self, user_id: Uuid) -> Result<Vec<ConsumptionRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut records: Vec<ConsumptionRecord> = state
            .consumption
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    async fn create_payment_order(&self, order: &PaymentOrder) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.orders.contains_key(&order.order_id) {
            return Err(StoreError::Duplicate(format!("order {}", order.order_id)));
        }
        state.orders.insert(order.order_id.clone(), order.clone());
        Ok(())
    }

    async fn find_payment_order(
        &self,
        order_id: &str,
    ) -> Result<Option<PaymentOrder>, StoreError> {
        Ok(self.state.lock().await.orders.get(order_id).cloned())
    }

    async fn fail_payment_order(&self, user_id: Uuid, order_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(order) = state.orders.get_mut(order_id) {
            if order.user_id == user_id && order.status == PaymentStatus::Pending {
                order.status = PaymentStatus::Failed;
            }
        }
        Ok(())
    }

    async fn complete_payment(
        &self,
        completion: &PaymentCompletion,
    ) -> Result<PaymentOutcome, StoreError> {
        let mut state = self.state.lock().await;

        let user_id = completion.grant.user_id;
        match state.orders.get(&completion.order_id) {
            Some(order) if order.user_id == user_id => {
                if order.status != PaymentStatus::Pending {
                    return Ok(PaymentOutcome::AlreadyProcessed);
                }
            }
            _ => return Ok(PaymentOutcome::OrderMissing),
        }

        let updated = state.apply_credit(&completion.grant)?;
        if let Some(order) = state.orders.get_mut(&completion.order_id) {
            order.status = PaymentStatus::Success;
            order.payment_id = Some(completion.payment_id.clone());
        }
        state.subscriptions.push(completion.subscription.clone());

        Ok(PaymentOutcome::Granted { balance: updated })
    }

    async fn active_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Subscription>, StoreError> {
        let state = self.state.lock().await;
        let now = Utc::now();
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| {
                s.user_id == user_id && s.status == SubscriptionStatus::Active && s.ends_at > now
            })
            .max_by_key(|s| s.started_at)
            .cloned())
    }
}
