// src/settlement.rs
//! Token settlement for watching lectures and premium videos.
//!
//! One engine serves both item kinds. A viewer pays for an item at most once:
//! an existing `spent` ledger row for `(viewer, item)` is checked inside the
//! same transaction that moves the tokens.

use crate::error::{SettlementError, StoreError};
use crate::models::{ConsumableItem, ConsumptionRecord, ItemKind};
use crate::notify::{self, Notifier};
use crate::store::{LedgerStore, TransferOutcome, TransferPlan};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    pub viewer_id: Uuid,
    pub item_id: Uuid,
    pub item_kind: ItemKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub tokens_deducted: i64,
    pub viewer_balance: i64,
    pub owner_balance: i64,
    #[serde(skip)]
    pub owner_id: Uuid,
}

#[derive(Clone)]
pub struct SettlementEngine {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
}

impl SettlementEngine {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    #[tracing::instrument(
        skip(self, request),
        fields(viewer = %request.viewer_id, item = %request.item_id, kind = request.item_kind.as_str())
    )]
    pub async fn settle(&self, request: &SettleRequest) -> Result<Settlement, SettlementError> {
        let item = self
            .store
            .find_item(request.item_id)
            .await?
            .filter(|item| item.kind == request.item_kind)
            .ok_or(SettlementError::ItemNotFound(request.item_id))?;

        if !item.requires_payment() {
            return self.settle_free(request.viewer_id, &item).await;
        }

        if item.owner_id == request.viewer_id {
            tracing::debug!("owner watching own item");
            let balance = self.balance_of(request.viewer_id).await?;
            return Ok(Settlement {
                tokens_deducted: 0,
                viewer_balance: balance,
                owner_balance: balance,
                owner_id: item.owner_id,
            });
        }

        let plan = TransferPlan::new(request.viewer_id, &item);
        let outcome = match self.store.transfer(&plan).await {
            Err(StoreError::Conflict(reason)) => {
                tracing::warn!(%reason, "settlement conflict, retrying once");
                tokio::time::sleep(retry_delay()).await;
                match self.store.transfer(&plan).await {
                    Err(StoreError::Conflict(reason)) => {
                        tracing::error!(%reason, "settlement retry failed");
                        return Err(SettlementError::TransactionFailure(reason));
                    }
                    other => other?,
                }
            }
            other => other?,
        };

        match outcome {
            TransferOutcome::Charged {
                viewer_balance,
                owner_balance,
            } => {
                tracing::info!(
                    transfer = %plan.transfer_id,
                    amount = item.price_tokens,
                    viewer_balance,
                    owner_balance,
                    "settlement committed"
                );
                self.publish_progress(request.viewer_id, &item, 100);
                Ok(Settlement {
                    tokens_deducted: item.price_tokens,
                    viewer_balance,
                    owner_balance,
                    owner_id: item.owner_id,
                })
            }
            TransferOutcome::AlreadyPaid {
                viewer_balance,
                owner_balance,
            } => {
                tracing::debug!("item already paid for");
                Ok(Settlement {
                    tokens_deducted: 0,
                    viewer_balance,
                    owner_balance,
                    owner_id: item.owner_id,
                })
            }
            TransferOutcome::InsufficientFunds { balance } => {
                Err(SettlementError::InsufficientFunds {
                    balance,
                    required: item.price_tokens,
                })
            }
            TransferOutcome::ViewerMissing => {
                Err(SettlementError::ViewerNotFound(request.viewer_id))
            }
            TransferOutcome::OwnerMissing => Err(SettlementError::OwnerNotFound(item.owner_id)),
        }
    }

    async fn settle_free(
        &self,
        viewer_id: Uuid,
        item: &ConsumableItem,
    ) -> Result<Settlement, SettlementError> {
        let viewer_balance = self.balance_of(viewer_id).await?;
        let owner_balance = self
            .store
            .find_user(item.owner_id)
            .await?
            .map(|owner| owner.tokens)
            .ok_or(SettlementError::OwnerNotFound(item.owner_id))?;

        if self.store.record_progress(viewer_id, item).await? {
            self.publish_progress(viewer_id, item, 100);
        }

        Ok(Settlement {
            tokens_deducted: 0,
            viewer_balance,
            owner_balance,
            owner_id: item.owner_id,
        })
    }

    /// Stores a partial or full completion percentage. Never moves tokens and
    /// never counts as payment.
    pub async fn update_progress(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        completion_percentage: i32,
    ) -> Result<ConsumptionRecord, SettlementError> {
        let item = self
            .store
            .find_item(item_id)
            .await?
            .ok_or(SettlementError::ItemNotFound(item_id))?;
        let record = self
            .store
            .update_progress(user_id, &item, completion_percentage)
            .await
            .map_err(|err| match err {
                StoreError::NotFound(_) => SettlementError::ViewerNotFound(user_id),
                other => other.into(),
            })?;

        self.publish_progress(user_id, &item, record.completion_percentage);
        Ok(record)
    }

    async fn balance_of(&self, viewer_id: Uuid) -> Result<i64, SettlementError> {
        self.store
            .find_user(viewer_id)
            .await?
            .map(|viewer| viewer.tokens)
            .ok_or(SettlementError::ViewerNotFound(viewer_id))
    }

    /// Runs after commit. Delivery failures are logged and dropped.
    fn publish_progress(
        &self,
        viewer_id: Uuid,
        item: &ConsumableItem,
        completion_percentage: i32,
    ) {
        let payload = json!({
            "type": item.kind.as_str(),
            "itemId": item.id,
            "completionPercentage": completion_percentage,
            "isCompleted": completion_percentage == 100,
        });
        if let Err(err) = self
            .notifier
            .notify(viewer_id, notify::PROGRESS_UPDATED, payload)
        {
            tracing::warn!(%viewer_id, "progress notification dropped: {}", err);
        }
    }
}

fn retry_delay() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(5..25))
}
