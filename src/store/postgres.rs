// src/store/postgres.rs
use super::{
    CreditGrant, LedgerStore, PaymentCompletion, PaymentOutcome, TransferOutcome, TransferPlan,
};
use crate::balance;
use crate::config::Config;
use crate::error::{BalanceError, StoreError};
use crate::ledger::{self, HistoryPage};
use crate::models::{
    ConsumableItem, ConsumptionRecord, Direction, LedgerEntry, PaymentOrder, PaymentStatus,
    Subscription, User,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, name, email, password_hash, tokens, created_at";
const ITEM_COLUMNS: &str =
    "id, kind, owner_id, title, price_tokens, visibility, view_count, created_at";
const PROGRESS_COLUMNS: &str =
    "id, user_id, item_id, item_kind, completion_percentage, is_completed, created_at, updated_at";
const LEDGER_COLUMNS: &str =
    "id, user_id, direction, amount, reason, related_item_id, transfer_id, created_at";
const ORDER_COLUMNS: &str = "id, user_id, order_id, payment_id, amount, plan_id, status, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects, applies `statement_timeout` to every session and runs the
    /// bundled migrations.
    pub async fn connect(config: &Config) -> Result<Self, StoreError> {
        let timeout_ms = config.statement_timeout_ms;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    sqlx::query(&format!("SET statement_timeout = {timeout_ms}"))
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&config.database_url)
            .await?;

        tracing::info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self::new(pool))
    }
}

/// Locks the given user rows in ascending id order and returns their balances.
async fn lock_balances(
    conn: &mut PgConnection,
    user_ids: &[Uuid],
) -> Result<HashMap<Uuid, i64>, StoreError> {
    let ids = balance::lock_order(user_ids);
    let rows: Vec<(Uuid, i64)> =
        sqlx::query_as("SELECT id, tokens FROM users WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(ids)
            .fetch_all(&mut *conn)
            .await?;
    Ok(rows.into_iter().collect())
}

/// Guarded decrement; the `tokens >= $1` predicate is the last line of defence
/// behind the row lock.
async fn debit(conn: &mut PgConnection, user_id: Uuid, amount: i64) -> Result<i64, StoreError> {
    let remaining: Option<i64> = sqlx::query_scalar(
        "UPDATE users SET tokens = tokens - $1 WHERE id = $2 AND tokens >= $1 RETURNING tokens",
    )
    .bind(amount)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    remaining.ok_or_else(|| StoreError::Conflict(format!("guarded debit of {user_id} matched no row")))
}

async fn credit(conn: &mut PgConnection, user_id: Uuid, amount: i64) -> Result<i64, StoreError> {
    let updated: Option<i64> =
        sqlx::query_scalar("UPDATE users SET tokens = tokens + $1 WHERE id = $2 RETURNING tokens")
            .bind(amount)
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;
    updated.ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))
}

/// `created_at` is left to the column default so rows carry the time they
/// were written, after the row locks were taken.
async fn append_entry(conn: &mut PgConnection, entry: &LedgerEntry) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO ledger_entries (id, user_id, direction, amount, reason, related_item_id, transfer_id) VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(entry.id)
    .bind(entry.user_id)
    .bind(entry.direction)
    .bind(entry.amount)
    .bind(&entry.reason)
    .bind(entry.related_item_id)
    .bind(entry.transfer_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn already_paid(
    conn: &mut PgConnection,
    user_id: Uuid,
    item_id: Uuid,
) -> Result<bool, StoreError> {
    let paid: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM ledger_entries WHERE user_id = $1 AND related_item_id = $2 AND direction = $3)",
    )
    .bind(user_id)
    .bind(item_id)
    .bind(Direction::Spent)
    .fetch_one(&mut *conn)
    .await?;
    Ok(paid)
}

/// Inserts a completed record or touches the existing one. Returns true on insert.
async fn upsert_consumption(
    conn: &mut PgConnection,
    user_id: Uuid,
    item: &ConsumableItem,
) -> Result<bool, StoreError> {
    let inserted: bool = sqlx::query_scalar(
        r#"
        INSERT INTO consumption_records (id, user_id, item_id, item_kind, completion_percentage, is_completed, created_at, updated_at)
        VALUES ($1, $2, $3, $4, 100, TRUE, NOW(), NOW())
        ON CONFLICT (user_id, item_id)
        DO UPDATE SET completion_percentage = 100, is_completed = TRUE, updated_at = NOW()
        RETURNING (xmax = 0)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(item.id)
    .bind(item.kind)
    .fetch_one(&mut *conn)
    .await?;
    Ok(inserted)
}

/// Locks the user, credits and appends the `earned` row.
async fn grant_credit(conn: &mut PgConnection, grant: &CreditGrant) -> Result<i64, StoreError> {
    let balances = lock_balances(conn, &[grant.user_id]).await?;
    let current = balances
        .get(&grant.user_id)
        .copied()
        .ok_or_else(|| StoreError::NotFound(format!("user {}", grant.user_id)))?;
    balance::credit(current, grant.amount)?;

    let updated = credit(conn, grant.user_id, grant.amount).await?;
    append_entry(
        conn,
        &ledger::earned(grant.user_id, grant.amount, grant.reason.clone()),
    )
    .await?;
    Ok(updated)
}

async fn increment_views(conn: &mut PgConnection, item_id: Uuid) -> Result<(), StoreError> {
    sqlx::query("UPDATE items SET view_count = view_count + 1 WHERE id = $1")
        .bind(item_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn create_user(&self, user: &User, signup_grant: i64) -> Result<User, StoreError> {
        let mut tx = self.pool.begin().await?;
        let created = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, name, email, password_hash, tokens, created_at) VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_COLUMNS}"
        ))
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(signup_grant.max(0))
        .bind(user.created_at)
        .fetch_one(&mut *tx)
        .await?;

        if signup_grant > 0 {
            append_entry(
                &mut tx,
                &ledger::earned(created.id, signup_grant, ledger::SIGNUP_REASON),
            )
            .await?;
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn create_item(&self, item: &ConsumableItem) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO items ({ITEM_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(item.id)
        .bind(item.kind)
        .bind(item.owner_id)
        .bind(&item.title)
        .bind(item.price_tokens)
        .bind(item.visibility)
        .bind(item.view_count)
        .bind(item.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_item(&self, id: Uuid) -> Result<Option<ConsumableItem>, StoreError> {
        Ok(sqlx::query_as::<_, ConsumableItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn transfer(&self, plan: &TransferPlan) -> Result<TransferOutcome, StoreError> {
        let owner_id = plan.owner_id();
        let amount = plan.amount();
        let mut tx = self.pool.begin().await?;

        // Early returns drop `tx`, which rolls back and releases the locks.
        let balances = lock_balances(&mut tx, &[plan.viewer_id, owner_id]).await?;
        let Some(&viewer_tokens) = balances.get(&plan.viewer_id) else {
            return Ok(TransferOutcome::ViewerMissing);
        };
        let Some(&owner_tokens) = balances.get(&owner_id) else {
            return Ok(TransferOutcome::OwnerMissing);
        };

        if already_paid(&mut tx, plan.viewer_id, plan.item.id).await? {
            return Ok(TransferOutcome::AlreadyPaid {
                viewer_balance: viewer_tokens,
                owner_balance: owner_tokens,
            });
        }

        match balance::debit(viewer_tokens, amount) {
            Ok(_) => {}
            Err(BalanceError::InsufficientFunds { balance, .. }) => {
                return Ok(TransferOutcome::InsufficientFunds { balance });
            }
            Err(err) => return Err(err.into()),
        }
        balance::credit(owner_tokens, amount)?;

        let viewer_balance = debit(&mut tx, plan.viewer_id, amount).await?;
        let owner_balance = credit(&mut tx, owner_id, amount).await?;
        for entry in &plan.entries {
            append_entry(&mut tx, entry).await?;
        }
        upsert_consumption(&mut tx, plan.viewer_id, &plan.item).await?;
        increment_views(&mut tx, plan.item.id).await?;

        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;
        let inserted = upsert_consumption(&mut tx, user_id, item).await?;
        if inserted {
            increment_views(&mut tx, item.id).await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn update_progress(
        &self,
        user_id: Uuid,
        item: &ConsumableItem,
        completion_percentage: i32,
    ) -> Result<ConsumptionRecord, StoreError> {
        Ok(sqlx::query_as::<_, ConsumptionRecord>(&format!(
            r#"
            INSERT INTO consumption_records ({PROGRESS_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $5 = 100, NOW(), NOW())
            ON CONFLICT (user_id, item_id)
            DO UPDATE SET completion_percentage = EXCLUDED.completion_percentage,
                          is_completed = EXCLUDED.is_completed,
                          updated_at = NOW()
            RETURNING {PROGRESS_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(item.id)
        .bind(item.kind)
        .bind(completion_percentage)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn credit(&self, grant: &CreditGrant) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let updated = grant_credit(&mut tx, grant).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn history_for(
        &self,
        user_id: Uuid,
        page: HistoryPage,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(sqlx::query_as::<_, LedgerEntry>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE user_id = $1 ORDER BY created_at DESC, seq DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn progress_for(&self, user_id: Uuid) -> Result<Vec<ConsumptionRecord>, StoreError> {
        Ok(sqlx::query_as::<_, ConsumptionRecord>(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM consumption_records WHERE user_id = $1 ORDER BY updated_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn create_payment_order(&self, order: &PaymentOrder) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO payment_orders ({ORDER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(order.id)
        .bind(order.user_id)
        .bind(&order.order_id)
        .bind(&order.payment_id)
        .bind(order.amount)
        .bind(order.plan_id)
        .bind(order.status)
        .bind(order.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_payment_order(
        &self,
        order_id: &str,
    ) -> Result<Option<PaymentOrder>, StoreError> {
        Ok(sqlx::query_as::<_, PaymentOrder>(&format!(
            "SELECT {ORDER_COLUMNS} FROM payment_orders WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn fail_payment_order(&self, user_id: Uuid, order_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE payment_orders SET status = $1 WHERE order_id = $2 AND user_id = $3 AND status = $4",
        )
        .bind(PaymentStatus::Failed)
        .bind(order_id)
        .bind(user_id)
        .bind(PaymentStatus::Pending)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_payment(
        &self,
        completion: &PaymentCompletion,
    ) -> Result<PaymentOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let order = sqlx::query_as::<_, PaymentOrder>(&format!(
            "SELECT {ORDER_COLUMNS} FROM payment_orders WHERE order_id = $1 FOR UPDATE"
        ))
        .bind(&completion.order_id)
        .fetch_optional(&mut *tx)
        .await?;
        let order = match order {
            Some(order) if order.user_id == completion.grant.user_id => order,
            _ => return Ok(PaymentOutcome::OrderMissing),
        };
        if order.status != PaymentStatus::Pending {
            return Ok(PaymentOutcome::AlreadyProcessed);
        }

        sqlx::query("UPDATE payment_orders SET status = $1, payment_id = $2 WHERE id = $3")
            .bind(PaymentStatus::Success)
            .bind(&completion.payment_id)
            .bind(order.id)
            .execute(&mut *tx)
            .await?;

        let subscription = &completion.subscription;
        sqlx::query(
            "INSERT INTO subscriptions (id, user_id, plan_id, status, started_at, ends_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(subscription.id)
        .bind(subscription.user_id)
        .bind(subscription.plan_id)
        .bind(subscription.status)
        .bind(subscription.started_at)
        .bind(subscription.ends_at)
        .execute(&mut *tx)
        .await?;

        let balance = grant_credit(&mut tx, &completion.grant).await?;

        tx.commit().await?;
        Ok(PaymentOutcome::Granted { balance })
    }

    async fn active_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Subscription>, StoreError> {
        Ok(sqlx::query_as::<_, Subscription>(
            "SELECT id, user_id, plan_id, status, started_at, ends_at FROM subscriptions WHERE user_id = $1 AND status = 'active' AND ends_at > $2 ORDER BY started_at DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?)
    }
}
