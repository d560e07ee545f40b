// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(Serialize, Deserialize, Clone, Debug, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub tokens: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "item_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Lecture,
    Video,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Lecture => "lecture",
            ItemKind::Video => "video",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "item_visibility", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
    Premium,
}

/// A lecture or video that can be watched, possibly for a token price.
#[derive(Serialize, Deserialize, Clone, Debug, FromRow)]
pub struct ConsumableItem {
    pub id: Uuid,
    pub kind: ItemKind,
    pub owner_id: Uuid,
    pub title: String,
    pub price_tokens: i64,
    pub visibility: Visibility,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
}

impl ConsumableItem {
    /// Lectures charge whenever they carry a price; videos only when premium.
    pub fn requires_payment(&self) -> bool {
        if self.price_tokens <= 0 {
            return false;
        }
        match self.kind {
            ItemKind::Lecture => true,
            ItemKind::Video => self.visibility == Visibility::Premium,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "ledger_direction", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Earned,
    Spent,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub direction: Direction,
    pub amount: i64,
    pub reason: String,
    pub related_item_id: Option<Uuid>,
    pub transfer_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, FromRow)]
pub struct ConsumptionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub item_kind: ItemKind,
    pub completion_percentage: i32,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Debug, FromRow)]
pub struct PaymentOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: String,
    pub payment_id: Option<String>,
    /// Whole currency units, as priced by the plan.
    pub amount: i64,
    pub plan_id: i32,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
}

#[derive(Serialize, Deserialize, Clone, Debug, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: i32,
    pub status: SubscriptionStatus,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Claims {
    pub sub: String, // user_id
    pub exp: usize,
}

#[derive(Serialize, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Serialize, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

#[derive(Serialize, Deserialize, Validate)]
pub struct CreateItemRequest {
    pub kind: ItemKind,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(range(min = 0, max = 1_000_000))]
    pub price_tokens: i64,
    /// Ignored for lectures, which are always public.
    pub visibility: Option<Visibility>,
}

#[derive(Serialize, Deserialize, Validate, Default)]
pub struct HistoryQuery {
    #[validate(range(min = 1, max = 200))]
    pub limit: Option<i64>,
    #[validate(range(min = 0))]
    pub offset: Option<i64>,
}

#[derive(Serialize, Deserialize, Validate)]
pub struct UpdateProgressRequest {
    pub item_id: Uuid,
    #[validate(range(min = 0, max = 100))]
    pub completion_percentage: i32,
}

#[derive(Serialize, Deserialize, Validate)]
pub struct InitiatePaymentRequest {
    #[validate(range(min = 1))]
    pub plan_id: i32,
}

#[derive(Serialize, Deserialize, Validate)]
pub struct VerifyPaymentRequest {
    #[validate(length(min = 1, max = 128))]
    pub order_id: String,
    #[validate(length(min = 1, max = 128))]
    pub payment_id: String,
    #[validate(length(equal = 64))]
    pub signature: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(kind: ItemKind, visibility: Visibility, price_tokens: i64) -> ConsumableItem {
        ConsumableItem {
            id: Uuid::new_v4(),
            kind,
            owner_id: Uuid::new_v4(),
            title: "Rust ownership".into(),
            price_tokens,
            visibility,
            view_count: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn priced_lecture_requires_payment() {
        assert!(item(ItemKind::Lecture, Visibility::Public, 20).requires_payment());
        assert!(!item(ItemKind::Lecture, Visibility::Public, 0).requires_payment());
    }

    #[test]
    fn only_premium_videos_require_payment() {
        assert!(item(ItemKind::Video, Visibility::Premium, 20).requires_payment());
        assert!(!item(ItemKind::Video, Visibility::Public, 20).requires_payment());
        assert!(!item(ItemKind::Video, Visibility::Premium, 0).requires_payment());
    }

    #[test]
    fn verify_request_rejects_short_signature() {
        let req = VerifyPaymentRequest {
            order_id: "order_1".into(),
            payment_id: "pay_1".into(),
            signature: "abc".into(),
        };
        assert!(req.validate().is_err());
    }
}
