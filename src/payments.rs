// src/payments.rs
//! Subscription purchase: order creation with the external processor,
//! signature verification and the plan token grant.

use crate::auth::AuthenticatedUser;
use crate::error::{ApiError, PaymentError};
use crate::ledger;
use crate::models::{
    InitiatePaymentRequest, PaymentOrder, PaymentStatus, Subscription, SubscriptionStatus,
    VerifyPaymentRequest,
};
use crate::store::{CreditGrant, LedgerStore, PaymentCompletion, PaymentOutcome};
use crate::AppState;
use actix_web::{HttpResponse, get, post, web};
use async_trait::async_trait;
use chrono::{Months, Utc};
use ring::hmac;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

pub const CURRENCY: &str = "INR";

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPlan {
    pub id: i32,
    pub name: &'static str,
    /// Whole rupees.
    pub price: i64,
    pub tokens: i64,
    pub features: &'static [&'static str],
    pub is_popular: bool,
}

pub static PLANS: [SubscriptionPlan; 3] = [
    SubscriptionPlan {
        id: 1,
        name: "Basic",
        price: 300,
        tokens: 500,
        features: &["Learning Tokens", "Chat Tokens", "Anytime Support"],
        is_popular: false,
    },
    SubscriptionPlan {
        id: 2,
        name: "Pro",
        price: 500,
        tokens: 1000,
        features: &[
            "Learning Tokens",
            "Chat Tokens",
            "Anytime Support",
            "Premium Lectures",
            "Free Notes",
        ],
        is_popular: false,
    },
    SubscriptionPlan {
        id: 3,
        name: "Premium",
        price: 800,
        tokens: 2000,
        features: &[
            "Learning Tokens",
            "Chat Tokens",
            "Anytime Support",
            "Premium Lectures",
            "Premium Notes",
            "Free Notes",
            "Priority Support",
        ],
        is_popular: true,
    },
];

pub fn find_plan(plan_id: i32) -> Option<&'static SubscriptionPlan> {
    PLANS.iter().find(|plan| plan.id == plan_id)
}

/// Lowercase hex HMAC-SHA256 of `"{order_id}|{payment_id}"`.
pub fn sign(secret: &str, order_id: &str, payment_id: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let tag = hmac::sign(&key, format!("{order_id}|{payment_id}").as_bytes());
    hex::encode(tag.as_ref())
}

/// Constant-time check of a processor signature.
pub fn verify_signature(secret: &str, order_id: &str, payment_id: &str, signature: &str) -> bool {
    let Ok(tag) = hex::decode(signature) else {
        return false;
    };
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    hmac::verify(&key, format!("{order_id}|{payment_id}").as_bytes(), &tag).is_ok()
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GatewayOrder {
    pub id: String,
    /// Minor units (paise).
    pub amount: i64,
    pub currency: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, PaymentError>;
}

/// Orders API client authenticated with the key id and secret.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    api_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpPaymentGateway {
    pub fn new(api_url: String, key_id: String, key_secret: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            key_id,
            key_secret,
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, PaymentError> {
        tracing::info!(amount_minor, currency, receipt, "Creating payment order");
        let response = self
            .client
            .post(format!("{}/orders", self.api_url.trim_end_matches('/')))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&json!({
                "amount": amount_minor,
                "currency": currency,
                "receipt": receipt,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<GatewayOrder>().await?)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PaymentGrant {
    pub plan_id: i32,
    pub tokens_granted: i64,
    pub balance: i64,
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    key_secret: String,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        key_secret: String,
    ) -> Self {
        Self {
            store,
            gateway,
            key_secret,
        }
    }

    pub async fn initiate(&self, user_id: Uuid, plan_id: i32) -> Result<GatewayOrder, PaymentError> {
        let plan = find_plan(plan_id).ok_or(PaymentError::PlanNotFound(plan_id))?;
        let receipt = format!("order_{}_{}", user_id.simple(), Utc::now().timestamp_millis());
        let order = self
            .gateway
            .create_order(plan.price * 100, CURRENCY, &receipt)
            .await?;

        self.store
            .create_payment_order(&PaymentOrder {
                id: Uuid::new_v4(),
                user_id,
                order_id: order.id.clone(),
                payment_id: None,
                amount: plan.price,
                plan_id: plan.id,
                status: PaymentStatus::Pending,
                created_at: Utc::now(),
            })
            .await?;
        Ok(order)
    }

    #[tracing::instrument(skip(self, request), fields(order = %request.order_id))]
    pub async fn verify(
        &self,
        user_id: Uuid,
        request: &VerifyPaymentRequest,
    ) -> Result<PaymentGrant, PaymentError> {
        if !verify_signature(
            &self.key_secret,
            &request.order_id,
            &request.payment_id,
            &request.signature,
        ) {
            tracing::warn!("payment signature mismatch");
            self.store
                .fail_payment_order(user_id, &request.order_id)
                .await?;
            return Err(PaymentError::InvalidSignature);
        }

        let order = self
            .store
            .find_payment_order(&request.order_id)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| PaymentError::OrderNotFound(request.order_id.clone()))?;
        let plan = find_plan(order.plan_id).ok_or(PaymentError::PlanNotFound(order.plan_id))?;

        let started_at = Utc::now();
        let ends_at = started_at
            .checked_add_months(Months::new(1))
            .unwrap_or(started_at + chrono::Duration::days(30));
        let completion = PaymentCompletion {
            order_id: order.order_id.clone(),
            payment_id: request.payment_id.clone(),
            grant: CreditGrant {
                user_id,
                amount: plan.tokens,
                reason: ledger::SUBSCRIPTION_REASON.to_string(),
            },
            subscription: Subscription {
                id: Uuid::new_v4(),
                user_id,
                plan_id: plan.id,
                status: SubscriptionStatus::Active,
                started_at,
                ends_at,
            },
        };

        match self.store.complete_payment(&completion).await? {
            PaymentOutcome::Granted { balance } => {
                tracing::info!(plan = plan.id, tokens = plan.tokens, balance, "subscription granted");
                Ok(PaymentGrant {
                    plan_id: plan.id,
                    tokens_granted: plan.tokens,
                    balance,
                })
            }
            PaymentOutcome::OrderMissing => Err(PaymentError::OrderNotFound(order.order_id)),
            PaymentOutcome::AlreadyProcessed => {
                Err(PaymentError::OrderAlreadyProcessed(order.order_id))
            }
        }
    }
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(list_plans);
    cfg.service(initiate_payment);
    cfg.service(verify_payment);
    cfg.service(current_subscription);
}

#[get("/subscription/plans")]
pub async fn list_plans() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "plans": PLANS }))
}

#[post("/subscription/orders")]
pub async fn initiate_payment(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: web::Json<InitiatePaymentRequest>,
) -> Result<HttpResponse, ApiError> {
    req.validate()?;
    let order = state.payments.initiate(user.id, req.plan_id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "order_id": order.id,
        "amount": order.amount,
        "currency": order.currency,
    })))
}

#[post("/subscription/verify")]
pub async fn verify_payment(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: web::Json<VerifyPaymentRequest>,
) -> Result<HttpResponse, ApiError> {
    req.validate()?;
    let grant = state.payments.verify(user.id, &req).await?;
    state.history_cache.invalidate(user.id).await;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Payment verified successfully",
        "subscription": grant,
    })))
}

#[get("/subscription")]
pub async fn current_subscription(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, ApiError> {
    let subscription = state.store.active_subscription(user.id).await?;
    let body = match subscription {
        Some(subscription) => json!({
            "subscription": {
                "id": subscription.id,
                "plan_id": subscription.plan_id,
                "status": subscription.status,
                "started_at": subscription.started_at,
                "ends_at": subscription.ends_at,
                "plan": find_plan(subscription.plan_id),
            }
        }),
        None => json!({ "subscription": null }),
    };
    Ok(HttpResponse::Ok().json(body))
}
