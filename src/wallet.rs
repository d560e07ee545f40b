// src/wallet.rs
use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::cache::HistoryCache;
use crate::error::ApiError;
use crate::ledger::HistoryPage;
use crate::models::{
    ConsumableItem, CreateItemRequest, HistoryQuery, ItemKind, LedgerEntry, UpdateProgressRequest,
    Visibility,
};
use crate::settlement::SettleRequest;
use crate::store::LedgerStore;
use actix_web::{HttpResponse, get, http::header, post, put, web};
use chrono::Utc;
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use uuid::Uuid;
use validator::Validate;

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health);
    cfg.service(watch_lecture);
    cfg.service(watch_video);
    cfg.service(create_item);
    cfg.service(get_wallet);
    cfg.service(get_history);
    cfg.service(get_progress);
    cfg.service(update_progress);
    cfg.service(events);
}

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

async fn watch(
    state: &AppState,
    user: AuthenticatedUser,
    item_id: Uuid,
    item_kind: ItemKind,
) -> Result<HttpResponse, ApiError> {
    let request = SettleRequest {
        viewer_id: user.id,
        item_id,
        item_kind,
    };
    let settlement = state.engine.settle(&request).await?;

    if settlement.tokens_deducted > 0 {
        state.history_cache.invalidate(user.id).await;
        state.history_cache.invalidate(settlement.owner_id).await;
    }

    Ok(HttpResponse::Ok().json(settlement))
}

#[post("/lectures/{id}/watch")]
pub async fn watch_lecture(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    watch(&state, user, path.into_inner(), ItemKind::Lecture).await
}

#[post("/videos/{id}/watch")]
pub async fn watch_video(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    watch(&state, user, path.into_inner(), ItemKind::Video).await
}

#[post("/items")]
pub async fn create_item(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: web::Json<CreateItemRequest>,
) -> Result<HttpResponse, ApiError> {
    req.validate()?;
    let title = req.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("Title must not be blank".into()));
    }

    let visibility = match req.kind {
        ItemKind::Lecture => Visibility::Public,
        ItemKind::Video => req.visibility.unwrap_or(Visibility::Public),
    };
    let item = ConsumableItem {
        id: Uuid::new_v4(),
        kind: req.kind,
        owner_id: user.id,
        title: title.to_string(),
        price_tokens: req.price_tokens,
        visibility,
        view_count: 0,
        created_at: Utc::now(),
    };
    state.store.create_item(&item).await?;

    Ok(HttpResponse::Created().json(item))
}

/// First history page, served from the cache when possible.
async fn recent_history(
    cache: &HistoryCache,
    store: &dyn LedgerStore,
    user_id: Uuid,
) -> Result<Vec<LedgerEntry>, ApiError> {
    if let Some(cached) = cache.get(user_id).await {
        tracing::debug!(%user_id, "history cache hit");
        return Ok(cached);
    }
    let generation = cache.generation(user_id).await;
    let history = store.history_for(user_id, HistoryPage::default()).await?;
    cache.insert(user_id, generation, history.clone()).await;
    Ok(history)
}

#[get("/wallet")]
pub async fn get_wallet(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, ApiError> {
    let account = state
        .store
        .find_user(user.id)
        .await?
        .ok_or(ApiError::NotFound("User"))?;
    let history = recent_history(&state.history_cache, state.store.as_ref(), user.id).await?;

    Ok(HttpResponse::Ok().json(json!({
        "balance": account.tokens,
        "history": history,
    })))
}

#[get("/tokens/history")]
pub async fn get_history(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, ApiError> {
    query.validate()?;
    let page = HistoryPage::new(query.limit, query.offset);
    let history = if page == HistoryPage::default() {
        recent_history(&state.history_cache, state.store.as_ref(), user.id).await?
    } else {
        state.store.history_for(user.id, page).await?
    };

    Ok(HttpResponse::Ok().json(json!({ "history": history })))
}

#[get("/progress")]
pub async fn get_progress(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, ApiError> {
    let progress = state.store.progress_for(user.id).await?;
    Ok(HttpResponse::Ok().json(json!({ "progress": progress })))
}

#[put("/progress")]
pub async fn update_progress(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: web::Json<UpdateProgressRequest>,
) -> Result<HttpResponse, ApiError> {
    req.validate()?;
    let record = state
        .engine
        .update_progress(user.id, req.item_id, req.completion_percentage)
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Progress updated",
        "progress": record,
    })))
}

#[get("/events")]
pub async fn events(state: web::Data<AppState>, user: AuthenticatedUser) -> HttpResponse {
    tracing::info!(user = %user.id, "event stream opened");
    let stream = state.notifier.subscribe(user.id).map(|notification| {
        let data = serde_json::to_string(&notification.payload).unwrap_or_else(|_| "{}".into());
        Ok::<_, Infallible>(web::Bytes::from(format!(
            "event: {}\ndata: {}\n\n",
            notification.event, data
        )))
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}
