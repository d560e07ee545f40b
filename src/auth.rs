// src/auth.rs
use crate::AppState;
use crate::balance;
use crate::error::{ApiError, AuthError};
use crate::models::{Claims, LoginRequest, RegisterRequest, User};
use actix_web::{FromRequest, HttpRequest, HttpResponse, dev::Payload, http::header, post, web};
use bcrypt::{DEFAULT_COST, hash, verify};
use chrono::{Duration, Utc};
use futures_util::future::{Ready, ready};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(login);
    cfg.service(register);
}

pub fn issue_token(secret: &str, user_id: Uuid) -> Result<String, AuthError> {
    let expiration = Utc::now() + Duration::hours(24);
    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration.timestamp() as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?)
}

pub fn decode_token(secret: &str, token: &str) -> Result<Uuid, AuthError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )
    .map_err(|_| AuthError::InvalidToken)?;
    Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::InvalidToken)
}

/// Caller identity taken from a verified `Authorization: Bearer` header.
#[derive(Clone, Copy, Debug)]
pub struct AuthenticatedUser {
    pub id: Uuid,
}

fn authenticate(req: &HttpRequest) -> Result<AuthenticatedUser, AuthError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or(AuthError::InvalidToken)?;
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AuthError::MissingToken)?;
    let id = decode_token(&state.config.jwt_secret, token.trim())?;
    Ok(AuthenticatedUser { id })
}

impl FromRequest for AuthenticatedUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req).map_err(ApiError::from))
    }
}

#[post("/auth/login")]
pub async fn login(
    state: web::Data<AppState>,
    req: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    req.validate()?;
    let user = state
        .store
        .find_user_by_email(&req.email)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    match verify(&req.password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) | Err(_) => return Err(AuthError::InvalidCredentials.into()),
    }

    let token = issue_token(&state.config.jwt_secret, user.id)?;
    Ok(HttpResponse::Ok().json(json!({
        "token": token,
        "user_id": user.id,
    })))
}

#[post("/auth/register")]
pub async fn register(
    state: web::Data<AppState>,
    req: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    req.validate()?;
    if state.store.find_user_by_email(&req.email).await?.is_some() {
        return Err(ApiError::Conflict("Email already registered".into()));
    }

    let hashed_password = hash(&req.password, DEFAULT_COST).map_err(AuthError::from)?;
    let new_user = User {
        id: Uuid::new_v4(),
        name: req.name.clone(),
        email: req.email.clone(),
        password_hash: hashed_password,
        tokens: balance::SIGNUP_GRANT,
        created_at: Utc::now(),
    };

    let created = state
        .store
        .create_user(&new_user, state.config.signup_grant)
        .await?;
    tracing::info!(user = %created.id, tokens = created.tokens, "user registered");

    Ok(HttpResponse::Created().json(json!({
        "message": "User created successfully",
        "user_id": created.id,
        "tokens": created.tokens,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let id = Uuid::new_v4();
        let token = issue_token("secret", id).unwrap();
        assert_eq!(decode_token("secret", &token).unwrap(), id);
    }

    #[test]
    fn token_with_wrong_secret_is_rejected() {
        let token = issue_token("secret", Uuid::new_v4()).unwrap();
        assert!(matches!(
            decode_token("another", &token),
            Err(AuthError::InvalidToken)
        ));
    }
}
