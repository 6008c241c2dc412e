use actix_web::cookie::{Cookie, SameSite};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::error::ApiError;
use crate::helper::auth_helpers;
use crate::middleware::AuthenticatedUser;
use crate::models::db_operations::users_db_operations::{self, NewUser};
use crate::models::db_operations::DbError;
use crate::{AppState, DbPool};

/// Registers the auth routes without a scope prefix so the caller can wrap
/// the `/auth` scope with its own stricter rate limit.
pub fn config_auth(cfg: &mut web::ServiceConfig) {
    cfg.route("/register", web::post().to(register))
        .route("/login", web::post().to(login))
        .route("/logout", web::post().to(logout))
        .route("/verify-email", web::get().to(verify_email))
        .route("/resend-verification", web::post().to(resend_verification))
        .route("/refresh-token", web::post().to(refresh_token))
        .route("/federated", web::post().to(federated))
        .route("/csrf-token", web::get().to(csrf_token));
}

#[derive(Deserialize)]
struct RegisterPayload {
    login: String,
    email: String,
    username: String,
    password: String,
    #[serde(default)]
    description: String,
}

async fn register(
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    state: web::Data<AppState>,
    payload: web::Json<RegisterPayload>,
) -> Result<HttpResponse, ApiError> {
    let payload = payload.into_inner();

    let login = payload.login.trim().to_string();
    if login.chars().count() < 3 {
        return Err(ApiError::Validation(
            "Login must be at least 3 characters".to_string(),
        ));
    }
    let username = payload.username.trim().to_string();
    let username_chars = username.chars().count();
    if username_chars < 2 || username_chars > 30 {
        return Err(ApiError::Validation(
            "Username must be between 2 and 30 characters".to_string(),
        ));
    }
    auth_helpers::validate_email(&payload.email).map_err(ApiError::Validation)?;
    auth_helpers::validate_new_password(&payload.password).map_err(ApiError::Validation)?;

    let new_user = NewUser {
        login,
        email: payload.email.trim().to_string(),
        username,
        password: payload.password,
        description: payload.description,
    };
    let pool = pool.clone();
    let user = web::block(move || -> Result<_, ApiError> {
        let mut conn = pool.get()?;
        Ok(users_db_operations::create_user(&mut conn, &new_user)?)
    })
    .await??;

    match auth_helpers::issue_verification_token(&config.jwt_secret, &user.id) {
        Ok(token) => state
            .mailer
            .send_verification_email(&config, &user.email, &token),
        Err(e) => log::error!("Failed to issue verification token for {}: {}", user.id, e),
    }

    Ok(HttpResponse::Created().json(json!({
        "message": "Account created. Check your email to verify your address.",
        "user": user.private_view(),
    })))
}

#[derive(Deserialize)]
struct LoginPayload {
    login: String,
    password: String,
}

async fn login(
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    payload: web::Json<LoginPayload>,
) -> Result<HttpResponse, ApiError> {
    let LoginPayload { login, password } = payload.into_inner();

    let pool = pool.clone();
    let user = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        users_db_operations::verify_login(&conn, &login, &password).map_err(|e| match e {
            // Do not reveal whether the login exists.
            DbError::NotFound(_) => ApiError::Authentication("Invalid credentials".to_string()),
            other => ApiError::from(other),
        })
    })
    .await??;

    let token = auth_helpers::issue_auth_token(&config.jwt_secret, &user.id)
        .map_err(|e| ApiError::internal("Failed to issue auth token", e))?;

    Ok(HttpResponse::Ok()
        .cookie(auth_helpers::auth_cookie(&token, config.use_secure_cookies))
        .json(json!({ "token": token, "user": user.private_view() })))
}

async fn logout(config: web::Data<Config>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok()
        .cookie(auth_helpers::clear_auth_cookie(config.use_secure_cookies))
        .json(json!({ "message": "Logged out" })))
}

#[derive(Deserialize)]
struct VerifyEmailQuery {
    token: String,
}

async fn verify_email(
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    query: web::Query<VerifyEmailQuery>,
) -> Result<HttpResponse, ApiError> {
    let user_id = auth_helpers::verify_token(
        &config.jwt_secret,
        &query.token,
        auth_helpers::TokenKind::VerifyEmail,
    )
    .map_err(ApiError::Validation)?;

    let pool = pool.clone();
    web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(users_db_operations::mark_email_verified(&conn, &user_id)?)
    })
    .await??;

    Ok(HttpResponse::Ok().json(json!({ "message": "Email address verified" })))
}

#[derive(Deserialize)]
struct ResendPayload {
    email: String,
}

async fn resend_verification(
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    state: web::Data<AppState>,
    payload: web::Json<ResendPayload>,
) -> Result<HttpResponse, ApiError> {
    let email = payload.email.trim().to_string();

    let pool = pool.clone();
    let user = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        let user = users_db_operations::user_by_email(&conn, &email)?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
        if user.is_email_verified {
            return Err(ApiError::Validation(
                "Email address is already verified".to_string(),
            ));
        }
        users_db_operations::extend_verification_deadline(&conn, &user.id)?;
        Ok(user)
    })
    .await??;

    let token = auth_helpers::issue_verification_token(&config.jwt_secret, &user.id)
        .map_err(|e| ApiError::internal("Failed to issue verification token", e))?;
    state
        .mailer
        .send_verification_email(&config, &user.email, &token);

    Ok(HttpResponse::Ok().json(json!({ "message": "Verification email sent" })))
}

async fn refresh_token(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ApiError> {
    let user_id = auth_user.user_id.clone();
    let pool = pool.clone();
    let user = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        users_db_operations::user_by_id(&conn, &user_id)?
            .ok_or_else(|| ApiError::Authentication("Account no longer exists".to_string()))
    })
    .await??;

    if !user.is_email_verified {
        return Err(ApiError::Authentication(
            "Please verify your email before logging in".to_string(),
        ));
    }

    let token = auth_helpers::issue_auth_token(&config.jwt_secret, &user.id)
        .map_err(|e| ApiError::internal("Failed to issue auth token", e))?;
    Ok(HttpResponse::Ok()
        .cookie(auth_helpers::auth_cookie(&token, config.use_secure_cookies))
        .json(json!({ "token": token })))
}

#[derive(Deserialize)]
struct FederatedPayload {
    google_id: String,
    email: String,
    name: String,
}

/// Completes a login for an identity already verified by the external
/// provider. The OAuth dance itself happens upstream of this API.
async fn federated(
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    payload: web::Json<FederatedPayload>,
) -> Result<HttpResponse, ApiError> {
    let FederatedPayload {
        google_id,
        email,
        name,
    } = payload.into_inner();
    auth_helpers::validate_email(&email).map_err(ApiError::Validation)?;

    let pool = pool.clone();
    let user = web::block(move || -> Result<_, ApiError> {
        let mut conn = pool.get()?;
        Ok(users_db_operations::federated_login(
            &mut conn, &google_id, &email, &name,
        )?)
    })
    .await??;

    let token = auth_helpers::issue_auth_token(&config.jwt_secret, &user.id)
        .map_err(|e| ApiError::internal("Failed to issue auth token", e))?;
    Ok(HttpResponse::Ok()
        .cookie(auth_helpers::auth_cookie(&token, config.use_secure_cookies))
        .json(json!({ "token": token, "user": user.private_view() })))
}

async fn csrf_token(
    state: web::Data<AppState>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ApiError> {
    let (session_id, token) = state.csrf.issue();
    let cookie = Cookie::build("csrf_session", session_id)
        .http_only(true)
        .secure(config.use_secure_cookies)
        .same_site(SameSite::Lax)
        .path("/")
        .finish();
    Ok(HttpResponse::Ok()
        .cookie(cookie)
        .json(json!({ "csrf_token": token })))
}
