use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::error::ApiError;
use crate::helper::auth_helpers;
use crate::helper::media_helpers::{self, ImageKind};
use crate::middleware::AuthenticatedUser;
use crate::models::db_operations::users_db_operations;
use crate::{AppState, DbPool};

pub fn config_users(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/users")
            .route("/profile", web::get().to(get_profile))
            .route("/profile", web::put().to(update_profile))
            .route("/change-password", web::put().to(change_password))
            .route("/change-email", web::put().to(change_email))
            .route("/upload-avatar", web::post().to(upload_avatar))
            .route("/remove-avatar", web::delete().to(remove_avatar))
            .route("/auth-type", web::get().to(auth_type))
            .route("/{id}", web::get().to(public_profile)),
    );
}

async fn get_profile(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let pool = pool.clone();
    let user = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        users_db_operations::user_by_id(&conn, &auth_user.user_id)?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
    })
    .await??;
    Ok(HttpResponse::Ok().json(user.private_view()))
}

async fn public_profile(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();
    let pool = pool.clone();
    let user = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        users_db_operations::user_by_id(&conn, &user_id)?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
    })
    .await??;
    Ok(HttpResponse::Ok().json(user.public_view()))
}

#[derive(Deserialize)]
struct ProfilePayload {
    username: String,
    description: Option<String>,
    email: Option<String>,
}

async fn update_profile(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    payload: web::Json<ProfilePayload>,
) -> Result<HttpResponse, ApiError> {
    let payload = payload.into_inner();
    if payload.email.is_some() {
        return Err(ApiError::Validation(
            "Email cannot be changed here. Use the change-email endpoint".to_string(),
        ));
    }
    let username = payload.username.trim().to_string();
    let username_chars = username.chars().count();
    if username_chars < 2 || username_chars > 30 {
        return Err(ApiError::Validation(
            "Username must be between 2 and 30 characters".to_string(),
        ));
    }
    if let Some(description) = &payload.description {
        if description.chars().count() > 500 {
            return Err(ApiError::Validation(
                "Description must be at most 500 characters".to_string(),
            ));
        }
    }

    let pool = pool.clone();
    let user = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(users_db_operations::update_profile(
            &conn,
            &auth_user.user_id,
            &username,
            payload.description.as_deref(),
        )?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(user.private_view()))
}

#[derive(Deserialize)]
struct ChangePasswordPayload {
    current_password: String,
    new_password: String,
}

async fn change_password(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    payload: web::Json<ChangePasswordPayload>,
) -> Result<HttpResponse, ApiError> {
    let payload = payload.into_inner();
    auth_helpers::validate_new_password(&payload.new_password).map_err(ApiError::Validation)?;

    let pool = pool.clone();
    web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        let user = users_db_operations::user_by_id(&conn, &auth_user.user_id)?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
        if user.is_federated() {
            return Err(ApiError::Validation(
                "Password cannot be changed for accounts using external sign-in".to_string(),
            ));
        }
        if !bcrypt::verify(&payload.current_password, &user.password_hash)
            .map_err(|e| ApiError::internal("Password verification failed", e))?
        {
            return Err(ApiError::Authentication(
                "Current password is incorrect".to_string(),
            ));
        }
        Ok(users_db_operations::set_password(
            &conn,
            &user.id,
            &payload.new_password,
        )?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({ "message": "Password updated" })))
}

#[derive(Deserialize)]
struct ChangeEmailPayload {
    password: String,
    new_email: String,
}

async fn change_email(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    state: web::Data<AppState>,
    payload: web::Json<ChangeEmailPayload>,
) -> Result<HttpResponse, ApiError> {
    let payload = payload.into_inner();
    auth_helpers::validate_email(&payload.new_email).map_err(ApiError::Validation)?;

    let pool = pool.clone();
    let new_email = payload.new_email.trim().to_string();
    let stored_email = new_email.clone();
    let (user_id, old_email) = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        let user = users_db_operations::user_by_id(&conn, &auth_user.user_id)?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
        if user.is_federated() {
            return Err(ApiError::Validation(
                "Email cannot be changed for accounts using external sign-in".to_string(),
            ));
        }
        if !bcrypt::verify(&payload.password, &user.password_hash)
            .map_err(|e| ApiError::internal("Password verification failed", e))?
        {
            return Err(ApiError::Authentication("Password is incorrect".to_string()));
        }
        users_db_operations::set_email(&conn, &user.id, &stored_email)?;
        Ok((user.id, user.email))
    })
    .await??;

    state.mailer.send(
        &old_email,
        "Your email address was changed",
        &format!(
            "The email address on your account is now {}. If this was not \
             you, contact support immediately.",
            new_email
        ),
    );
    match auth_helpers::issue_verification_token(&config.jwt_secret, &user_id) {
        Ok(token) => state
            .mailer
            .send_verification_email(&config, &new_email, &token),
        Err(e) => log::error!("Failed to issue verification token for {}: {}", user_id, e),
    }

    Ok(HttpResponse::Ok().json(json!({
        "message": "Email updated. Check your new address for a verification link."
    })))
}

async fn upload_avatar(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let image_path = media_helpers::save_image(&config, ImageKind::Avatar, payload).await?;

    let pool = pool.clone();
    let stored_path = image_path.clone();
    let result = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(users_db_operations::set_avatar(
            &conn,
            &auth_user.user_id,
            Some(&stored_path),
        )?)
    })
    .await?;

    match result {
        Ok(old_image) => {
            if let Some(old) = old_image {
                media_helpers::delete_image(&config, &old).await;
            }
            Ok(HttpResponse::Ok().json(json!({ "image": image_path })))
        }
        Err(e) => {
            media_helpers::delete_image(&config, &image_path).await;
            Err(e)
        }
    }
}

async fn remove_avatar(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ApiError> {
    let pool = pool.clone();
    let old_image = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(users_db_operations::set_avatar(
            &conn,
            &auth_user.user_id,
            None,
        )?)
    })
    .await??;

    if let Some(old) = old_image {
        media_helpers::delete_image(&config, &old).await;
    }
    Ok(HttpResponse::Ok().json(json!({ "message": "Avatar removed" })))
}

async fn auth_type(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let pool = pool.clone();
    let user = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        users_db_operations::user_by_id(&conn, &auth_user.user_id)?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
    })
    .await??;
    let auth_type = if user.is_federated() { "google" } else { "password" };
    Ok(HttpResponse::Ok().json(json!({ "auth_type": auth_type })))
}
