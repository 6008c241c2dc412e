use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::middleware::AuthenticatedUser;
use crate::models::db_operations::comments_db_operations;
use crate::DbPool;

pub fn config_comments(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/comments")
            .route("/comment/{id}", web::get().to(get_comment))
            .route("/like/{id}", web::post().to(toggle_like))
            .route("/isliked/{id}", web::get().to(is_liked))
            .route("/{post_id}", web::post().to(create_comment))
            .route("/{post_id}", web::get().to(comments_for_post))
            .route("/{id}", web::delete().to(delete_comment)),
    );
}

#[derive(Deserialize)]
struct CommentPayload {
    content: String,
}

async fn create_comment(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    path: web::Path<String>,
    payload: web::Json<CommentPayload>,
) -> Result<HttpResponse, ApiError> {
    let post_id = path.into_inner();
    let content = payload.into_inner().content;
    let pool = pool.clone();
    let comment = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(comments_db_operations::create_comment(
            &conn,
            &post_id,
            &auth_user.user_id,
            &content,
        )?)
    })
    .await??;
    Ok(HttpResponse::Created().json(comment))
}

async fn comments_for_post(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let post_id = path.into_inner();
    let pool = pool.clone();
    let comments = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(comments_db_operations::comments_for_post(&conn, &post_id)?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(comments))
}

async fn get_comment(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let comment_id = path.into_inner();
    let pool = pool.clone();
    let comment = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        comments_db_operations::comment_by_id(&conn, &comment_id)?
            .ok_or_else(|| ApiError::NotFound("Comment not found".to_string()))
    })
    .await??;
    Ok(HttpResponse::Ok().json(comment))
}

async fn delete_comment(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let comment_id = path.into_inner();
    let pool = pool.clone();
    web::block(move || -> Result<_, ApiError> {
        let mut conn = pool.get()?;
        Ok(comments_db_operations::delete_comment(
            &mut conn,
            &comment_id,
            &auth_user.user_id,
        )?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({ "message": "Comment deleted" })))
}

async fn toggle_like(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let comment_id = path.into_inner();
    let pool = pool.clone();
    let (liked, likes) = web::block(move || -> Result<_, ApiError> {
        let mut conn = pool.get()?;
        Ok(comments_db_operations::toggle_like(
            &mut conn,
            &comment_id,
            &auth_user.user_id,
        )?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({ "liked": liked, "likes": likes })))
}

async fn is_liked(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let comment_id = path.into_inner();
    let pool = pool.clone();
    let liked = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(comments_db_operations::is_liked(
            &conn,
            &comment_id,
            &auth_user.user_id,
        )?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({ "liked": liked })))
}
