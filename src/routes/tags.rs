use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::middleware::AuthenticatedUser;
use crate::models::db_operations::tags_db_operations;
use crate::DbPool;

pub fn config_tags(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/tags")
            .route("", web::get().to(list_tags))
            .route("", web::post().to(create_tag))
            .route("/slug/{slug}", web::get().to(tag_by_slug))
            .route("/{id}", web::get().to(get_tag))
            .route("/{id}", web::put().to(update_tag))
            .route("/{id}", web::delete().to(delete_tag)),
    );
}

async fn list_tags(pool: web::Data<DbPool>) -> Result<HttpResponse, ApiError> {
    let pool = pool.clone();
    let tags = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(tags_db_operations::all_tags(&conn)?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(tags))
}

#[derive(Deserialize)]
struct TagPayload {
    name: String,
    description: Option<String>,
}

async fn create_tag(
    _auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    payload: web::Json<TagPayload>,
) -> Result<HttpResponse, ApiError> {
    let TagPayload { name, description } = payload.into_inner();
    let pool = pool.clone();
    let tag = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(tags_db_operations::create_tag(
            &conn,
            &name,
            description.as_deref().unwrap_or(""),
        )?)
    })
    .await??;
    Ok(HttpResponse::Created().json(tag))
}

async fn tag_by_slug(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let slug = path.into_inner();
    let pool = pool.clone();
    let tag = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        tags_db_operations::tag_by_slug(&conn, &slug)?
            .ok_or_else(|| ApiError::NotFound("Tag not found".to_string()))
    })
    .await??;
    Ok(HttpResponse::Ok().json(tag))
}

async fn get_tag(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let pool = pool.clone();
    let tag = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        tags_db_operations::tag_by_id(&conn, &id)?
            .ok_or_else(|| ApiError::NotFound("Tag not found".to_string()))
    })
    .await??;
    Ok(HttpResponse::Ok().json(tag))
}

async fn update_tag(
    _auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    path: web::Path<String>,
    payload: web::Json<TagPayload>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let TagPayload { name, description } = payload.into_inner();
    let pool = pool.clone();
    let tag = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(tags_db_operations::update_tag(
            &conn,
            &id,
            &name,
            description.as_deref(),
        )?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(tag))
}

async fn delete_tag(
    _auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let pool = pool.clone();
    web::block(move || -> Result<_, ApiError> {
        let mut conn = pool.get()?;
        Ok(tags_db_operations::delete_tag(&mut conn, &id)?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({ "message": "Tag deleted" })))
}
