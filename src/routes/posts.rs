use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::error::ApiError;
use crate::helper::media_helpers::{self, ImageKind};
use crate::middleware::AuthenticatedUser;
use crate::models::db_operations::posts_db_operations::{
    self, PostSearchParams, PostSort, PostUpdate,
};
use crate::DbPool;

pub fn config_posts(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/posts")
            .route("", web::get().to(list_posts))
            .route("", web::post().to(create_post))
            .route("/search", web::get().to(search_posts))
            .route("/favourites", web::get().to(favourite_posts))
            .route("/user/{id}", web::get().to(posts_by_author))
            .route("/bytag/{tag_id}", web::get().to(posts_by_tag))
            .route("/like/{id}", web::post().to(toggle_like))
            .route("/favourite/{id}", web::post().to(toggle_favourite))
            .route("/isliked/{id}", web::get().to(is_liked))
            .route("/isfavourite/{id}", web::get().to(is_favourite))
            .route("/upload-image/{id}", web::post().to(upload_image))
            .route("/{id}", web::get().to(get_post))
            .route("/{id}", web::put().to(update_post))
            .route("/{id}", web::delete().to(delete_post)),
    );
}

async fn list_posts(pool: web::Data<DbPool>) -> Result<HttpResponse, ApiError> {
    let pool = pool.clone();
    let posts = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(posts_db_operations::list_posts(&conn)?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(posts))
}

#[derive(Deserialize)]
struct CreatePostPayload {
    title: String,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
    is_published: Option<bool>,
    #[serde(default)]
    images: Vec<String>,
}

async fn create_post(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    payload: web::Json<CreatePostPayload>,
) -> Result<HttpResponse, ApiError> {
    let payload = payload.into_inner();
    let pool = pool.clone();
    let post = web::block(move || -> Result<_, ApiError> {
        let mut conn = pool.get()?;
        Ok(posts_db_operations::create_post(
            &mut conn,
            &auth_user.user_id,
            &payload.title,
            &payload.content,
            &payload.tags,
            payload.is_published,
            &payload.images,
        )?)
    })
    .await??;
    Ok(HttpResponse::Created().json(post))
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
    tag: Option<String>,
    author: Option<String>,
    sort: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

async fn search_posts(
    pool: web::Data<DbPool>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    let query = query.into_inner();
    let params = PostSearchParams {
        query: query.q.filter(|s| !s.trim().is_empty()),
        tag: query.tag,
        author: query.author,
        sort: PostSort::from_query(query.sort.as_deref()),
        page: query.page.unwrap_or(1).max(1),
        limit: query.limit.unwrap_or(10).clamp(1, 100),
    };

    let pool = pool.clone();
    let page = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(posts_db_operations::search_posts(&conn, &params)?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(page))
}

async fn favourite_posts(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let pool = pool.clone();
    let posts = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(posts_db_operations::favourite_posts(
            &conn,
            &auth_user.user_id,
        )?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(posts))
}

async fn posts_by_author(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let author_id = path.into_inner();
    let pool = pool.clone();
    let posts = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(posts_db_operations::posts_by_author(&conn, &author_id)?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(posts))
}

async fn posts_by_tag(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let tag_id = path.into_inner();
    let pool = pool.clone();
    let posts = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(posts_db_operations::posts_by_tag(&conn, &tag_id)?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(posts))
}

async fn get_post(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let post_id = path.into_inner();
    let pool = pool.clone();
    let post = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(posts_db_operations::read_post(&conn, &post_id)?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(post))
}

async fn update_post(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    path: web::Path<String>,
    payload: web::Json<PostUpdate>,
) -> Result<HttpResponse, ApiError> {
    let post_id = path.into_inner();
    let update = payload.into_inner();
    let pool = pool.clone();
    let post = web::block(move || -> Result<_, ApiError> {
        let mut conn = pool.get()?;
        Ok(posts_db_operations::update_post(
            &mut conn,
            &post_id,
            &auth_user.user_id,
            update,
        )?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(post))
}

async fn delete_post(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let post_id = path.into_inner();
    let pool = pool.clone();
    web::block(move || -> Result<_, ApiError> {
        let mut conn = pool.get()?;
        Ok(posts_db_operations::delete_post(
            &mut conn,
            &post_id,
            &auth_user.user_id,
        )?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({ "message": "Post deleted" })))
}

async fn toggle_like(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let post_id = path.into_inner();
    let pool = pool.clone();
    let (liked, likes) = web::block(move || -> Result<_, ApiError> {
        let mut conn = pool.get()?;
        Ok(posts_db_operations::toggle_like(
            &mut conn,
            &post_id,
            &auth_user.user_id,
        )?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({ "liked": liked, "likes": likes })))
}

async fn toggle_favourite(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let post_id = path.into_inner();
    let pool = pool.clone();
    let favourited = web::block(move || -> Result<_, ApiError> {
        let mut conn = pool.get()?;
        Ok(posts_db_operations::toggle_favourite(
            &mut conn,
            &post_id,
            &auth_user.user_id,
        )?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({ "favourited": favourited })))
}

async fn is_liked(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let post_id = path.into_inner();
    let pool = pool.clone();
    let liked = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(posts_db_operations::is_liked(
            &conn,
            &post_id,
            &auth_user.user_id,
        )?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({ "liked": liked })))
}

async fn is_favourite(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let post_id = path.into_inner();
    let pool = pool.clone();
    let favourited = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(posts_db_operations::is_favourite(
            &conn,
            &post_id,
            &auth_user.user_id,
        )?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({ "favourited": favourited })))
}

/// Stores a new main image for a post and swaps it in. The previous file is
/// removed afterwards; a failed removal only leaves an orphan on disk.
async fn upload_image(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    path: web::Path<String>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let post_id = path.into_inner();
    let image_path = media_helpers::save_image(&config, ImageKind::PostImage, payload).await?;

    let pool = pool.clone();
    let stored_path = image_path.clone();
    let result = web::block(move || -> Result<_, ApiError> {
        let conn = pool.get()?;
        Ok(posts_db_operations::set_main_image(
            &conn,
            &post_id,
            &auth_user.user_id,
            &stored_path,
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
            // The row was never updated, so the just-written file is junk.
            media_helpers::delete_image(&config, &image_path).await;
            Err(e)
        }
    }
}
