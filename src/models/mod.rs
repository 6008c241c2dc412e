use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Full user record as stored. Never serialized to clients directly;
/// use [`User::private_view`] or [`User::public_view`].
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub login: String,
    pub email: String,
    pub password_hash: String,
    pub username: String,
    pub description: String,
    pub image: Option<String>,
    pub is_email_verified: bool,
    pub email_verification_expires: DateTime<Utc>,
    pub login_attempts: u32,
    pub lock_until: Option<DateTime<Utc>>,
    pub password_reset_token: Option<String>,
    pub password_reset_expires: Option<DateTime<Utc>>,
    pub last_password_change: Option<DateTime<Utc>>,
    pub google_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile projection returned to the account owner. Credential hashes,
/// reset tokens and lockout state never leave the server.
#[derive(Debug, Serialize)]
pub struct PrivateUserView {
    pub id: String,
    pub login: String,
    pub email: String,
    pub username: String,
    pub description: String,
    pub image: Option<String>,
    pub is_email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile projection visible to other users.
#[derive(Debug, Serialize)]
pub struct PublicUserView {
    pub id: String,
    pub username: String,
    pub description: String,
    pub image: Option<String>,
}

impl User {
    pub fn private_view(&self) -> PrivateUserView {
        PrivateUserView {
            id: self.id.clone(),
            login: self.login.clone(),
            email: self.email.clone(),
            username: self.username.clone(),
            description: self.description.clone(),
            image: self.image.clone(),
            is_email_verified: self.is_email_verified,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn public_view(&self) -> PublicUserView {
        PublicUserView {
            id: self.id.clone(),
            username: self.username.clone(),
            description: self.description.clone(),
            image: self.image.clone(),
        }
    }

    pub fn is_federated(&self) -> bool {
        self.google_id.is_some()
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct PostAuthor {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TagRef {
    pub id: String,
    pub name: String,
    pub slug: String,
}

/// Post enriched with its resolved author and tags, as returned by the API.
#[derive(Debug, Serialize)]
pub struct PostView {
    pub id: String,
    pub title: String,
    pub content: String,
    pub author: PostAuthor,
    pub tags: Vec<TagRef>,
    pub likes: i64,
    pub views: i64,
    pub is_published: bool,
    pub image: Option<String>,
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub content: String,
    pub likes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub pages: i64,
}

#[derive(Debug, Serialize)]
pub struct PostPage {
    pub posts: Vec<PostView>,
    pub pagination: Pagination,
}

pub mod db_operations;
