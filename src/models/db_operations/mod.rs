use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Rusqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Bcrypt error: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Validation(String),
    #[error("permission denied")]
    Forbidden,
    #[error("email address is not verified")]
    NotVerified,
    #[error("account is locked for {seconds_remaining} more seconds")]
    Locked { seconds_remaining: i64 },
    #[error("invalid credentials, {attempts_remaining} attempts remaining")]
    BadCredentials { attempts_remaining: u32 },
}

pub mod comments_db_operations;
pub mod posts_db_operations;
pub mod tags_db_operations;
pub mod users_db_operations;
