use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::helper::mailer::Mailer;
use crate::middleware::{CsrfStore, SlidingWindow};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Shared services handed to handlers and middleware. Built once in `main`
/// so tests can assemble their own with different limits.
pub struct AppState {
    pub csrf: Arc<CsrfStore>,
    pub api_limiter: Arc<SlidingWindow>,
    pub auth_limiter: Arc<SlidingWindow>,
    pub mailer: Mailer,
}

pub mod config;
pub mod error;
pub mod helper;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod setup;
