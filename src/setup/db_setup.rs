use rusqlite::{Connection, Result as RusqliteResult, Transaction};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
}

/// Creates the full schema. Safe to run repeatedly.
pub fn setup_blog_db(conn: &mut Connection) -> Result<(), SetupError> {
    let tx = conn.transaction()?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            login TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            username TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            image TEXT,
            is_email_verified INTEGER NOT NULL DEFAULT 0,
            email_verification_expires TEXT NOT NULL,
            login_attempts INTEGER NOT NULL DEFAULT 0,
            lock_until TEXT,
            password_reset_token TEXT,
            password_reset_expires TEXT,
            last_password_change TEXT,
            google_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS posts (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            author_id TEXT NOT NULL REFERENCES users(id),
            likes INTEGER NOT NULL DEFAULT 0,
            views INTEGER NOT NULL DEFAULT 0,
            is_published INTEGER NOT NULL DEFAULT 1,
            image TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS post_images (
            post_id TEXT NOT NULL REFERENCES posts(id),
            position INTEGER NOT NULL,
            path TEXT NOT NULL,
            PRIMARY KEY (post_id, position)
        )",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS tags (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            slug TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            usage_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS post_tags (
            post_id TEXT NOT NULL REFERENCES posts(id),
            tag_id TEXT NOT NULL REFERENCES tags(id),
            position INTEGER NOT NULL,
            PRIMARY KEY (post_id, tag_id)
        )",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS comments (
            id TEXT PRIMARY KEY,
            post_id TEXT NOT NULL REFERENCES posts(id),
            author_id TEXT NOT NULL REFERENCES users(id),
            content TEXT NOT NULL,
            likes INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // Per-user relation sets. These are the source of truth for like and
    // favourite state; the counters on posts/comments are derived caches.
    tx.execute(
        "CREATE TABLE IF NOT EXISTS liked_posts (
            user_id TEXT NOT NULL REFERENCES users(id),
            post_id TEXT NOT NULL REFERENCES posts(id),
            PRIMARY KEY (user_id, post_id)
        )",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS favourite_posts (
            user_id TEXT NOT NULL REFERENCES users(id),
            post_id TEXT NOT NULL REFERENCES posts(id),
            PRIMARY KEY (user_id, post_id)
        )",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS liked_comments (
            user_id TEXT NOT NULL REFERENCES users(id),
            comment_id TEXT NOT NULL REFERENCES comments(id),
            PRIMARY KEY (user_id, comment_id)
        )",
        [],
    )?;

    create_indexes(&tx)?;

    tx.commit()?;
    Ok(())
}

fn create_indexes(tx: &Transaction) -> RusqliteResult<()> {
    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_username ON users(username)",
        [],
    )?;
    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_verification
         ON users(is_email_verified, email_verification_expires)",
        [],
    )?;
    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_id)",
        [],
    )?;
    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_posts_published_created
         ON posts(is_published, created_at)",
        [],
    )?;
    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_post_tags_tag ON post_tags(tag_id)",
        [],
    )?;
    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_comments_post_created
         ON comments(post_id, created_at)",
        [],
    )?;
    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_comments_author ON comments(author_id)",
        [],
    )?;
    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_liked_posts_post ON liked_posts(post_id)",
        [],
    )?;
    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_favourite_posts_post ON favourite_posts(post_id)",
        [],
    )?;
    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_liked_comments_comment ON liked_comments(comment_id)",
        [],
    )?;
    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_tags_usage ON tags(usage_count)",
        [],
    )?;
    Ok(())
}

/// Idempotent starter tag set for a fresh install.
pub fn seed_tags(conn: &mut Connection) -> Result<usize, SetupError> {
    let starter = [
        ("Programming", "programming"),
        ("Travel", "travel"),
        ("Food", "food"),
        ("Music", "music"),
        ("Science", "science"),
    ];

    let tx = conn.transaction()?;
    let mut inserted = 0;
    for (name, slug) in starter {
        let now = chrono::Utc::now();
        inserted += tx.execute(
            "INSERT OR IGNORE INTO tags (id, name, slug, description, usage_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, '', 0, ?4, ?4)",
            rusqlite::params![uuid::Uuid::new_v4().to_string(), name, slug, now],
        )?;
    }
    tx.commit()?;
    Ok(inserted)
}
