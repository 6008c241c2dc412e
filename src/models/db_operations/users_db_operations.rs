use bcrypt::{hash, verify};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::DbError;
use crate::models::User;

const MAX_LOGIN_ATTEMPTS: u32 = 5;
const LOCK_MINUTES: i64 = 30;
const VERIFICATION_WINDOW_HOURS: i64 = 48;

const USER_COLUMNS: &str = "id, login, email, password_hash, username, description, image,
    is_email_verified, email_verification_expires, login_attempts, lock_until,
    password_reset_token, password_reset_expires, last_password_change, google_id,
    created_at, updated_at";

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        login: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        username: row.get(4)?,
        description: row.get(5)?,
        image: row.get(6)?,
        is_email_verified: row.get(7)?,
        email_verification_expires: row.get(8)?,
        login_attempts: row.get(9)?,
        lock_until: row.get(10)?,
        password_reset_token: row.get(11)?,
        password_reset_expires: row.get(12)?,
        last_password_change: row.get(13)?,
        google_id: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

pub fn user_by_id(conn: &Connection, id: &str) -> Result<Option<User>, DbError> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            [id],
            user_from_row,
        )
        .optional()?)
}

pub fn user_by_login(conn: &Connection, login: &str) -> Result<Option<User>, DbError> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM users WHERE login = ?1", USER_COLUMNS),
            [login],
            user_from_row,
        )
        .optional()?)
}

pub fn user_by_email(conn: &Connection, email: &str) -> Result<Option<User>, DbError> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
            [email],
            user_from_row,
        )
        .optional()?)
}

pub struct NewUser {
    pub login: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub description: String,
}

/// Registers an account. A login or email held by a live account is a
/// conflict; one held by an unverified account whose verification window
/// has lapsed is reclaimed by purging the stale row first, inside the same
/// transaction as the insert.
pub fn create_user(conn: &mut Connection, new_user: &NewUser) -> Result<User, DbError> {
    let password_hash = hash(&new_user.password, bcrypt::DEFAULT_COST)?;
    let now = Utc::now();

    let tx = conn.transaction()?;
    for (column, value) in [("login", &new_user.login), ("email", &new_user.email)] {
        let existing: Option<(String, bool, DateTime<Utc>)> = tx
            .query_row(
                &format!(
                    "SELECT id, is_email_verified, email_verification_expires
                     FROM users WHERE {} = ?1",
                    column
                ),
                [value],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        if let Some((id, verified, deadline)) = existing {
            if verified || deadline > now {
                return Err(DbError::Conflict(format!(
                    "A user with this {} already exists",
                    column
                )));
            }
            // Stale unverified account past its deadline: reclaim the slot.
            purge_user(&tx, &id)?;
        }
    }

    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO users (id, login, email, password_hash, username, description,
            is_email_verified, email_verification_expires, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?8)",
        params![
            id,
            new_user.login,
            new_user.email,
            password_hash,
            new_user.username,
            new_user.description,
            now + Duration::hours(VERIFICATION_WINDOW_HOURS),
            now
        ],
    )?;
    let user = user_by_id(&tx, &id)?.ok_or(DbError::NotFound("User"))?;
    tx.commit()?;
    Ok(user)
}

fn purge_user(conn: &Connection, user_id: &str) -> Result<(), DbError> {
    conn.execute("DELETE FROM liked_posts WHERE user_id = ?1", [user_id])?;
    conn.execute("DELETE FROM favourite_posts WHERE user_id = ?1", [user_id])?;
    conn.execute("DELETE FROM liked_comments WHERE user_id = ?1", [user_id])?;
    conn.execute("DELETE FROM users WHERE id = ?1", [user_id])?;
    Ok(())
}

/// Credential check with lockout. Five consecutive failures lock the
/// account for thirty minutes; attempts during the lock window are rejected
/// up front without consuming another attempt; a successful login resets
/// the counter and clears any lock.
pub fn verify_login(conn: &Connection, login: &str, password: &str) -> Result<User, DbError> {
    let user = user_by_login(conn, login)?.ok_or(DbError::NotFound("User"))?;

    if !user.is_email_verified {
        return Err(DbError::NotVerified);
    }

    let now = Utc::now();
    if let Some(until) = user.lock_until {
        if until > now {
            return Err(DbError::Locked {
                seconds_remaining: (until - now).num_seconds(),
            });
        }
    }

    if !verify(password, &user.password_hash)? {
        let attempts = user.login_attempts + 1;
        if attempts >= MAX_LOGIN_ATTEMPTS {
            let until = now + Duration::minutes(LOCK_MINUTES);
            conn.execute(
                "UPDATE users SET login_attempts = ?2, lock_until = ?3 WHERE id = ?1",
                params![user.id, attempts, until],
            )?;
            return Err(DbError::Locked {
                seconds_remaining: (until - now).num_seconds(),
            });
        }
        conn.execute(
            "UPDATE users SET login_attempts = ?2 WHERE id = ?1",
            params![user.id, attempts],
        )?;
        return Err(DbError::BadCredentials {
            attempts_remaining: MAX_LOGIN_ATTEMPTS - attempts,
        });
    }

    conn.execute(
        "UPDATE users SET login_attempts = 0, lock_until = NULL WHERE id = ?1",
        [&user.id],
    )?;
    user_by_id(conn, &user.id)?.ok_or(DbError::NotFound("User"))
}

/// One-way verified transition.
pub fn mark_email_verified(conn: &Connection, user_id: &str) -> Result<(), DbError> {
    let user = user_by_id(conn, user_id)?.ok_or(DbError::NotFound("User"))?;
    if user.is_email_verified {
        return Err(DbError::Validation(
            "Email address is already verified".to_string(),
        ));
    }
    conn.execute(
        "UPDATE users SET is_email_verified = 1, updated_at = ?2 WHERE id = ?1",
        params![user_id, Utc::now()],
    )?;
    Ok(())
}

/// Pushes the prune deadline forward when a fresh verification mail goes out.
pub fn extend_verification_deadline(conn: &Connection, user_id: &str) -> Result<(), DbError> {
    conn.execute(
        "UPDATE users SET email_verification_expires = ?2, updated_at = ?3 WHERE id = ?1",
        params![
            user_id,
            Utc::now() + Duration::hours(VERIFICATION_WINDOW_HOURS),
            Utc::now()
        ],
    )?;
    Ok(())
}

pub fn update_profile(
    conn: &Connection,
    user_id: &str,
    username: &str,
    description: Option<&str>,
) -> Result<User, DbError> {
    let updated = conn.execute(
        "UPDATE users SET username = ?2, description = COALESCE(?3, description), updated_at = ?4
         WHERE id = ?1",
        params![user_id, username, description, Utc::now()],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound("User"));
    }
    user_by_id(conn, user_id)?.ok_or(DbError::NotFound("User"))
}

pub fn set_password(conn: &Connection, user_id: &str, new_password: &str) -> Result<(), DbError> {
    let password_hash = hash(new_password, bcrypt::DEFAULT_COST)?;
    let now = Utc::now();
    conn.execute(
        "UPDATE users SET password_hash = ?2, last_password_change = ?3, updated_at = ?3
         WHERE id = ?1",
        params![user_id, password_hash, now],
    )?;
    Ok(())
}

/// Changes the address and drops the verified flag; the caller re-sends a
/// verification token.
pub fn set_email(conn: &Connection, user_id: &str, new_email: &str) -> Result<(), DbError> {
    let taken: Option<String> = conn
        .query_row(
            "SELECT id FROM users WHERE email = ?1 AND id <> ?2",
            params![new_email, user_id],
            |row| row.get(0),
        )
        .optional()?;
    if taken.is_some() {
        return Err(DbError::Conflict("This email is already in use".to_string()));
    }
    conn.execute(
        "UPDATE users SET email = ?2, is_email_verified = 0,
            email_verification_expires = ?3, updated_at = ?4
         WHERE id = ?1",
        params![
            user_id,
            new_email,
            Utc::now() + Duration::hours(VERIFICATION_WINDOW_HOURS),
            Utc::now()
        ],
    )?;
    Ok(())
}

/// Sets the avatar path and returns the previous one for best-effort file
/// cleanup.
pub fn set_avatar(
    conn: &Connection,
    user_id: &str,
    image_path: Option<&str>,
) -> Result<Option<String>, DbError> {
    let old: Option<String> = conn
        .query_row("SELECT image FROM users WHERE id = ?1", [user_id], |row| {
            row.get(0)
        })
        .optional()?
        .ok_or(DbError::NotFound("User"))?;
    conn.execute(
        "UPDATE users SET image = ?2, updated_at = ?3 WHERE id = ?1",
        params![user_id, image_path, Utc::now()],
    )?;
    Ok(old)
}

/// Federated sign-in provisioning: match by external identity, then by
/// email (backfilling the identity), else auto-provision a pre-verified
/// account with a random unusable password.
pub fn federated_login(
    conn: &mut Connection,
    google_id: &str,
    email: &str,
    display_name: &str,
) -> Result<User, DbError> {
    if let Some(user) = user_by_google_id(conn, google_id)? {
        return Ok(user);
    }

    if let Some(user) = user_by_email(conn, email)? {
        if user.google_id.is_none() {
            conn.execute(
                "UPDATE users SET google_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![user.id, google_id, Utc::now()],
            )?;
        }
        return user_by_id(conn, &user.id)?.ok_or(DbError::NotFound("User"));
    }

    let mut random_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut random_bytes);
    let password_hash = hash(hex::encode(random_bytes), bcrypt::DEFAULT_COST)?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let username = if display_name.trim().is_empty() {
        email.split('@').next().unwrap_or(email)
    } else {
        display_name
    };
    conn.execute(
        "INSERT INTO users (id, login, email, password_hash, username, description,
            is_email_verified, email_verification_expires, google_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, '', 1, ?6, ?7, ?8, ?8)",
        params![
            id,
            format!("google_{}", google_id),
            email,
            password_hash,
            username,
            now + Duration::hours(VERIFICATION_WINDOW_HOURS),
            google_id,
            now
        ],
    )?;
    user_by_id(conn, &id)?.ok_or(DbError::NotFound("User"))
}

fn user_by_google_id(conn: &Connection, google_id: &str) -> Result<Option<User>, DbError> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM users WHERE google_id = ?1", USER_COLUMNS),
            [google_id],
            user_from_row,
        )
        .optional()?)
}

/// Maintenance sweep: removes unverified accounts whose verification window
/// has lapsed.
pub fn purge_expired_unverified(conn: &mut Connection) -> Result<usize, DbError> {
    let tx = conn.transaction()?;
    let mut stmt = tx.prepare(
        "SELECT id FROM users
         WHERE is_email_verified = 0 AND email_verification_expires < ?1",
    )?;
    let stale: Vec<String> = stmt
        .query_map([Utc::now()], |row| row.get(0))?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    for id in &stale {
        purge_user(&tx, id)?;
    }
    tx.commit()?;
    Ok(stale.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::db_operations::posts_db_operations::test_support::test_conn;

    fn register(conn: &mut Connection, login: &str) -> User {
        create_user(
            conn,
            &NewUser {
                login: login.to_string(),
                email: format!("{}@example.com", login),
                username: login.to_string(),
                password: "correct horse 1".to_string(),
                description: String::new(),
            },
        )
        .unwrap()
    }

    fn verify_account(conn: &Connection, user_id: &str) {
        mark_email_verified(conn, user_id).unwrap();
    }

    #[test]
    fn register_conflicts_with_verified_account() {
        let mut conn = test_conn();
        let user = register(&mut conn, "taken");
        verify_account(&conn, &user.id);

        let err = create_user(
            &mut conn,
            &NewUser {
                login: "taken".to_string(),
                email: "other@example.com".to_string(),
                username: "other".to_string(),
                password: "pw pw pw 1".to_string(),
                description: String::new(),
            },
        );
        assert!(matches!(err, Err(DbError::Conflict(_))));
    }

    #[test]
    fn register_reclaims_expired_unverified_account() {
        let mut conn = test_conn();
        let stale = register(&mut conn, "ghost");
        // Fresh unverified account still holds the slot.
        let err = create_user(
            &mut conn,
            &NewUser {
                login: "ghost".to_string(),
                email: "ghost@example.com".to_string(),
                username: "ghost".to_string(),
                password: "pw pw pw 1".to_string(),
                description: String::new(),
            },
        );
        assert!(matches!(err, Err(DbError::Conflict(_))));

        // Once the verification window lapses the slot is reclaimed.
        conn.execute(
            "UPDATE users SET email_verification_expires = ?2 WHERE id = ?1",
            params![stale.id, Utc::now() - Duration::hours(1)],
        )
        .unwrap();
        let replacement = create_user(
            &mut conn,
            &NewUser {
                login: "ghost".to_string(),
                email: "ghost@example.com".to_string(),
                username: "ghost".to_string(),
                password: "pw pw pw 1".to_string(),
                description: String::new(),
            },
        )
        .unwrap();
        assert_ne!(replacement.id, stale.id);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn login_requires_verified_email() {
        let mut conn = test_conn();
        register(&mut conn, "fresh");
        let err = verify_login(&conn, "fresh", "correct horse 1");
        assert!(matches!(err, Err(DbError::NotVerified)));
    }

    #[test]
    fn five_failures_lock_for_thirty_minutes() {
        let mut conn = test_conn();
        let user = register(&mut conn, "victim");
        verify_account(&conn, &user.id);

        for expected_remaining in [4u32, 3, 2, 1] {
            match verify_login(&conn, "victim", "wrong") {
                Err(DbError::BadCredentials { attempts_remaining }) => {
                    assert_eq!(attempts_remaining, expected_remaining)
                }
                other => panic!("expected BadCredentials, got {:?}", other.map(|u| u.id)),
            }
        }

        // Fifth failure trips the lock.
        match verify_login(&conn, "victim", "wrong") {
            Err(DbError::Locked { seconds_remaining }) => {
                assert!(seconds_remaining > 29 * 60 && seconds_remaining <= 30 * 60)
            }
            other => panic!("expected Locked, got {:?}", other.map(|u| u.id)),
        }

        // A sixth attempt during the window is rejected up front, even with
        // the correct password, and does not consume another attempt.
        let attempts_before: u32 = conn
            .query_row(
                "SELECT login_attempts FROM users WHERE id = ?1",
                [&user.id],
                |row| row.get(0),
            )
            .unwrap();
        assert!(matches!(
            verify_login(&conn, "victim", "correct horse 1"),
            Err(DbError::Locked { .. })
        ));
        let attempts_after: u32 = conn
            .query_row(
                "SELECT login_attempts FROM users WHERE id = ?1",
                [&user.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(attempts_before, attempts_after);

        // Once the lock elapses the correct password works and resets the
        // counter.
        conn.execute(
            "UPDATE users SET lock_until = ?2 WHERE id = ?1",
            params![user.id, Utc::now() - Duration::minutes(1)],
        )
        .unwrap();
        let logged_in = verify_login(&conn, "victim", "correct horse 1").unwrap();
        assert_eq!(logged_in.login_attempts, 0);
        assert!(logged_in.lock_until.is_none());
    }

    #[test]
    fn email_verification_is_one_way() {
        let mut conn = test_conn();
        let user = register(&mut conn, "oneway");
        mark_email_verified(&conn, &user.id).unwrap();
        assert!(matches!(
            mark_email_verified(&conn, &user.id),
            Err(DbError::Validation(_))
        ));
    }

    #[test]
    fn federated_login_matches_then_backfills_then_provisions() {
        let mut conn = test_conn();
        // Provisioning path.
        let provisioned =
            federated_login(&mut conn, "gid-1", "new@example.com", "New Person").unwrap();
        assert!(provisioned.is_email_verified);
        assert_eq!(provisioned.google_id.as_deref(), Some("gid-1"));
        assert_eq!(provisioned.login, "google_gid-1");

        // Same identity signs in again: matched, not duplicated.
        let again = federated_login(&mut conn, "gid-1", "new@example.com", "New Person").unwrap();
        assert_eq!(again.id, provisioned.id);

        // Existing password account gets the identity backfilled by email.
        let local = register(&mut conn, "local");
        let linked = federated_login(&mut conn, "gid-2", &local.email, "Local").unwrap();
        assert_eq!(linked.id, local.id);
        assert_eq!(linked.google_id.as_deref(), Some("gid-2"));
    }

    #[test]
    fn purge_removes_only_expired_unverified() {
        let mut conn = test_conn();
        let stale = register(&mut conn, "stale");
        let fresh = register(&mut conn, "fresh");
        let verified = register(&mut conn, "done");
        verify_account(&conn, &verified.id);

        conn.execute(
            "UPDATE users SET email_verification_expires = ?2 WHERE id = ?1",
            params![stale.id, Utc::now() - Duration::hours(1)],
        )
        .unwrap();

        assert_eq!(purge_expired_unverified(&mut conn).unwrap(), 1);
        assert!(user_by_id(&conn, &stale.id).unwrap().is_none());
        assert!(user_by_id(&conn, &fresh.id).unwrap().is_some());
        assert!(user_by_id(&conn, &verified.id).unwrap().is_some());
    }

    #[test]
    fn change_email_conflicts_and_resets_verification() {
        let mut conn = test_conn();
        let a = register(&mut conn, "first");
        let b = register(&mut conn, "second");
        verify_account(&conn, &a.id);

        assert!(matches!(
            set_email(&conn, &a.id, &b.email),
            Err(DbError::Conflict(_))
        ));

        set_email(&conn, &a.id, "fresh@example.com").unwrap();
        let after = user_by_id(&conn, &a.id).unwrap().unwrap();
        assert_eq!(after.email, "fresh@example.com");
        assert!(!after.is_email_verified);
    }
}
