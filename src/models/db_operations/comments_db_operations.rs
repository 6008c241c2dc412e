use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::DbError;
use crate::models::Comment;

const COMMENT_COLUMNS: &str = "id, post_id, author_id, content, likes, created_at, updated_at";

fn comment_from_row(row: &Row) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        post_id: row.get(1)?,
        author_id: row.get(2)?,
        content: row.get(3)?,
        likes: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub fn create_comment(
    conn: &Connection,
    post_id: &str,
    author_id: &str,
    content: &str,
) -> Result<Comment, DbError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(DbError::Validation(
            "Comment content cannot be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > 1000 {
        return Err(DbError::Validation(
            "Comment content must not exceed 1000 characters".to_string(),
        ));
    }

    let post_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM posts WHERE id = ?1", [post_id], |row| {
            row.get(0)
        })
        .optional()?;
    if post_exists.is_none() {
        return Err(DbError::NotFound("Post"));
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    conn.execute(
        "INSERT INTO comments (id, post_id, author_id, content, likes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
        params![id, post_id, author_id, trimmed, now],
    )?;
    comment_by_id(conn, &id)?.ok_or(DbError::NotFound("Comment"))
}

pub fn comment_by_id(conn: &Connection, id: &str) -> Result<Option<Comment>, DbError> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM comments WHERE id = ?1", COMMENT_COLUMNS),
            [id],
            comment_from_row,
        )
        .optional()?)
}

/// Comments for a post, oldest first.
pub fn comments_for_post(conn: &Connection, post_id: &str) -> Result<Vec<Comment>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM comments WHERE post_id = ?1 ORDER BY created_at ASC",
        COMMENT_COLUMNS
    ))?;
    let comments = stmt.query_map([post_id], comment_from_row)?;
    Ok(comments.collect::<Result<Vec<_>, _>>()?)
}

/// Author-only delete; scrubs the comment's like relations with it.
pub fn delete_comment(
    conn: &mut Connection,
    comment_id: &str,
    requester_id: &str,
) -> Result<(), DbError> {
    let tx = conn.transaction()?;
    let author: String = tx
        .query_row(
            "SELECT author_id FROM comments WHERE id = ?1",
            [comment_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(DbError::NotFound("Comment"))?;
    if author != requester_id {
        return Err(DbError::Forbidden);
    }
    tx.execute("DELETE FROM liked_comments WHERE comment_id = ?1", [comment_id])?;
    tx.execute("DELETE FROM comments WHERE id = ?1", [comment_id])?;
    tx.commit()?;
    Ok(())
}

/// Same shape as post likes: the per-user liked set decides the direction
/// and the derived counter moves in the same transaction.
pub fn toggle_like(
    conn: &mut Connection,
    comment_id: &str,
    user_id: &str,
) -> Result<(bool, i64), DbError> {
    let tx = conn.transaction()?;
    let exists: Option<i64> = tx
        .query_row("SELECT 1 FROM comments WHERE id = ?1", [comment_id], |row| {
            row.get(0)
        })
        .optional()?;
    if exists.is_none() {
        return Err(DbError::NotFound("Comment"));
    }

    let already: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM liked_comments WHERE user_id = ?1 AND comment_id = ?2",
            params![user_id, comment_id],
            |row| row.get(0),
        )
        .optional()?;

    let liked = if already.is_none() {
        tx.execute(
            "INSERT INTO liked_comments (user_id, comment_id) VALUES (?1, ?2)",
            params![user_id, comment_id],
        )?;
        tx.execute(
            "UPDATE comments SET likes = likes + 1 WHERE id = ?1",
            [comment_id],
        )?;
        true
    } else {
        tx.execute(
            "DELETE FROM liked_comments WHERE user_id = ?1 AND comment_id = ?2",
            params![user_id, comment_id],
        )?;
        tx.execute(
            "UPDATE comments SET likes = MAX(likes - 1, 0) WHERE id = ?1",
            [comment_id],
        )?;
        false
    };

    let likes: i64 = tx.query_row(
        "SELECT likes FROM comments WHERE id = ?1",
        [comment_id],
        |row| row.get(0),
    )?;
    tx.commit()?;
    Ok((liked, likes))
}

pub fn is_liked(conn: &Connection, comment_id: &str, user_id: &str) -> Result<bool, DbError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM liked_comments WHERE user_id = ?1 AND comment_id = ?2",
            params![user_id, comment_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Repair routine for drifted comment like counters.
pub fn recount_comment_likes(conn: &Connection) -> Result<usize, DbError> {
    let changed = conn.execute(
        "UPDATE comments SET likes =
            (SELECT COUNT(*) FROM liked_comments lc WHERE lc.comment_id = comments.id)
         WHERE likes <> (SELECT COUNT(*) FROM liked_comments lc WHERE lc.comment_id = comments.id)",
        [],
    )?;
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::db_operations::posts_db_operations;
    use crate::models::db_operations::posts_db_operations::test_support::*;

    fn post_with_author(conn: &mut Connection) -> (String, String) {
        let author = make_user(conn, "writer");
        let post = posts_db_operations::create_post(
            conn,
            &author,
            "a title",
            "long enough content here",
            &[],
            None,
            &[],
        )
        .unwrap();
        (post.id, author)
    }

    #[test]
    fn create_requires_existing_post_and_content() {
        let mut conn = test_conn();
        let (post_id, author) = post_with_author(&mut conn);

        assert!(matches!(
            create_comment(&conn, &post_id, &author, "   "),
            Err(DbError::Validation(_))
        ));
        assert!(matches!(
            create_comment(&conn, "no-such-post", &author, "hello"),
            Err(DbError::NotFound("Post"))
        ));
        let comment = create_comment(&conn, &post_id, &author, "  hello  ").unwrap();
        assert_eq!(comment.content, "hello");
    }

    #[test]
    fn comments_listed_oldest_first() {
        let mut conn = test_conn();
        let (post_id, author) = post_with_author(&mut conn);
        let first = create_comment(&conn, &post_id, &author, "first").unwrap();
        conn.execute(
            "UPDATE comments SET created_at = ?2 WHERE id = ?1",
            params![first.id, Utc::now() - chrono::Duration::minutes(5)],
        )
        .unwrap();
        create_comment(&conn, &post_id, &author, "second").unwrap();

        let all = comments_for_post(&conn, &post_id).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].content, "first");
        assert_eq!(all[1].content, "second");
    }

    #[test]
    fn delete_is_author_only() {
        let mut conn = test_conn();
        let (post_id, author) = post_with_author(&mut conn);
        let other = make_user(&mut conn, "other");
        let comment = create_comment(&conn, &post_id, &author, "mine").unwrap();

        assert!(matches!(
            delete_comment(&mut conn, &comment.id, &other),
            Err(DbError::Forbidden)
        ));
        delete_comment(&mut conn, &comment.id, &author).unwrap();
        assert!(comment_by_id(&conn, &comment.id).unwrap().is_none());
    }

    #[test]
    fn double_toggle_restores_state_and_counter() {
        let mut conn = test_conn();
        let (post_id, author) = post_with_author(&mut conn);
        let reader = make_user(&mut conn, "reader");
        let comment = create_comment(&conn, &post_id, &author, "likeable").unwrap();

        let (liked, likes) = toggle_like(&mut conn, &comment.id, &reader).unwrap();
        assert!(liked);
        assert_eq!(likes, 1);
        assert!(is_liked(&conn, &comment.id, &reader).unwrap());

        let (liked, likes) = toggle_like(&mut conn, &comment.id, &reader).unwrap();
        assert!(!liked);
        assert_eq!(likes, 0);
    }

    #[test]
    fn recount_repairs_comment_counter() {
        let mut conn = test_conn();
        let (post_id, author) = post_with_author(&mut conn);
        let comment = create_comment(&conn, &post_id, &author, "drifting").unwrap();
        toggle_like(&mut conn, &comment.id, &author).unwrap();

        conn.execute("UPDATE comments SET likes = 7 WHERE id = ?1", [&comment.id])
            .unwrap();
        assert_eq!(recount_comment_likes(&conn).unwrap(), 1);
        let likes: i64 = conn
            .query_row(
                "SELECT likes FROM comments WHERE id = ?1",
                [&comment.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(likes, 1);
    }
}
