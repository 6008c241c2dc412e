use chrono::Utc;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::OnceLock;
use uuid::Uuid;

use super::DbError;
use crate::models::Tag;

/// Derives the URL-safe lookup key for a tag name: lowercase, whitespace
/// runs become single hyphens, anything outside `[a-z0-9_-]` is stripped,
/// repeated and leading/trailing hyphens are removed.
pub fn slugify(name: &str) -> String {
    static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();
    static NON_SLUG_RE: OnceLock<Regex> = OnceLock::new();
    static HYPHEN_RUN_RE: OnceLock<Regex> = OnceLock::new();

    let whitespace = WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"));
    let non_slug = NON_SLUG_RE.get_or_init(|| Regex::new(r"[^\w-]+").expect("static regex"));
    let hyphen_run = HYPHEN_RUN_RE.get_or_init(|| Regex::new(r"-{2,}").expect("static regex"));

    let lowered = name.trim().to_lowercase();
    let hyphenated = whitespace.replace_all(&lowered, "-");
    let stripped = non_slug.replace_all(&hyphenated, "");
    let collapsed = hyphen_run.replace_all(&stripped, "-");
    collapsed.trim_matches('-').to_string()
}

fn tag_from_row(row: &Row) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        description: row.get(3)?,
        usage_count: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const TAG_COLUMNS: &str = "id, name, slug, description, usage_count, created_at, updated_at";

fn validate_name(name: &str) -> Result<(), DbError> {
    if name.trim().chars().count() < 2 {
        return Err(DbError::Validation(
            "Tag name must contain at least 2 characters".to_string(),
        ));
    }
    Ok(())
}

pub fn create_tag(conn: &Connection, name: &str, description: &str) -> Result<Tag, DbError> {
    validate_name(name)?;
    let slug = slugify(name);
    if slug.is_empty() {
        return Err(DbError::Validation(
            "Tag name must contain at least one letter or digit".to_string(),
        ));
    }

    let taken: Option<String> = conn
        .query_row("SELECT id FROM tags WHERE slug = ?1", [&slug], |row| {
            row.get(0)
        })
        .optional()?;
    if taken.is_some() {
        return Err(DbError::Conflict(
            "A tag with this name already exists".to_string(),
        ));
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    conn.execute(
        "INSERT INTO tags (id, name, slug, description, usage_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
        params![id, name.trim(), slug, description, now],
    )?;
    tag_by_id(conn, &id)?.ok_or(DbError::NotFound("Tag"))
}

pub fn all_tags(conn: &Connection) -> Result<Vec<Tag>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM tags ORDER BY usage_count DESC",
        TAG_COLUMNS
    ))?;
    let tags = stmt.query_map([], tag_from_row)?;
    Ok(tags.collect::<Result<Vec<_>, _>>()?)
}

pub fn tag_by_id(conn: &Connection, id: &str) -> Result<Option<Tag>, DbError> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM tags WHERE id = ?1", TAG_COLUMNS),
            [id],
            tag_from_row,
        )
        .optional()?)
}

pub fn tag_by_slug(conn: &Connection, slug: &str) -> Result<Option<Tag>, DbError> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM tags WHERE slug = ?1", TAG_COLUMNS),
            [slug],
            tag_from_row,
        )
        .optional()?)
}

/// Rename (plus description update). A rename regenerates the slug and is
/// rejected with a conflict when another tag already owns it; the usage
/// counter is never touched here.
pub fn update_tag(
    conn: &Connection,
    id: &str,
    name: &str,
    description: Option<&str>,
) -> Result<Tag, DbError> {
    validate_name(name)?;
    let current = tag_by_id(conn, id)?.ok_or(DbError::NotFound("Tag"))?;

    if current.name != name.trim() {
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(DbError::Validation(
                "Tag name must contain at least one letter or digit".to_string(),
            ));
        }
        let taken: Option<String> = conn
            .query_row(
                "SELECT id FROM tags WHERE slug = ?1 AND id <> ?2",
                params![slug, id],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(DbError::Conflict(
                "A tag with this name already exists".to_string(),
            ));
        }
        conn.execute(
            "UPDATE tags SET name = ?2, slug = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, name.trim(), slug, Utc::now()],
        )?;
    }

    if let Some(description) = description {
        conn.execute(
            "UPDATE tags SET description = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, description, Utc::now()],
        )?;
    }

    tag_by_id(conn, id)?.ok_or(DbError::NotFound("Tag"))
}

/// Deletes the tag and cascade-cleans its attachments so posts never keep
/// dangling tag references.
pub fn delete_tag(conn: &mut Connection, id: &str) -> Result<(), DbError> {
    let tx = conn.transaction()?;
    // Attachments reference the tag row, so they must go first.
    tx.execute("DELETE FROM post_tags WHERE tag_id = ?1", [id])?;
    let deleted = tx.execute("DELETE FROM tags WHERE id = ?1", [id])?;
    if deleted == 0 {
        return Err(DbError::NotFound("Tag"));
    }
    tx.commit()?;
    Ok(())
}

/// Repair routine: recomputes every tag's usage counter from the actual
/// attachments.
pub fn recount_tag_usage(conn: &Connection) -> Result<usize, DbError> {
    let changed = conn.execute(
        "UPDATE tags SET usage_count =
            (SELECT COUNT(*) FROM post_tags pt WHERE pt.tag_id = tags.id)
         WHERE usage_count <> (SELECT COUNT(*) FROM post_tags pt WHERE pt.tag_id = tags.id)",
        [],
    )?;
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::db_operations::posts_db_operations::test_support::*;
    use crate::models::db_operations::posts_db_operations;

    #[test]
    fn slugify_normalizes_names() {
        assert_eq!(slugify("New Name!!"), "new-name");
        assert_eq!(slugify("  Rust   Async  "), "rust-async");
        assert_eq!(slugify("--C++--"), "c");
        assert_eq!(slugify("a - b"), "a-b");
    }

    #[test]
    fn create_rejects_slug_collision() {
        let conn = test_conn();
        create_tag(&conn, "New Name", "").unwrap();
        let err = create_tag(&conn, "new name!!", "");
        assert!(matches!(err, Err(DbError::Conflict(_))));
    }

    #[test]
    fn rename_regenerates_slug_and_checks_collision() {
        let conn = test_conn();
        let tag = create_tag(&conn, "Old Name", "").unwrap();
        create_tag(&conn, "Taken", "").unwrap();

        let renamed = update_tag(&conn, &tag.id, "New Name!!", None).unwrap();
        assert_eq!(renamed.slug, "new-name");
        assert_eq!(renamed.usage_count, 0);

        let err = update_tag(&conn, &tag.id, "Taken!", None);
        assert!(matches!(err, Err(DbError::Conflict(_))));
    }

    #[test]
    fn rename_to_same_name_is_noop() {
        let conn = test_conn();
        let tag = create_tag(&conn, "Stable", "").unwrap();
        let after = update_tag(&conn, &tag.id, "Stable", None).unwrap();
        assert_eq!(after.slug, tag.slug);
        assert_eq!(after.updated_at, tag.updated_at);
    }

    #[test]
    fn delete_cascades_post_attachments() {
        let mut conn = test_conn();
        let author = make_user(&mut conn, "writer");
        let tag = make_tag(&conn, "doomed");
        posts_db_operations::create_post(
            &mut conn,
            &author,
            "a title",
            "long enough content here",
            &[tag.clone()],
            None,
            &[],
        )
        .unwrap();

        delete_tag(&mut conn, &tag).unwrap();
        let attachments: i64 = conn
            .query_row("SELECT COUNT(*) FROM post_tags", [], |row| row.get(0))
            .unwrap();
        assert_eq!(attachments, 0);
        assert!(tag_by_id(&conn, &tag).unwrap().is_none());
        // The post itself is untouched.
        let posts: i64 = conn
            .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(posts, 1);
        assert!(matches!(
            delete_tag(&mut conn, &tag),
            Err(DbError::NotFound("Tag"))
        ));
    }

    #[test]
    fn recount_fixes_drifted_usage() {
        let mut conn = test_conn();
        let author = make_user(&mut conn, "writer");
        let tag = make_tag(&conn, "drifty");
        posts_db_operations::create_post(
            &mut conn,
            &author,
            "a title",
            "long enough content here",
            &[tag.clone()],
            None,
            &[],
        )
        .unwrap();

        conn.execute("UPDATE tags SET usage_count = 9 WHERE id = ?1", [&tag])
            .unwrap();
        assert_eq!(recount_tag_usage(&conn).unwrap(), 1);
        assert_eq!(usage_count(&conn, &tag), 1);
    }
}
