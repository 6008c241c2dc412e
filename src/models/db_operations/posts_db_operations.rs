use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use super::DbError;
use crate::models::{Pagination, PostAuthor, PostPage, PostView, TagRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostSort {
    Newest,
    Oldest,
    Views,
    Likes,
}

impl PostSort {
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some("oldest") => PostSort::Oldest,
            Some("views") => PostSort::Views,
            Some("likes") => PostSort::Likes,
            _ => PostSort::Newest,
        }
    }

    fn order_clause(self) -> &'static str {
        match self {
            PostSort::Newest => "ORDER BY p.created_at DESC",
            PostSort::Oldest => "ORDER BY p.created_at ASC",
            PostSort::Views => "ORDER BY p.views DESC",
            PostSort::Likes => "ORDER BY p.likes DESC",
        }
    }
}

#[derive(Debug, Default)]
pub struct PostSearchParams {
    pub query: Option<String>,
    pub tag: Option<String>,
    pub author: Option<String>,
    pub sort: PostSort,
    pub page: u32,
    pub limit: u32,
}

impl Default for PostSort {
    fn default() -> Self {
        PostSort::Newest
    }
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct PostUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub is_published: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub images: Option<Vec<String>>,
}

fn validate_title(title: &str) -> Result<(), DbError> {
    if title.trim().chars().count() < 3 {
        return Err(DbError::Validation(
            "Post title must contain at least 3 characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_content(content: &str) -> Result<(), DbError> {
    if content.trim().chars().count() < 10 {
        return Err(DbError::Validation(
            "Post content must contain at least 10 characters".to_string(),
        ));
    }
    Ok(())
}

/// Builds the enriched view for one post: author and ordered tag list
/// resolved, inline image list attached.
pub fn read_post_view(conn: &Connection, post_id: &str) -> Result<Option<PostView>, DbError> {
    let base = conn
        .query_row(
            "SELECT p.id, p.title, p.content, p.author_id, u.username, p.likes, p.views,
                    p.is_published, p.image, p.created_at, p.updated_at
             FROM posts p JOIN users u ON u.id = p.author_id
             WHERE p.id = ?1",
            [post_id],
            |row| {
                Ok(PostView {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    content: row.get(2)?,
                    author: PostAuthor {
                        id: row.get(3)?,
                        username: row.get(4)?,
                    },
                    tags: Vec::new(),
                    likes: row.get(5)?,
                    views: row.get(6)?,
                    is_published: row.get(7)?,
                    image: row.get(8)?,
                    images: Vec::new(),
                    created_at: row.get(9)?,
                    updated_at: row.get(10)?,
                })
            },
        )
        .optional()?;

    let mut post = match base {
        Some(p) => p,
        None => return Ok(None),
    };

    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.slug FROM post_tags pt
         JOIN tags t ON t.id = pt.tag_id
         WHERE pt.post_id = ?1 ORDER BY pt.position",
    )?;
    let tags = stmt.query_map([post_id], |row| {
        Ok(TagRef {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
        })
    })?;
    post.tags = tags.collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn
        .prepare("SELECT path FROM post_images WHERE post_id = ?1 ORDER BY position")?;
    let images = stmt.query_map([post_id], |row| row.get::<_, String>(0))?;
    post.images = images.collect::<Result<Vec<_>, _>>()?;

    Ok(Some(post))
}

fn post_author(conn: &Connection, post_id: &str) -> Result<String, DbError> {
    conn.query_row(
        "SELECT author_id FROM posts WHERE id = ?1",
        [post_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(DbError::NotFound("Post"))
}

fn replace_post_tags(
    tx: &rusqlite::Transaction,
    post_id: &str,
    tag_ids: &[String],
) -> Result<(), DbError> {
    tx.execute("DELETE FROM post_tags WHERE post_id = ?1", [post_id])?;
    for (position, tag_id) in tag_ids.iter().enumerate() {
        tx.execute(
            "INSERT INTO post_tags (post_id, tag_id, position) VALUES (?1, ?2, ?3)",
            params![post_id, tag_id, position as i64],
        )?;
    }
    Ok(())
}

fn replace_post_images(
    tx: &rusqlite::Transaction,
    post_id: &str,
    images: &[String],
) -> Result<(), DbError> {
    tx.execute("DELETE FROM post_images WHERE post_id = ?1", [post_id])?;
    for (position, path) in images.iter().enumerate() {
        tx.execute(
            "INSERT INTO post_images (post_id, position, path) VALUES (?1, ?2, ?3)",
            params![post_id, position as i64, path],
        )?;
    }
    Ok(())
}

fn tag_exists(conn: &Connection, tag_id: &str) -> Result<bool, DbError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM tags WHERE id = ?1", [tag_id], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

/// Creates a post. Tag resolution, the usage-count increments and the post
/// insert all happen in one transaction: an unresolved tag id rolls
/// everything back with no partial counter drift.
pub fn create_post(
    conn: &mut Connection,
    author_id: &str,
    title: &str,
    content: &str,
    tag_ids: &[String],
    is_published: Option<bool>,
    images: &[String],
) -> Result<PostView, DbError> {
    validate_title(title)?;
    validate_content(content)?;

    let tx = conn.transaction()?;
    for tag_id in tag_ids {
        if !tag_exists(&tx, tag_id)? {
            return Err(DbError::NotFound("Tag"));
        }
        tx.execute(
            "UPDATE tags SET usage_count = usage_count + 1 WHERE id = ?1",
            [tag_id],
        )?;
    }

    let post_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    tx.execute(
        "INSERT INTO posts (id, title, content, author_id, likes, views, is_published, image, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, NULL, ?6, ?6)",
        params![post_id, title, content, author_id, is_published.unwrap_or(true), now],
    )?;
    replace_post_tags(&tx, &post_id, tag_ids)?;
    replace_post_images(&tx, &post_id, images)?;

    let view = read_post_view(&tx, &post_id)?.ok_or(DbError::NotFound("Post"))?;
    tx.commit()?;
    Ok(view)
}

/// Fetches one post and bumps its view counter. No transaction: a lost
/// increment under a read race is tolerated for view counts.
pub fn read_post(conn: &Connection, post_id: &str) -> Result<PostView, DbError> {
    let updated = conn.execute(
        "UPDATE posts SET views = views + 1 WHERE id = ?1",
        [post_id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound("Post"));
    }
    read_post_view(conn, post_id)?.ok_or(DbError::NotFound("Post"))
}

/// Author-only edit. The tag-count delta (increment newly attached tags,
/// decrement detached ones, floored at zero) and the post row update run in
/// one transaction; an unresolved new tag id aborts the whole edit.
pub fn update_post(
    conn: &mut Connection,
    post_id: &str,
    requester_id: &str,
    update: PostUpdate,
) -> Result<PostView, DbError> {
    if let Some(title) = &update.title {
        validate_title(title)?;
    }
    if let Some(content) = &update.content {
        validate_content(content)?;
    }

    let tx = conn.transaction()?;
    if post_author(&tx, post_id)? != requester_id {
        return Err(DbError::Forbidden);
    }

    if let Some(new_tags) = &update.tags {
        let mut stmt =
            tx.prepare("SELECT tag_id FROM post_tags WHERE post_id = ?1 ORDER BY position")?;
        let old_tags: Vec<String> = stmt
            .query_map([post_id], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        for tag_id in new_tags {
            if !tag_exists(&tx, tag_id)? {
                return Err(DbError::NotFound("Tag"));
            }
            if !old_tags.contains(tag_id) {
                tx.execute(
                    "UPDATE tags SET usage_count = usage_count + 1 WHERE id = ?1",
                    [tag_id],
                )?;
            }
        }
        for old_tag in &old_tags {
            if !new_tags.contains(old_tag) {
                tx.execute(
                    "UPDATE tags SET usage_count = MAX(usage_count - 1, 0) WHERE id = ?1",
                    [old_tag],
                )?;
            }
        }
        replace_post_tags(&tx, post_id, new_tags)?;
    }

    if let Some(images) = &update.images {
        replace_post_images(&tx, post_id, images)?;
    }

    tx.execute(
        "UPDATE posts SET
            title = COALESCE(?2, title),
            content = COALESCE(?3, content),
            is_published = COALESCE(?4, is_published),
            updated_at = ?5
         WHERE id = ?1",
        params![post_id, update.title, update.content, update.is_published, Utc::now()],
    )?;

    let view = read_post_view(&tx, post_id)?.ok_or(DbError::NotFound("Post"))?;
    tx.commit()?;
    Ok(view)
}

/// Author-only delete. One atomic unit: the post, its comments (and their
/// like relations), its tag attachments (with usage-count decrements), its
/// inline images, and its id in every user's liked/favourite set all go
/// together, or none of them do.
pub fn delete_post(conn: &mut Connection, post_id: &str, requester_id: &str) -> Result<(), DbError> {
    let tx = conn.transaction()?;
    if post_author(&tx, post_id)? != requester_id {
        return Err(DbError::Forbidden);
    }

    tx.execute(
        "DELETE FROM liked_comments WHERE comment_id IN
            (SELECT id FROM comments WHERE post_id = ?1)",
        [post_id],
    )?;
    tx.execute("DELETE FROM comments WHERE post_id = ?1", [post_id])?;
    tx.execute(
        "UPDATE tags SET usage_count = MAX(usage_count - 1, 0)
         WHERE id IN (SELECT tag_id FROM post_tags WHERE post_id = ?1)",
        [post_id],
    )?;
    tx.execute("DELETE FROM post_tags WHERE post_id = ?1", [post_id])?;
    tx.execute("DELETE FROM post_images WHERE post_id = ?1", [post_id])?;
    tx.execute("DELETE FROM liked_posts WHERE post_id = ?1", [post_id])?;
    tx.execute("DELETE FROM favourite_posts WHERE post_id = ?1", [post_id])?;
    tx.execute("DELETE FROM posts WHERE id = ?1", [post_id])?;

    tx.commit()?;
    Ok(())
}

/// Like toggle. Membership in the user's liked-set decides the direction;
/// the set change and the derived counter move in the same transaction.
pub fn toggle_like(
    conn: &mut Connection,
    post_id: &str,
    user_id: &str,
) -> Result<(bool, i64), DbError> {
    let tx = conn.transaction()?;
    post_author(&tx, post_id)?; // existence check

    let already: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM liked_posts WHERE user_id = ?1 AND post_id = ?2",
            params![user_id, post_id],
            |row| row.get(0),
        )
        .optional()?;

    let liked = if already.is_none() {
        tx.execute(
            "INSERT INTO liked_posts (user_id, post_id) VALUES (?1, ?2)",
            params![user_id, post_id],
        )?;
        tx.execute(
            "UPDATE posts SET likes = likes + 1 WHERE id = ?1",
            [post_id],
        )?;
        true
    } else {
        tx.execute(
            "DELETE FROM liked_posts WHERE user_id = ?1 AND post_id = ?2",
            params![user_id, post_id],
        )?;
        tx.execute(
            "UPDATE posts SET likes = MAX(likes - 1, 0) WHERE id = ?1",
            [post_id],
        )?;
        false
    };

    let likes: i64 = tx.query_row("SELECT likes FROM posts WHERE id = ?1", [post_id], |row| {
        row.get(0)
    })?;
    tx.commit()?;
    Ok((liked, likes))
}

/// Favourite toggle: set membership only, no counter on the post.
pub fn toggle_favourite(
    conn: &mut Connection,
    post_id: &str,
    user_id: &str,
) -> Result<bool, DbError> {
    let tx = conn.transaction()?;
    post_author(&tx, post_id)?;

    let already: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM favourite_posts WHERE user_id = ?1 AND post_id = ?2",
            params![user_id, post_id],
            |row| row.get(0),
        )
        .optional()?;

    let in_favourite = if already.is_none() {
        tx.execute(
            "INSERT INTO favourite_posts (user_id, post_id) VALUES (?1, ?2)",
            params![user_id, post_id],
        )?;
        true
    } else {
        tx.execute(
            "DELETE FROM favourite_posts WHERE user_id = ?1 AND post_id = ?2",
            params![user_id, post_id],
        )?;
        false
    };
    tx.commit()?;
    Ok(in_favourite)
}

pub fn is_liked(conn: &Connection, post_id: &str, user_id: &str) -> Result<bool, DbError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM liked_posts WHERE user_id = ?1 AND post_id = ?2",
            params![user_id, post_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn is_favourite(conn: &Connection, post_id: &str, user_id: &str) -> Result<bool, DbError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM favourite_posts WHERE user_id = ?1 AND post_id = ?2",
            params![user_id, post_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn views_for_ids(conn: &Connection, ids: Vec<String>) -> Result<Vec<PostView>, DbError> {
    let mut posts = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(view) = read_post_view(conn, &id)? {
            posts.push(view);
        }
    }
    Ok(posts)
}

/// All posts, newest first.
pub fn list_posts(conn: &Connection) -> Result<Vec<PostView>, DbError> {
    let mut stmt = conn.prepare("SELECT id FROM posts ORDER BY created_at DESC")?;
    let ids: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<_, _>>()?;
    views_for_ids(conn, ids)
}

pub fn posts_by_author(conn: &Connection, author_id: &str) -> Result<Vec<PostView>, DbError> {
    let mut stmt =
        conn.prepare("SELECT id FROM posts WHERE author_id = ?1 ORDER BY created_at DESC")?;
    let ids: Vec<String> = stmt
        .query_map([author_id], |row| row.get(0))?
        .collect::<Result<_, _>>()?;
    views_for_ids(conn, ids)
}

/// Published posts carrying the given tag, newest first.
pub fn posts_by_tag(conn: &Connection, tag_id: &str) -> Result<Vec<PostView>, DbError> {
    if !tag_exists(conn, tag_id)? {
        return Err(DbError::NotFound("Tag"));
    }
    let mut stmt = conn.prepare(
        "SELECT p.id FROM posts p
         JOIN post_tags pt ON pt.post_id = p.id
         WHERE pt.tag_id = ?1 AND p.is_published = 1
         ORDER BY p.created_at DESC",
    )?;
    let ids: Vec<String> = stmt
        .query_map([tag_id], |row| row.get(0))?
        .collect::<Result<_, _>>()?;
    views_for_ids(conn, ids)
}

pub fn favourite_posts(conn: &Connection, user_id: &str) -> Result<Vec<PostView>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT p.id FROM posts p
         JOIN favourite_posts f ON f.post_id = p.id
         WHERE f.user_id = ?1
         ORDER BY p.created_at DESC",
    )?;
    let ids: Vec<String> = stmt
        .query_map([user_id], |row| row.get(0))?
        .collect::<Result<_, _>>()?;
    views_for_ids(conn, ids)
}

/// Offset-paginated search over published posts. The text filter is a
/// case-insensitive substring match against title or content.
pub fn search_posts(conn: &Connection, search: &PostSearchParams) -> Result<PostPage, DbError> {
    let page = search.page.max(1);
    let limit = search.limit.clamp(1, 100);

    let mut where_sql = String::from("WHERE p.is_published = 1");
    let mut bind: Vec<Value> = Vec::new();

    if let Some(query) = search.query.as_deref().filter(|q| !q.is_empty()) {
        where_sql.push_str(
            " AND (LOWER(p.title) LIKE '%' || LOWER(?) || '%'
               OR LOWER(p.content) LIKE '%' || LOWER(?) || '%')",
        );
        bind.push(Value::from(query.to_string()));
        bind.push(Value::from(query.to_string()));
    }
    if let Some(tag) = search.tag.as_deref().filter(|t| !t.is_empty()) {
        where_sql
            .push_str(" AND EXISTS (SELECT 1 FROM post_tags pt WHERE pt.post_id = p.id AND pt.tag_id = ?)");
        bind.push(Value::from(tag.to_string()));
    }
    if let Some(author) = search.author.as_deref().filter(|a| !a.is_empty()) {
        where_sql.push_str(" AND p.author_id = ?");
        bind.push(Value::from(author.to_string()));
    }

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM posts p {}", where_sql),
        params_from_iter(bind.iter()),
        |row| row.get(0),
    )?;

    let sql = format!(
        "SELECT p.id FROM posts p {} {} LIMIT ? OFFSET ?",
        where_sql,
        search.sort.order_clause()
    );
    bind.push(Value::from(limit as i64));
    bind.push(Value::from((page as i64 - 1) * limit as i64));

    let mut stmt = conn.prepare(&sql)?;
    let ids: Vec<String> = stmt
        .query_map(params_from_iter(bind.iter()), |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    Ok(PostPage {
        posts: views_for_ids(conn, ids)?,
        pagination: Pagination {
            total,
            page,
            limit,
            pages: (total + limit as i64 - 1) / limit as i64,
        },
    })
}

/// Swaps the post's main image, returning the previous path so the caller
/// can clean the old file up best-effort.
pub fn set_main_image(
    conn: &Connection,
    post_id: &str,
    requester_id: &str,
    image_path: &str,
) -> Result<Option<String>, DbError> {
    if post_author(conn, post_id)? != requester_id {
        return Err(DbError::Forbidden);
    }
    let old: Option<String> =
        conn.query_row("SELECT image FROM posts WHERE id = ?1", [post_id], |row| {
            row.get(0)
        })?;
    conn.execute(
        "UPDATE posts SET image = ?2, updated_at = ?3 WHERE id = ?1",
        params![post_id, image_path, Utc::now()],
    )?;
    Ok(old)
}

/// Repair routine: recomputes every post's like counter from the
/// liked-sets, returning how many rows drifted.
pub fn recount_post_likes(conn: &Connection) -> Result<usize, DbError> {
    let changed = conn.execute(
        "UPDATE posts SET likes =
            (SELECT COUNT(*) FROM liked_posts lp WHERE lp.post_id = posts.id)
         WHERE likes <> (SELECT COUNT(*) FROM liked_posts lp WHERE lp.post_id = posts.id)",
        [],
    )?;
    Ok(changed)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::models::db_operations::{tags_db_operations, users_db_operations};
    use crate::setup::db_setup;

    pub fn test_conn() -> Connection {
        let mut conn = Connection::open_in_memory().expect("in-memory db");
        db_setup::setup_blog_db(&mut conn).expect("schema");
        conn
    }

    pub fn make_user(conn: &mut Connection, login: &str) -> String {
        let user = users_db_operations::create_user(
            conn,
            &users_db_operations::NewUser {
                login: login.to_string(),
                email: format!("{}@example.com", login),
                username: login.to_string(),
                password: "hunter2-with-a-digit-2".to_string(),
                description: String::new(),
            },
        )
        .expect("create user");
        user.id
    }

    pub fn make_tag(conn: &Connection, name: &str) -> String {
        tags_db_operations::create_tag(conn, name, "").expect("create tag").id
    }

    pub fn usage_count(conn: &Connection, tag_id: &str) -> i64 {
        conn.query_row(
            "SELECT usage_count FROM tags WHERE id = ?1",
            [tag_id],
            |row| row.get(0),
        )
        .expect("usage count")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::models::db_operations::comments_db_operations;

    fn make_post(conn: &mut Connection, author: &str, title: &str, tags: &[String]) -> String {
        create_post(conn, author, title, "long enough content here", tags, None, &[])
            .expect("create post")
            .id
    }

    #[test]
    fn create_rejects_short_title_and_content() {
        let mut conn = test_conn();
        let author = make_user(&mut conn, "writer");
        let err = create_post(&mut conn, &author, "ab", "long enough content", &[], None, &[]);
        assert!(matches!(err, Err(DbError::Validation(_))));
        let err = create_post(&mut conn, &author, "a title", "short", &[], None, &[]);
        assert!(matches!(err, Err(DbError::Validation(_))));
    }

    #[test]
    fn length_limits_count_characters_not_bytes() {
        let mut conn = test_conn();
        let author = make_user(&mut conn, "writer");
        // Two Cyrillic letters are four bytes but still only two characters.
        let err = create_post(&mut conn, &author, "аб", "достаточно длинный текст", &[], None, &[]);
        assert!(matches!(err, Err(DbError::Validation(_))));
        let post = create_post(
            &mut conn,
            &author,
            "абв",
            "достаточно длинный текст",
            &[],
            None,
            &[],
        )
        .unwrap();
        assert_eq!(post.title, "абв");
    }

    #[test]
    fn create_with_unknown_tag_rolls_back_counts() {
        let mut conn = test_conn();
        let author = make_user(&mut conn, "writer");
        let tag = make_tag(&conn, "Rust");
        let result = create_post(
            &mut conn,
            &author,
            "a title",
            "long enough content here",
            &[tag.clone(), "missing-tag-id".to_string()],
            None,
            &[],
        );
        assert!(matches!(result, Err(DbError::NotFound("Tag"))));
        // The increment applied to the first tag must have been rolled back.
        assert_eq!(usage_count(&conn, &tag), 0);
        let posts: i64 = conn
            .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(posts, 0);
    }

    #[test]
    fn read_increments_views() {
        let mut conn = test_conn();
        let author = make_user(&mut conn, "writer");
        let post_id = make_post(&mut conn, &author, "a title", &[]);
        assert_eq!(read_post(&conn, &post_id).unwrap().views, 1);
        assert_eq!(read_post(&conn, &post_id).unwrap().views, 2);
    }

    #[test]
    fn update_applies_tag_count_delta() {
        let mut conn = test_conn();
        let author = make_user(&mut conn, "writer");
        let tag_a = make_tag(&conn, "alpha");
        let tag_b = make_tag(&conn, "beta");
        let tag_c = make_tag(&conn, "gamma");
        let post_id = make_post(&mut conn, &author, "a title", &[tag_a.clone(), tag_b.clone()]);

        // {A, B} -> {B, C}: A down one, C up one, B unchanged.
        update_post(
            &mut conn,
            &post_id,
            &author,
            PostUpdate {
                tags: Some(vec![tag_b.clone(), tag_c.clone()]),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(usage_count(&conn, &tag_a), 0);
        assert_eq!(usage_count(&conn, &tag_b), 1);
        assert_eq!(usage_count(&conn, &tag_c), 1);
    }

    #[test]
    fn update_with_unknown_tag_leaves_no_side_effects() {
        let mut conn = test_conn();
        let author = make_user(&mut conn, "writer");
        let tag_a = make_tag(&conn, "alpha");
        let post_id = make_post(&mut conn, &author, "a title", &[tag_a.clone()]);

        let result = update_post(
            &mut conn,
            &post_id,
            &author,
            PostUpdate {
                title: Some("changed title".to_string()),
                tags: Some(vec!["missing".to_string()]),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(DbError::NotFound("Tag"))));
        let view = read_post_view(&conn, &post_id).unwrap().unwrap();
        assert_eq!(view.title, "a title");
        assert_eq!(view.tags.len(), 1);
        assert_eq!(usage_count(&conn, &tag_a), 1);
    }

    #[test]
    fn update_rejects_non_author() {
        let mut conn = test_conn();
        let author = make_user(&mut conn, "writer");
        let other = make_user(&mut conn, "intruder");
        let post_id = make_post(&mut conn, &author, "a title", &[]);
        let result = update_post(
            &mut conn,
            &post_id,
            &other,
            PostUpdate {
                title: Some("hijacked".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(DbError::Forbidden)));
    }

    #[test]
    fn delete_cascades_comments_and_relation_sets() {
        let mut conn = test_conn();
        let author = make_user(&mut conn, "writer");
        let reader = make_user(&mut conn, "reader");
        let tag = make_tag(&conn, "alpha");
        let post_id = make_post(&mut conn, &author, "a title", &[tag.clone()]);

        let comment =
            comments_db_operations::create_comment(&conn, &post_id, &reader, "nice post").unwrap();
        comments_db_operations::toggle_like(&mut conn, &comment.id, &author).unwrap();
        toggle_like(&mut conn, &post_id, &reader).unwrap();
        toggle_favourite(&mut conn, &post_id, &reader).unwrap();

        delete_post(&mut conn, &post_id, &author).unwrap();

        for (sql, expect) in [
            ("SELECT COUNT(*) FROM posts", 0i64),
            ("SELECT COUNT(*) FROM comments", 0),
            ("SELECT COUNT(*) FROM liked_posts", 0),
            ("SELECT COUNT(*) FROM favourite_posts", 0),
            ("SELECT COUNT(*) FROM liked_comments", 0),
            ("SELECT COUNT(*) FROM post_tags", 0),
        ] {
            let count: i64 = conn.query_row(sql, [], |row| row.get(0)).unwrap();
            assert_eq!(count, expect, "{}", sql);
        }
        assert_eq!(usage_count(&conn, &tag), 0);
    }

    #[test]
    fn delete_rejects_non_author_and_leaves_everything() {
        let mut conn = test_conn();
        let author = make_user(&mut conn, "writer");
        let other = make_user(&mut conn, "intruder");
        let post_id = make_post(&mut conn, &author, "a title", &[]);

        assert!(matches!(
            delete_post(&mut conn, &post_id, &other),
            Err(DbError::Forbidden)
        ));
        assert!(read_post_view(&conn, &post_id).unwrap().is_some());
    }

    #[test]
    fn double_toggle_restores_like_state() {
        let mut conn = test_conn();
        let author = make_user(&mut conn, "writer");
        let reader = make_user(&mut conn, "reader");
        let post_id = make_post(&mut conn, &author, "a title", &[]);

        let (liked, likes) = toggle_like(&mut conn, &post_id, &reader).unwrap();
        assert!(liked);
        assert_eq!(likes, 1);
        assert!(is_liked(&conn, &post_id, &reader).unwrap());

        let (liked, likes) = toggle_like(&mut conn, &post_id, &reader).unwrap();
        assert!(!liked);
        assert_eq!(likes, 0);
        assert!(!is_liked(&conn, &post_id, &reader).unwrap());
    }

    #[test]
    fn like_counter_matches_liked_sets() {
        let mut conn = test_conn();
        let author = make_user(&mut conn, "writer");
        let a = make_user(&mut conn, "alpha");
        let b = make_user(&mut conn, "beta");
        let post_id = make_post(&mut conn, &author, "a title", &[]);

        toggle_like(&mut conn, &post_id, &a).unwrap();
        toggle_like(&mut conn, &post_id, &b).unwrap();
        toggle_like(&mut conn, &post_id, &a).unwrap();

        let likes: i64 = conn
            .query_row("SELECT likes FROM posts WHERE id = ?1", [&post_id], |row| {
                row.get(0)
            })
            .unwrap();
        let set_size: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM liked_posts WHERE post_id = ?1",
                [&post_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(likes, set_size);
        assert_eq!(likes, 1);
    }

    #[test]
    fn recount_repairs_drifted_counter() {
        let mut conn = test_conn();
        let author = make_user(&mut conn, "writer");
        let reader = make_user(&mut conn, "reader");
        let post_id = make_post(&mut conn, &author, "a title", &[]);
        toggle_like(&mut conn, &post_id, &reader).unwrap();

        conn.execute("UPDATE posts SET likes = 41 WHERE id = ?1", [&post_id])
            .unwrap();
        assert_eq!(recount_post_likes(&conn).unwrap(), 1);
        let likes: i64 = conn
            .query_row("SELECT likes FROM posts WHERE id = ?1", [&post_id], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(likes, 1);
    }

    #[test]
    fn search_pagination_and_oldest_sort() {
        let mut conn = test_conn();
        let author = make_user(&mut conn, "writer");
        let tag = make_tag(&conn, "paged");
        let mut ids = Vec::new();
        for i in 0..12 {
            let id = make_post(&mut conn, &author, &format!("post number {:02}", i), &[tag.clone()]);
            // Spread creation times so ordering is deterministic.
            conn.execute(
                "UPDATE posts SET created_at = ?2 WHERE id = ?1",
                params![
                    id,
                    Utc::now() - chrono::Duration::minutes(60 - i as i64)
                ],
            )
            .unwrap();
            ids.push(id);
        }

        let page = search_posts(
            &conn,
            &PostSearchParams {
                tag: Some(tag),
                sort: PostSort::Oldest,
                page: 2,
                limit: 5,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(page.pagination.total, 12);
        assert_eq!(page.pagination.pages, 3);
        assert_eq!(page.posts.len(), 5);
        // Page 2 of 5-per-page oldest-first holds the 6th..10th oldest.
        let titles: Vec<&str> = page.posts.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "post number 05",
                "post number 06",
                "post number 07",
                "post number 08",
                "post number 09"
            ]
        );
    }

    #[test]
    fn search_tolerates_huge_page_numbers() {
        let mut conn = test_conn();
        let author = make_user(&mut conn, "writer");
        make_post(&mut conn, &author, "a title", &[]);

        let page = search_posts(
            &conn,
            &PostSearchParams {
                page: u32::MAX,
                limit: 100,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(page.pagination.total, 1);
        assert!(page.posts.is_empty());
    }

    #[test]
    fn search_excludes_unpublished_and_matches_text() {
        let mut conn = test_conn();
        let author = make_user(&mut conn, "writer");
        make_post(&mut conn, &author, "Rust borrow checker", &[]);
        create_post(
            &mut conn,
            &author,
            "Hidden draft about rust",
            "long enough content here",
            &[],
            Some(false),
            &[],
        )
        .unwrap();

        let page = search_posts(
            &conn,
            &PostSearchParams {
                query: Some("RUST".to_string()),
                page: 1,
                limit: 10,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.posts[0].title, "Rust borrow checker");
    }
}
