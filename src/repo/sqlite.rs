use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use super::*;
use crate::vote::{reconcile, Transition, VoteAction};

const POST_SELECT: &str = r#"
    SELECT p.id, p.title, p.content, p.community, p.author, p.votes, p.created_at,
           (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comments
    FROM posts p
"#;

const COMMENT_SELECT: &str = "SELECT id, post_id, parent_id, content, author, votes, created_at FROM comments";

const COMMUNITY_SELECT: &str = r#"
    SELECT c.name, c.description, c.created_at,
           (SELECT COUNT(*) FROM posts p WHERE p.community = c.name) AS post_count
    FROM communities c
"#;

#[derive(Debug, Clone, Copy)]
enum Target {
    Post,
    Comment,
}

impl Target {
    fn table(self) -> &'static str {
        match self {
            Target::Post => "posts",
            Target::Comment => "comments",
        }
    }

    fn vote_column(self) -> &'static str {
        match self {
            Target::Post => "post_id",
            Target::Comment => "comment_id",
        }
    }
}

/// `%q%` with LIKE wildcards in `q` escaped by `\`.
fn like_pattern(q: &str) -> String {
    let escaped = q.replace('\\', r"\\").replace('%', r"\%").replace('_', r"\_");
    format!("%{escaped}%")
}

/// Every connection to `:memory:` is its own database, so an in-memory pool
/// holds exactly one connection and never retires it.
fn pool_options(in_memory: bool) -> SqlitePoolOptions {
    if in_memory {
        SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    }
}

#[derive(Clone)]
pub struct SqliteRepo {
    pool: SqlitePool,
}

impl SqliteRepo {
    pub fn new(pool: SqlitePool) -> Self { Self { pool } }

    /// Open (creating if needed) the database at `db_url` and run the embedded migrations.
    pub async fn connect(db_url: &str) -> anyhow::Result<Self> {
        let in_memory = db_url.contains(":memory:");
        if !in_memory {
            let path = Path::new(db_url.trim_start_matches("sqlite://").trim_start_matches("sqlite:"));
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        let mut options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }
        let pool = pool_options(in_memory).connect_with(options).await?;
        let repo = Self::new(pool);
        repo.migrate().await?;
        info!(db_url, "sqlite repository ready");
        Ok(repo)
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool { &self.pool }

    async fn post_in(tx: &mut Transaction<'_, Sqlite>, id: &str) -> RepoResult<Post> {
        let post = sqlx::query_as::<_, Post>(&format!("{POST_SELECT} WHERE p.id = ?"))
            .bind(id)
            .fetch_one(&mut **tx)
            .await?;
        Ok(post)
    }

    /// Takes the write lock on the target row and reports whether it exists.
    async fn lock_target(tx: &mut Transaction<'_, Sqlite>, target: Target, id: &str) -> RepoResult<()> {
        let touched = sqlx::query(&format!("UPDATE {} SET votes = votes WHERE id = ?", target.table()))
            .bind(id)
            .execute(&mut **tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    /// Reconcile the voter's row for `target` and move the target's counter by the delta.
    async fn apply_vote(
        tx: &mut Transaction<'_, Sqlite>,
        target: Target,
        target_id: &str,
        user_id: &str,
        requested: VoteType,
    ) -> RepoResult<Transition> {
        let col = target.vote_column();
        let existing = sqlx::query_scalar::<_, String>(&format!(
            "SELECT vote_type FROM votes WHERE user_id = ? AND {col} = ?"
        ))
        .bind(user_id)
        .bind(target_id)
        .fetch_optional(&mut **tx)
        .await?
        .map(|v| v.parse::<VoteType>())
        .transpose()
        .map_err(|e| RepoError::Persistence(e.to_string()))?;

        let t = reconcile(existing, requested);
        match t.action {
            VoteAction::Insert(v) => {
                sqlx::query(&format!("INSERT INTO votes (user_id, {col}, vote_type) VALUES (?, ?, ?)"))
                    .bind(user_id)
                    .bind(target_id)
                    .bind(v.as_str())
                    .execute(&mut **tx)
                    .await?;
            }
            VoteAction::Delete => {
                sqlx::query(&format!("DELETE FROM votes WHERE user_id = ? AND {col} = ?"))
                    .bind(user_id)
                    .bind(target_id)
                    .execute(&mut **tx)
                    .await?;
            }
            VoteAction::Update(v) => {
                sqlx::query(&format!("UPDATE votes SET vote_type = ? WHERE user_id = ? AND {col} = ?"))
                    .bind(v.as_str())
                    .bind(user_id)
                    .bind(target_id)
                    .execute(&mut **tx)
                    .await?;
            }
        }
        sqlx::query(&format!("UPDATE {} SET votes = votes + ? WHERE id = ?", target.table()))
            .bind(t.delta)
            .bind(target_id)
            .execute(&mut **tx)
            .await?;
        debug!(user_id, target_id, ?existing, ?requested, delta = t.delta, "vote applied");
        Ok(t)
    }

    async fn require_post(&self, id: &str) -> RepoResult<()> {
        sqlx::query_scalar::<_, String>("SELECT id FROM posts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|_| ())
            .ok_or(RepoError::NotFound)
    }

    async fn require_community(&self, name: &str) -> RepoResult<()> {
        sqlx::query_scalar::<_, String>("SELECT name FROM communities WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .map(|_| ())
            .ok_or(RepoError::NotFound)
    }
}

#[async_trait]
impl CommunityRepo for SqliteRepo {
    async fn list_communities(&self) -> RepoResult<Vec<Community>> {
        let recs = sqlx::query_as::<_, Community>(&format!("{COMMUNITY_SELECT} ORDER BY c.name ASC"))
            .fetch_all(&self.pool)
            .await?;
        Ok(recs)
    }

    async fn get_community(&self, name: &str) -> RepoResult<Community> {
        let rec = sqlx::query_as::<_, Community>(&format!("{COMMUNITY_SELECT} WHERE c.name = ?"))
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(rec)
    }

    async fn create_community(&self, new: CommunityDraft) -> RepoResult<Community> {
        let rec = sqlx::query_as::<_, Community>(
            "INSERT INTO communities (name, description, created_at) VALUES (?, ?, ?) RETURNING name, description, created_at, 0 AS post_count",
        )
        .bind(&new.name)
        .bind(&new.description)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(rec)
    }
}

#[async_trait]
impl PostRepo for SqliteRepo {
    async fn list_all_posts(&self) -> RepoResult<Vec<Post>> {
        let recs = sqlx::query_as::<_, Post>(&format!("{POST_SELECT} ORDER BY p.created_at DESC, p.rowid DESC"))
            .fetch_all(&self.pool)
            .await?;
        Ok(recs)
    }

    async fn list_posts(&self, community: &str) -> RepoResult<Vec<Post>> {
        self.require_community(community).await?;
        let recs = sqlx::query_as::<_, Post>(&format!(
            "{POST_SELECT} WHERE p.community = ? ORDER BY p.created_at DESC, p.rowid DESC"
        ))
        .bind(community)
        .fetch_all(&self.pool)
        .await?;
        Ok(recs)
    }

    async fn create_post(&self, new: PostDraft) -> RepoResult<Post> {
        self.require_community(&new.community).await?;
        sqlx::query("INSERT INTO posts (id, title, content, community, author, votes, created_at) VALUES (?, ?, ?, ?, ?, 0, ?)")
            .bind(&new.id)
            .bind(&new.title)
            .bind(&new.content)
            .bind(&new.community)
            .bind(&new.author)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        self.get_post(&new.id).await
    }

    async fn get_post(&self, id: &str) -> RepoResult<Post> {
        let rec = sqlx::query_as::<_, Post>(&format!("{POST_SELECT} WHERE p.id = ?"))
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(rec)
    }
}

#[async_trait]
impl CommentRepo for SqliteRepo {
    async fn list_comments(&self, post_id: &str) -> RepoResult<Vec<Comment>> {
        self.require_post(post_id).await?;
        let recs = sqlx::query_as::<_, Comment>(&format!(
            "{COMMENT_SELECT} WHERE post_id = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(recs)
    }

    async fn create_comment(&self, new: CommentDraft) -> RepoResult<Comment> {
        self.require_post(&new.post_id).await?;
        if let Some(parent) = &new.parent_id {
            let parent_post = sqlx::query_scalar::<_, String>("SELECT post_id FROM comments WHERE id = ?")
                .bind(parent)
                .fetch_optional(&self.pool)
                .await?;
            if parent_post.as_deref() != Some(new.post_id.as_str()) {
                return Err(RepoError::Invalid("Parent comment not found on this post".into()));
            }
        }
        let rec = sqlx::query_as::<_, Comment>(
            "INSERT INTO comments (id, post_id, parent_id, content, author, votes, created_at) VALUES (?, ?, ?, ?, ?, 0, ?) \
             RETURNING id, post_id, parent_id, content, author, votes, created_at",
        )
        .bind(&new.id)
        .bind(&new.post_id)
        .bind(&new.parent_id)
        .bind(&new.content)
        .bind(&new.author)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(rec)
    }
}

#[async_trait]
impl VoteRepo for SqliteRepo {
    async fn vote_post(&self, post_id: &str, user_id: &str, vote: VoteType) -> RepoResult<PostVoteResult> {
        // dropping `tx` on any early return rolls the whole unit back
        let mut tx = self.pool.begin().await?;
        Self::lock_target(&mut tx, Target::Post, post_id).await?;
        let t = Self::apply_vote(&mut tx, Target::Post, post_id, user_id, vote).await?;
        let post = Self::post_in(&mut tx, post_id).await?;
        tx.commit().await?;
        Ok(PostVoteResult { post, user_voted: t.current })
    }

    async fn vote_comment(&self, comment_id: &str, user_id: &str, vote: VoteType) -> RepoResult<CommentVoteResult> {
        let mut tx = self.pool.begin().await?;
        Self::lock_target(&mut tx, Target::Comment, comment_id).await?;
        let t = Self::apply_vote(&mut tx, Target::Comment, comment_id, user_id, vote).await?;
        let comment = sqlx::query_as::<_, Comment>(&format!("{COMMENT_SELECT} WHERE id = ?"))
            .bind(comment_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(CommentVoteResult { comment, user_voted: t.current })
    }

    async fn post_vote_of(&self, post_id: &str, user_id: &str) -> RepoResult<Option<VoteType>> {
        self.require_post(post_id).await?;
        let vote = sqlx::query_scalar::<_, String>("SELECT vote_type FROM votes WHERE user_id = ? AND post_id = ?")
            .bind(user_id)
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await?;
        vote.map(|v| v.parse::<VoteType>())
            .transpose()
            .map_err(|e| RepoError::Persistence(e.to_string()))
    }
}

#[async_trait]
impl SearchRepo for SqliteRepo {
    async fn search_posts(&self, q: &str) -> RepoResult<Vec<Post>> {
        let pattern = like_pattern(q);
        let recs = sqlx::query_as::<_, Post>(&format!(
            r"{POST_SELECT} WHERE p.title LIKE ? ESCAPE '\' OR p.content LIKE ? ESCAPE '\'
              ORDER BY p.created_at DESC, p.rowid DESC"
        ))
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;
        Ok(recs)
    }

    async fn search_communities(&self, q: &str) -> RepoResult<Vec<Community>> {
        let pattern = like_pattern(q);
        let recs = sqlx::query_as::<_, Community>(&format!(
            r"{COMMUNITY_SELECT} WHERE c.name LIKE ? ESCAPE '\' OR c.description LIKE ? ESCAPE '\'
              ORDER BY c.name ASC"
        ))
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;
        Ok(recs)
    }

    async fn search_comments(&self, q: &str) -> RepoResult<Vec<Comment>> {
        let pattern = like_pattern(q);
        let recs = sqlx::query_as::<_, Comment>(&format!(
            r"{COMMENT_SELECT} WHERE content LIKE ? ESCAPE '\' ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;
        Ok(recs)
    }
}
