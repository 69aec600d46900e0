use async_trait::async_trait;
use tracing::{debug, info};

use crate::models::*;
use crate::vote::VoteType;

#[cfg(feature = "inmem-store")]
pub mod inmem;
#[cfg(feature = "sqlite-store")]
pub mod sqlite;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    /// A reference inside an otherwise well-formed draft does not hold.
    #[error("{0}")] Invalid(String),
    #[error("{0}")] Persistence(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
            other => RepoError::Persistence(other.to_string()),
        }
    }
}

#[async_trait]
pub trait CommunityRepo: Send + Sync {
    async fn list_communities(&self) -> RepoResult<Vec<Community>>;
    async fn get_community(&self, name: &str) -> RepoResult<Community>;
    async fn create_community(&self, new: CommunityDraft) -> RepoResult<Community>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    /// Posts across all communities, newest first.
    async fn list_all_posts(&self) -> RepoResult<Vec<Post>>;
    /// Posts of one community, newest first. `NotFound` if the community is unknown.
    async fn list_posts(&self, community: &str) -> RepoResult<Vec<Post>>;
    async fn create_post(&self, new: PostDraft) -> RepoResult<Post>;
    async fn get_post(&self, id: &str) -> RepoResult<Post>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    /// Comments of one post, oldest first. `NotFound` if the post is unknown.
    async fn list_comments(&self, post_id: &str) -> RepoResult<Vec<Comment>>;
    /// `NotFound` if the post is unknown, `Invalid` if `parent_id` is not a comment on the same post.
    async fn create_comment(&self, new: CommentDraft) -> RepoResult<Comment>;
}

/// Applies a voter's request to a target atomically: the vote row action, the
/// counter delta and the re-read of the target either all happen or none do.
#[async_trait]
pub trait VoteRepo: Send + Sync {
    async fn vote_post(&self, post_id: &str, user_id: &str, vote: VoteType) -> RepoResult<PostVoteResult>;
    async fn vote_comment(&self, comment_id: &str, user_id: &str, vote: VoteType) -> RepoResult<CommentVoteResult>;
    async fn post_vote_of(&self, post_id: &str, user_id: &str) -> RepoResult<Option<VoteType>>;
}

#[async_trait]
pub trait SearchRepo: Send + Sync {
    async fn search_posts(&self, q: &str) -> RepoResult<Vec<Post>>;
    async fn search_communities(&self, q: &str) -> RepoResult<Vec<Community>>;
    async fn search_comments(&self, q: &str) -> RepoResult<Vec<Comment>>;
}

pub trait Repo: CommunityRepo + PostRepo + CommentRepo + VoteRepo + SearchRepo {}

impl<T> Repo for T where T: CommunityRepo + PostRepo + CommentRepo + VoteRepo + SearchRepo {}

pub const DEFAULT_COMMUNITIES: &[(&str, &str)] = &[
    ("philosophy", "Discuss philosophical topics and ideas"),
    ("technology", "Share and learn about the latest in tech"),
    ("community", "Community building and social discourse"),
    ("science", "Scientific discoveries and discussions"),
    ("art", "Share and appreciate art in all forms"),
    ("law", "Legal discussions and advice"),
    ("medicine", "Medical discussions and health advice"),
    ("education", "Topics related to learning and teaching"),
];

/// Insert the default communities that do not exist yet. Returns how many were created.
pub async fn seed_default_communities(repo: &dyn Repo) -> RepoResult<usize> {
    let mut created = 0;
    for (name, description) in DEFAULT_COMMUNITIES {
        let draft = CommunityDraft { name: name.to_string(), description: description.to_string() };
        match repo.create_community(draft).await {
            Ok(_) => created += 1,
            Err(RepoError::Conflict) => debug!(community = name, "default community already present"),
            Err(e) => return Err(e),
        }
    }
    info!(created, "seeded default communities");
    Ok(created)
}
