use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::vote::VoteType;

pub const DEFAULT_AUTHOR: &str = "anonymous";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Community {
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    /// Number of posts in the community; derived, never stored.
    #[serde(default)]
    pub post_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewCommunity {
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub content: String,
    pub community: String,
    pub author: String,
    pub votes: i64,
    pub created_at: DateTime<Utc>,
    /// Number of comments on the post; derived, never stored.
    pub comments: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NewPost {
    /// Optional client-chosen id; a UUID is generated when absent.
    pub id: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub community: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    /// Comment this one replies to; `None` for top-level comments.
    #[serde(default)]
    pub parent_id: Option<String>,
    pub content: String,
    pub author: String,
    pub votes: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    pub id: Option<String>,
    /// Reply target; must be a comment on the same post.
    pub parent_id: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
}

/// Body of `POST /api/posts/{id}/vote` and `POST /api/comments/{id}/vote`.
/// `vote_type` stays a raw string so unknown values surface as a 400 with a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct VoteRequest {
    pub user_id: Option<String>,
    pub vote_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostVoteResult {
    #[serde(flatten)]
    pub post: Post,
    #[serde(rename = "userVoted")]
    pub user_voted: Option<VoteType>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommentVoteResult {
    #[serde(flatten)]
    pub comment: Comment,
    #[serde(rename = "userVoted")]
    pub user_voted: Option<VoteType>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserVote {
    #[serde(rename = "userVoted")]
    pub user_voted: Option<VoteType>,
}

/// A comment with its replies, oldest first at every level.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: Comment,
    pub replies: Vec<CommentNode>,
}

/// Arrange a post's comments (oldest first) into reply trees. A comment whose
/// parent is not in `comments` is treated as top-level.
pub fn comment_tree(comments: Vec<Comment>) -> Vec<CommentNode> {
    let ids: HashSet<String> = comments.iter().map(|c| c.id.clone()).collect();
    let mut children: HashMap<Option<String>, Vec<Comment>> = HashMap::new();
    for c in comments {
        let parent = c.parent_id.clone().filter(|p| ids.contains(p));
        children.entry(parent).or_default().push(c);
    }
    fn attach(parent: Option<String>, children: &mut HashMap<Option<String>, Vec<Comment>>) -> Vec<CommentNode> {
        children
            .remove(&parent)
            .unwrap_or_default()
            .into_iter()
            .map(|comment| {
                let replies = attach(Some(comment.id.clone()), children);
                CommentNode { comment, replies }
            })
            .collect()
    }
    attach(None, &mut children)
}

/// Validated insert payloads handed to the repository layer.
#[derive(Debug, Clone)]
pub struct PostDraft {
    pub id: String,
    pub title: String,
    pub content: String,
    pub community: String,
    pub author: String,
}

#[derive(Debug, Clone)]
pub struct CommentDraft {
    pub id: String,
    pub post_id: String,
    pub parent_id: Option<String>,
    pub content: String,
    pub author: String,
}

#[derive(Debug, Clone)]
pub struct CommunityDraft {
    pub name: String,
    pub description: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct InvalidInput(pub String);

fn required(field: Option<String>, what: &str) -> Result<String, InvalidInput> {
    match field {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(InvalidInput(format!("Missing required {what} fields"))),
    }
}

fn author_or_default(author: Option<String>) -> String {
    author
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| DEFAULT_AUTHOR.to_string())
}

fn id_or_generated(id: Option<String>) -> String {
    id.map(|i| i.trim().to_string())
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Community names are lowercase ASCII letters, digits and hyphens.
pub fn is_valid_community_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

impl NewCommunity {
    pub fn validate(self) -> Result<CommunityDraft, InvalidInput> {
        let name = required(self.name, "community")?.trim().to_string();
        if !is_valid_community_name(&name) {
            return Err(InvalidInput(
                "Community name may only contain lowercase letters, numbers, and hyphens".into(),
            ));
        }
        Ok(CommunityDraft { name, description: self.description.unwrap_or_default() })
    }
}

impl NewPost {
    pub fn validate(self) -> Result<PostDraft, InvalidInput> {
        let title = required(self.title, "post")?;
        let content = required(self.content, "post")?;
        let community = required(self.community, "post")?.trim().to_string();
        Ok(PostDraft {
            id: id_or_generated(self.id),
            title,
            content,
            community,
            author: author_or_default(self.author),
        })
    }
}

impl NewComment {
    pub fn validate(self, post_id: String) -> Result<CommentDraft, InvalidInput> {
        let content = required(self.content, "comment")?;
        Ok(CommentDraft {
            id: id_or_generated(self.id),
            post_id,
            parent_id: self.parent_id.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
            content,
            author: author_or_default(self.author),
        })
    }
}

impl VoteRequest {
    /// Resolves the voter id (blank or absent means anonymous) and the requested direction.
    pub fn validate(self) -> Result<(String, VoteType), InvalidInput> {
        let vote = self
            .vote_type
            .as_deref()
            .and_then(|v| v.parse::<VoteType>().ok())
            .ok_or_else(|| InvalidInput("Invalid vote type".into()))?;
        Ok((author_or_default(self.user_id), vote))
    }
}
