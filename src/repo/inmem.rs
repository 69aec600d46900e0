use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::*;
use crate::vote::{reconcile, VoteAction};

const SNAPSHOT_FILE: &str = "state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Target {
    Post,
    Comment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VoteRow {
    user_id: String,
    target: Target,
    target_id: String,
    vote_type: VoteType,
}

// Vec keeps insertion order, which doubles as creation order for listing.
#[derive(Default, Serialize, Deserialize)]
struct State {
    communities: Vec<Community>,
    posts: Vec<Post>,
    comments: Vec<Comment>,
    votes: Vec<VoteRow>,
}

impl State {
    fn comment_count(&self, post_id: &str) -> i64 {
        self.comments.iter().filter(|c| c.post_id == post_id).count() as i64
    }

    fn with_count(&self, post: &Post) -> Post {
        Post { comments: self.comment_count(&post.id), ..post.clone() }
    }

    fn with_post_count(&self, community: &Community) -> Community {
        let post_count = self.posts.iter().filter(|p| p.community == community.name).count() as i64;
        Community { post_count, ..community.clone() }
    }

    fn vote_index(&self, user_id: &str, target: Target, target_id: &str) -> Option<usize> {
        self.votes
            .iter()
            .position(|v| v.user_id == user_id && v.target == target && v.target_id == target_id)
    }

    /// Apply one vote request to the vote rows and return the counter delta and resulting vote.
    fn apply_vote(&mut self, user_id: &str, target: Target, target_id: &str, requested: VoteType) -> (i64, Option<VoteType>) {
        let idx = self.vote_index(user_id, target, target_id);
        let existing = idx.map(|i| self.votes[i].vote_type);
        let t = reconcile(existing, requested);
        match t.action {
            VoteAction::Insert(vote_type) => self.votes.push(VoteRow {
                user_id: user_id.to_string(),
                target,
                target_id: target_id.to_string(),
                vote_type,
            }),
            VoteAction::Delete => {
                if let Some(i) = idx {
                    self.votes.remove(i);
                }
            }
            VoteAction::Update(vote_type) => {
                if let Some(i) = idx {
                    self.votes[i].vote_type = vote_type;
                }
            }
        }
        debug!(user_id, target_id, ?existing, ?requested, delta = t.delta, "vote applied");
        (t.delta, t.current)
    }
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

/// Process-local store guarded by one lock. Optionally mirrored to a JSON
/// snapshot after every write.
#[derive(Clone)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
    snapshot_path: Option<Arc<PathBuf>>,
}

impl InMemRepo {
    /// Empty store, nothing written to disk.
    pub fn new() -> Self {
        Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None }
    }

    /// Store backed by `<dir>/state.json`, loading it if present.
    pub fn with_snapshot_dir(dir: impl AsRef<Path>) -> Self {
        let path = dir.as_ref().join(SNAPSHOT_FILE);
        let state = Self::load_state_from(&path);
        Self { state: Arc::new(RwLock::new(state)), snapshot_path: Some(Arc::new(path)) }
    }

    fn load_state_from(path: &Path) -> State {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                Ok(s) => {
                    info!("loaded snapshot '{}'", path.display());
                    s
                }
                Err(e) => {
                    warn!("failed to parse snapshot '{}': {e}. Starting empty.", path.display());
                    State::default()
                }
            },
            Err(e) => {
                info!("no snapshot at '{}': {e}. Starting empty.", path.display());
                State::default()
            }
        }
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| RepoError::Persistence("state lock poisoned".into()))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| RepoError::Persistence("state lock poisoned".into()))
    }

    /// Mirror `state` to the snapshot file, if configured. Callers hold the
    /// write guard, so snapshots are written one at a time and always reflect
    /// a complete state. The file is replaced by rename, never truncated in
    /// place. The in-memory state stays authoritative, so a failed write is
    /// only logged.
    fn persist(&self, state: &State) {
        let Some(path) = &self.snapshot_path else { return };
        let bytes = match serde_json::to_vec_pretty(state) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to serialize snapshot: {e}");
                return;
            }
        };
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let tmp = path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp, bytes).and_then(|_| std::fs::rename(&tmp, path.as_path())) {
            warn!("failed to write snapshot '{}': {e}", path.display());
        }
    }
}

impl Default for InMemRepo {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl CommunityRepo for InMemRepo {
    async fn list_communities(&self) -> RepoResult<Vec<Community>> {
        let s = self.read()?;
        let mut v: Vec<_> = s.communities.iter().map(|c| s.with_post_count(c)).collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(v)
    }

    async fn get_community(&self, name: &str) -> RepoResult<Community> {
        let s = self.read()?;
        s.communities.iter().find(|c| c.name == name).map(|c| s.with_post_count(c)).ok_or(RepoError::NotFound)
    }

    async fn create_community(&self, new: CommunityDraft) -> RepoResult<Community> {
        let mut s = self.write()?;
        if s.communities.iter().any(|c| c.name == new.name) {
            return Err(RepoError::Conflict);
        }
        let community = Community { name: new.name, description: new.description, created_at: Utc::now(), post_count: 0 };
        s.communities.push(community.clone());
        self.persist(&s);
        Ok(community)
    }
}

#[async_trait]
impl PostRepo for InMemRepo {
    async fn list_all_posts(&self) -> RepoResult<Vec<Post>> {
        let s = self.read()?;
        Ok(s.posts.iter().rev().map(|p| s.with_count(p)).collect())
    }

    async fn list_posts(&self, community: &str) -> RepoResult<Vec<Post>> {
        let s = self.read()?;
        if !s.communities.iter().any(|c| c.name == community) {
            return Err(RepoError::NotFound);
        }
        Ok(s.posts.iter().rev().filter(|p| p.community == community).map(|p| s.with_count(p)).collect())
    }

    async fn create_post(&self, new: PostDraft) -> RepoResult<Post> {
        let mut s = self.write()?;
        if !s.communities.iter().any(|c| c.name == new.community) {
            return Err(RepoError::NotFound);
        }
        if s.posts.iter().any(|p| p.id == new.id) {
            return Err(RepoError::Conflict);
        }
        let post = Post {
            id: new.id,
            title: new.title,
            content: new.content,
            community: new.community,
            author: new.author,
            votes: 0,
            created_at: Utc::now(),
            comments: 0,
        };
        s.posts.push(post.clone());
        self.persist(&s);
        Ok(post)
    }

    async fn get_post(&self, id: &str) -> RepoResult<Post> {
        let s = self.read()?;
        s.posts.iter().find(|p| p.id == id).map(|p| s.with_count(p)).ok_or(RepoError::NotFound)
    }
}

#[async_trait]
impl CommentRepo for InMemRepo {
    async fn list_comments(&self, post_id: &str) -> RepoResult<Vec<Comment>> {
        let s = self.read()?;
        if !s.posts.iter().any(|p| p.id == post_id) {
            return Err(RepoError::NotFound);
        }
        Ok(s.comments.iter().filter(|c| c.post_id == post_id).cloned().collect())
    }

    async fn create_comment(&self, new: CommentDraft) -> RepoResult<Comment> {
        let mut s = self.write()?;
        if !s.posts.iter().any(|p| p.id == new.post_id) {
            return Err(RepoError::NotFound);
        }
        if let Some(parent) = &new.parent_id {
            if !s.comments.iter().any(|c| &c.id == parent && c.post_id == new.post_id) {
                return Err(RepoError::Invalid("Parent comment not found on this post".into()));
            }
        }
        if s.comments.iter().any(|c| c.id == new.id) {
            return Err(RepoError::Conflict);
        }
        let comment = Comment {
            id: new.id,
            post_id: new.post_id,
            parent_id: new.parent_id,
            content: new.content,
            author: new.author,
            votes: 0,
            created_at: Utc::now(),
        };
        s.comments.push(comment.clone());
        self.persist(&s);
        Ok(comment)
    }
}

#[async_trait]
impl VoteRepo for InMemRepo {
    async fn vote_post(&self, post_id: &str, user_id: &str, vote: VoteType) -> RepoResult<PostVoteResult> {
        let mut s = self.write()?;
        let idx = s.posts.iter().position(|p| p.id == post_id).ok_or(RepoError::NotFound)?;
        let (delta, user_voted) = s.apply_vote(user_id, Target::Post, post_id, vote);
        s.posts[idx].votes += delta;
        let post = s.with_count(&s.posts[idx]);
        self.persist(&s);
        Ok(PostVoteResult { post, user_voted })
    }

    async fn vote_comment(&self, comment_id: &str, user_id: &str, vote: VoteType) -> RepoResult<CommentVoteResult> {
        let mut s = self.write()?;
        let idx = s.comments.iter().position(|c| c.id == comment_id).ok_or(RepoError::NotFound)?;
        let (delta, user_voted) = s.apply_vote(user_id, Target::Comment, comment_id, vote);
        s.comments[idx].votes += delta;
        let comment = s.comments[idx].clone();
        self.persist(&s);
        Ok(CommentVoteResult { comment, user_voted })
    }

    async fn post_vote_of(&self, post_id: &str, user_id: &str) -> RepoResult<Option<VoteType>> {
        let s = self.read()?;
        if !s.posts.iter().any(|p| p.id == post_id) {
            return Err(RepoError::NotFound);
        }
        Ok(s.vote_index(user_id, Target::Post, post_id).map(|i| s.votes[i].vote_type))
    }
}

#[async_trait]
impl SearchRepo for InMemRepo {
    async fn search_posts(&self, q: &str) -> RepoResult<Vec<Post>> {
        let needle = q.to_lowercase();
        let s = self.read()?;
        Ok(s.posts
            .iter()
            .rev()
            .filter(|p| contains_ci(&p.title, &needle) || contains_ci(&p.content, &needle))
            .map(|p| s.with_count(p))
            .collect())
    }

    async fn search_communities(&self, q: &str) -> RepoResult<Vec<Community>> {
        let needle = q.to_lowercase();
        let s = self.read()?;
        let mut v: Vec<_> = s
            .communities
            .iter()
            .filter(|c| contains_ci(&c.name, &needle) || contains_ci(&c.description, &needle))
            .map(|c| s.with_post_count(c))
            .collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(v)
    }

    async fn search_comments(&self, q: &str) -> RepoResult<Vec<Comment>> {
        let needle = q.to_lowercase();
        Ok(self
            .read()?
            .comments
            .iter()
            .rev()
            .filter(|c| contains_ci(&c.content, &needle))
            .cloned()
            .collect())
    }
}
