#![cfg(feature = "sqlite-store")]

use std::sync::Arc;

use agora::models::{comment_tree, CommentDraft, CommunityDraft, PostDraft};
use agora::repo::sqlite::SqliteRepo;
use agora::repo::{seed_default_communities, CommentRepo, CommunityRepo, PostRepo, RepoError, SearchRepo, VoteRepo};
use agora::vote::VoteType;

async fn repo() -> SqliteRepo {
    SqliteRepo::connect("sqlite::memory:").await.unwrap()
}

fn post(id: &str, community: &str, title: &str) -> PostDraft {
    PostDraft {
        id: id.into(),
        title: title.into(),
        content: format!("body of {id}"),
        community: community.into(),
        author: "anonymous".into(),
    }
}

fn comment(id: &str, post_id: &str, parent: Option<&str>, content: &str) -> CommentDraft {
    CommentDraft {
        id: id.into(),
        post_id: post_id.into(),
        parent_id: parent.map(Into::into),
        content: content.into(),
        author: "anonymous".into(),
    }
}

async fn repo_with_post() -> SqliteRepo {
    let r = repo().await;
    seed_default_communities(&r).await.unwrap();
    r.create_post(post("p1", "science", "Entropy")).await.unwrap();
    r
}

/// Σ(+1 per stored up vote, −1 per stored down vote) for a post.
async fn stored_sum(r: &SqliteRepo, post_id: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(SUM(CASE vote_type WHEN 'up' THEN 1 ELSE -1 END), 0) FROM votes WHERE post_id = ?",
    )
    .bind(post_id)
    .fetch_one(r.pool())
    .await
    .unwrap()
}

async fn vote_rows(r: &SqliteRepo, user_id: &str, post_id: &str) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM votes WHERE user_id = ? AND post_id = ?")
        .bind(user_id)
        .bind(post_id)
        .fetch_one(r.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn communities_and_posts() {
    let r = repo().await;
    seed_default_communities(&r).await.unwrap();
    assert_eq!(seed_default_communities(&r).await.unwrap(), 0);

    let created = r.create_community(CommunityDraft { name: "rust".into(), description: "".into() }).await.unwrap();
    assert_eq!(created.name, "rust");
    let dup = r.create_community(CommunityDraft { name: "rust".into(), description: "again".into() }).await;
    assert!(matches!(dup.unwrap_err(), RepoError::Conflict));

    let names: Vec<_> = r.list_communities().await.unwrap().into_iter().map(|c| c.name).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
    assert!(matches!(r.get_community("nope").await.unwrap_err(), RepoError::NotFound));

    let p = r.create_post(post("p1", "rust", "Borrowck")).await.unwrap();
    assert_eq!((p.votes, p.comments, p.author.as_str()), (0, 0, "anonymous"));
    r.create_post(post("p2", "rust", "Lifetimes")).await.unwrap();
    assert!(matches!(r.create_post(post("p1", "rust", "dup")).await.unwrap_err(), RepoError::Conflict));
    assert!(matches!(r.create_post(post("p9", "nope", "x")).await.unwrap_err(), RepoError::NotFound));

    let ids: Vec<_> = r.list_posts("rust").await.unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(ids, ["p2", "p1"]);
    assert!(r.list_posts("art").await.unwrap().is_empty());
    assert!(matches!(r.list_posts("nope").await.unwrap_err(), RepoError::NotFound));
}

#[tokio::test]
async fn comments_are_counted_and_ordered() {
    let r = repo_with_post().await;
    for (i, text) in ["one", "two", "three"].iter().enumerate() {
        r.create_comment(comment(&format!("c{i}"), "p1", None, text)).await.unwrap();
    }
    let contents: Vec<_> = r.list_comments("p1").await.unwrap().into_iter().map(|c| c.content).collect();
    assert_eq!(contents, ["one", "two", "three"]);
    assert_eq!(r.get_post("p1").await.unwrap().comments, 3);
    assert_eq!(r.list_posts("science").await.unwrap()[0].comments, 3);

    assert!(matches!(r.create_comment(comment("cx", "ghost", None, "x")).await.unwrap_err(), RepoError::NotFound));
    assert!(matches!(r.list_comments("ghost").await.unwrap_err(), RepoError::NotFound));
}

#[tokio::test]
async fn replies_must_stay_on_their_post() {
    let r = repo_with_post().await;
    r.create_post(post("p2", "science", "Other")).await.unwrap();
    r.create_comment(comment("root", "p1", None, "root")).await.unwrap();
    r.create_comment(comment("elsewhere", "p2", None, "elsewhere")).await.unwrap();

    let reply = r.create_comment(comment("r1", "p1", Some("root"), "reply")).await.unwrap();
    assert_eq!(reply.parent_id.as_deref(), Some("root"));
    r.create_comment(comment("r2", "p1", Some("r1"), "nested")).await.unwrap();

    let err = r.create_comment(comment("bad", "p1", Some("elsewhere"), "x")).await.unwrap_err();
    assert!(matches!(err, RepoError::Invalid(_)));
    let err = r.create_comment(comment("bad", "p1", Some("nope"), "x")).await.unwrap_err();
    assert!(matches!(err, RepoError::Invalid(_)));

    let tree = comment_tree(r.list_comments("p1").await.unwrap());
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].replies[0].comment.id, "r1");
    assert_eq!(tree[0].replies[0].replies[0].comment.id, "r2");
}

#[tokio::test]
async fn front_page_and_post_counts() {
    let r = repo().await;
    seed_default_communities(&r).await.unwrap();
    r.create_post(post("a", "art", "first")).await.unwrap();
    r.create_post(post("b", "law", "second")).await.unwrap();
    r.create_post(post("c", "art", "third")).await.unwrap();

    let ids: Vec<_> = r.list_all_posts().await.unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(ids, ["c", "b", "a"]);

    assert_eq!(r.get_community("art").await.unwrap().post_count, 2);
    let counts: Vec<_> = r.list_communities().await.unwrap().into_iter().map(|c| (c.name, c.post_count)).collect();
    assert!(counts.contains(&("law".to_string(), 1)));
    assert!(counts.contains(&("medicine".to_string(), 0)));
    assert_eq!(r.search_communities("art").await.unwrap()[0].post_count, 2);
    let created = r.create_community(CommunityDraft { name: "fresh".into(), description: "".into() }).await.unwrap();
    assert_eq!(created.post_count, 0);
}

#[tokio::test]
async fn vote_transitions_keep_counter_in_sync() {
    let r = repo_with_post().await;

    let res = r.vote_post("p1", "a", VoteType::Up).await.unwrap();
    assert_eq!((res.post.votes, res.user_voted), (1, Some(VoteType::Up)));

    let res = r.vote_post("p1", "a", VoteType::Down).await.unwrap();
    assert_eq!((res.post.votes, res.user_voted), (-1, Some(VoteType::Down)));
    assert_eq!(vote_rows(&r, "a", "p1").await, 1);

    let res = r.vote_post("p1", "b", VoteType::Down).await.unwrap();
    assert_eq!(res.post.votes, -2);

    let res = r.vote_post("p1", "a", VoteType::Down).await.unwrap();
    assert_eq!((res.post.votes, res.user_voted), (-1, None));
    assert_eq!(vote_rows(&r, "a", "p1").await, 0);

    assert_eq!(r.get_post("p1").await.unwrap().votes, stored_sum(&r, "p1").await);
    assert_eq!(r.post_vote_of("p1", "b").await.unwrap(), Some(VoteType::Down));
    assert_eq!(r.post_vote_of("p1", "a").await.unwrap(), None);
}

#[tokio::test]
async fn voting_on_missing_post_changes_nothing() {
    let r = repo_with_post().await;
    assert!(matches!(r.vote_post("ghost", "a", VoteType::Up).await.unwrap_err(), RepoError::NotFound));
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM votes").fetch_one(r.pool()).await.unwrap();
    assert_eq!(total, 0);
    assert!(matches!(r.post_vote_of("ghost", "a").await.unwrap_err(), RepoError::NotFound));
}

#[tokio::test]
async fn failed_counter_update_rolls_back_vote_row() {
    let r = repo_with_post().await;
    r.vote_post("p1", "a", VoteType::Up).await.unwrap();

    // lock_target's no-op write passes, the delta write aborts
    sqlx::query(
        "CREATE TRIGGER boom BEFORE UPDATE OF votes ON posts WHEN NEW.votes <> OLD.votes \
         BEGIN SELECT RAISE(ABORT, 'boom'); END",
    )
    .execute(r.pool())
    .await
    .unwrap();

    let err = r.vote_post("p1", "b", VoteType::Down).await.unwrap_err();
    assert!(matches!(&err, RepoError::Persistence(msg) if msg.contains("boom")), "{err:?}");
    assert_eq!(vote_rows(&r, "b", "p1").await, 0);

    let err = r.vote_post("p1", "a", VoteType::Down).await.unwrap_err();
    assert!(matches!(err, RepoError::Persistence(_)));
    assert_eq!(r.post_vote_of("p1", "a").await.unwrap(), Some(VoteType::Up));

    assert_eq!(r.get_post("p1").await.unwrap().votes, 1);
    assert_eq!(stored_sum(&r, "p1").await, 1);
}

#[tokio::test]
async fn comment_votes_use_their_own_rows() {
    let r = repo_with_post().await;
    r.create_comment(comment("c1", "p1", None, "hi")).await.unwrap();

    r.vote_post("p1", "a", VoteType::Up).await.unwrap();
    let res = r.vote_comment("c1", "a", VoteType::Up).await.unwrap();
    assert_eq!((res.comment.votes, res.user_voted), (1, Some(VoteType::Up)));
    let res = r.vote_comment("c1", "a", VoteType::Down).await.unwrap();
    assert_eq!(res.comment.votes, -1);

    // the post vote row is untouched by comment voting
    assert_eq!(r.get_post("p1").await.unwrap().votes, 1);
    assert_eq!(vote_rows(&r, "a", "p1").await, 1);
    assert!(matches!(r.vote_comment("ghost", "a", VoteType::Up).await.unwrap_err(), RepoError::NotFound));
}

#[tokio::test]
async fn schema_rejects_duplicate_vote_rows() {
    let r = repo_with_post().await;
    r.vote_post("p1", "a", VoteType::Up).await.unwrap();
    let dup = sqlx::query("INSERT INTO votes (user_id, post_id, vote_type) VALUES ('a', 'p1', 'down')")
        .execute(r.pool())
        .await;
    assert!(matches!(RepoError::from(dup.unwrap_err()), RepoError::Conflict));
    let bad = sqlx::query("INSERT INTO votes (user_id, post_id, vote_type) VALUES ('z', 'p1', 'sideways')")
        .execute(r.pool())
        .await;
    assert!(bad.is_err());
}

#[tokio::test]
async fn search_escapes_like_wildcards() {
    let r = repo_with_post().await;
    r.create_post(post("p2", "science", "100% certain")).await.unwrap();
    r.create_post(post("p3", "science", "snake_case names")).await.unwrap();

    let hits: Vec<_> = r.search_posts("%").await.unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(hits, ["p2"]);
    let hits: Vec<_> = r.search_posts("e_c").await.unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(hits, ["p3"]);
    assert_eq!(r.search_posts("ENTROPY").await.unwrap().len(), 1);
    let names: Vec<_> = r.search_communities("tech").await.unwrap().into_iter().map(|c| c.name).collect();
    assert_eq!(names, ["technology"]);
    assert!(r.search_comments("anything").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_voters_do_not_lose_updates() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("votes.db").display());
    let r = Arc::new(SqliteRepo::connect(&url).await.unwrap());
    seed_default_communities(r.as_ref()).await.unwrap();
    r.create_post(post("p1", "science", "Race")).await.unwrap();

    let voters: Vec<_> = (0..12)
        .map(|i| {
            let r = r.clone();
            let vote = if i % 3 == 0 { VoteType::Down } else { VoteType::Up };
            tokio::spawn(async move { r.vote_post("p1", &format!("user-{i}"), vote).await })
        })
        .collect();
    for v in voters {
        v.await.unwrap().unwrap();
    }

    // 8 up, 4 down
    assert_eq!(r.get_post("p1").await.unwrap().votes, 4);
    assert_eq!(stored_sum(&r, "p1").await, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_voter_racing_keeps_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("race.db").display());
    let r = Arc::new(SqliteRepo::connect(&url).await.unwrap());
    seed_default_communities(r.as_ref()).await.unwrap();
    r.create_post(post("p1", "science", "Race")).await.unwrap();

    let voters: Vec<_> = (0..25)
        .map(|i| {
            let r = r.clone();
            let vote = if i % 2 == 0 { VoteType::Up } else { VoteType::Down };
            tokio::spawn(async move { r.vote_post("p1", "same", vote).await })
        })
        .collect();
    for v in voters {
        v.await.unwrap().unwrap();
    }

    let votes = r.get_post("p1").await.unwrap().votes;
    assert_eq!(votes, stored_sum(&r, "p1").await);
    assert!(vote_rows(&r, "same", "p1").await <= 1);
    assert!((-1..=1).contains(&votes));
}
