use crate::models::{
    Comment, CommentNode, CommentVoteResult, Community, NewComment, NewCommunity, NewPost, Post, PostVoteResult, UserVote,
    VoteRequest,
};
use crate::vote::VoteType;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_communities,
        crate::routes::create_community,
        crate::routes::get_community,
        crate::routes::list_community_posts,
        crate::routes::list_all_posts,
        crate::routes::create_post,
        crate::routes::get_post,
        crate::routes::list_comments,
        crate::routes::comment_tree,
        crate::routes::create_comment,
        crate::routes::vote_post,
        crate::routes::get_post_vote,
        crate::routes::vote_comment,
        crate::routes::search_posts,
        crate::routes::search_communities,
        crate::routes::search_comments,
    ),
    components(schemas(
        Community, NewCommunity, Post, NewPost, Comment, CommentNode, NewComment,
        VoteType, VoteRequest, PostVoteResult, CommentVoteResult, UserVote
    )),
    tags(
        (name = "communities", description = "Community operations"),
        (name = "posts", description = "Post operations"),
        (name = "votes", description = "Vote reconciliation"),
        (name = "search", description = "Substring search"),
    )
)]
pub struct ApiDoc;
