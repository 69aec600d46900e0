use std::sync::Arc;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use tracing::info;

use crate::error::ApiError;
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::Repo;

pub fn config(cfg: &mut web::ServiceConfig) {
    let json_cfg = web::JsonConfig::default()
        .error_handler(|err, _req| ApiError::InvalidInput(format!("Invalid JSON body: {err}")).into());
    cfg.service(
        web::scope("/api")
            .app_data(json_cfg)
            .service(
                web::resource("/communities")
                    .route(web::get().to(list_communities))
                    .route(web::post().to(create_community)),
            )
            .service(web::resource("/communities/{name}").route(web::get().to(get_community)))
            .service(web::resource("/communities/{name}/posts").route(web::get().to(list_community_posts)))
            .service(
                web::resource("/posts")
                    .route(web::get().to(list_all_posts))
                    .route(web::post().to(create_post)),
            )
            .service(web::resource("/posts/{id}").route(web::get().to(get_post)))
            .service(
                web::resource("/posts/{id}/comments")
                    .route(web::get().to(list_comments))
                    .route(web::post().to(create_comment)),
            )
            .service(web::resource("/posts/{id}/comments/tree").route(web::get().to(comment_tree)))
            .service(
                web::resource("/posts/{id}/vote")
                    .route(web::get().to(get_post_vote))
                    .route(web::post().to(vote_post)),
            )
            .service(web::resource("/comments/{id}/vote").route(web::post().to(vote_comment)))
            .service(web::resource("/search/posts").route(web::get().to(search_posts)))
            .service(web::resource("/search/communities").route(web::get().to(search_communities)))
            .service(web::resource("/search/comments").route(web::get().to(search_comments))),
    );
    cfg.route("/health", web::get().to(health));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    /// `None` disables rate limiting entirely.
    pub rate_limiter: Option<RateLimiterFacade>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { repo, rate_limiter: None }
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiterFacade) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    fn throttle(&self, req: &HttpRequest, allow: impl Fn(&RateLimiterFacade, &str) -> bool) -> Result<(), ApiError> {
        let Some(limiter) = &self.rate_limiter else { return Ok(()) };
        let ip = req.connection_info().realip_remote_addr().unwrap_or("unknown").to_string();
        if allow(limiter, &ip) { Ok(()) } else { Err(ApiError::TooManyRequests) }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// Substring to look for; blank matches nothing.
    pub q: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VoteLookup {
    pub user_id: Option<String>,
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[utoipa::path(
    get,
    path = "/api/communities",
    responses((status = 200, description = "All communities, by name", body = [Community]))
)]
pub async fn list_communities(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let communities = data.repo.list_communities().await?;
    Ok(HttpResponse::Ok().json(communities))
}

#[utoipa::path(
    post,
    path = "/api/communities",
    request_body = NewCommunity,
    responses(
        (status = 201, description = "Community created", body = Community),
        (status = 400, description = "Missing or malformed name"),
        (status = 409, description = "Name already taken")
    )
)]
pub async fn create_community(data: web::Data<AppState>, payload: web::Json<NewCommunity>) -> Result<HttpResponse, ApiError> {
    let draft = payload.into_inner().validate()?;
    let community = data.repo.create_community(draft).await.map_err(ApiError::from_repo("Community"))?;
    info!(name = %community.name, "community created");
    Ok(HttpResponse::Created().json(community))
}

#[utoipa::path(
    get,
    path = "/api/communities/{name}",
    params(("name" = String, Path, description = "Community name")),
    responses(
        (status = 200, description = "Community", body = Community),
        (status = 404, description = "Community not found")
    )
)]
pub async fn get_community(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let community = data.repo.get_community(&path).await.map_err(ApiError::from_repo("Community"))?;
    Ok(HttpResponse::Ok().json(community))
}

#[utoipa::path(
    get,
    path = "/api/communities/{name}/posts",
    params(("name" = String, Path, description = "Community name")),
    responses(
        (status = 200, description = "Posts, newest first", body = [Post]),
        (status = 404, description = "Community not found")
    )
)]
pub async fn list_community_posts(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let posts = data.repo.list_posts(&path).await.map_err(ApiError::from_repo("Community"))?;
    Ok(HttpResponse::Ok().json(posts))
}

#[utoipa::path(
    get,
    path = "/api/posts",
    responses((status = 200, description = "Posts of every community, newest first", body = [Post]))
)]
pub async fn list_all_posts(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let posts = data.repo.list_all_posts().await?;
    Ok(HttpResponse::Ok().json(posts))
}

#[utoipa::path(
    post,
    path = "/api/posts",
    request_body = NewPost,
    responses(
        (status = 201, description = "Post created", body = Post),
        (status = 400, description = "Missing required post fields"),
        (status = 404, description = "Community not found"),
        (status = 409, description = "Post id already used"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn create_post(req: HttpRequest, data: web::Data<AppState>, payload: web::Json<NewPost>) -> Result<HttpResponse, ApiError> {
    let draft = payload.into_inner().validate()?;
    data.throttle(&req, RateLimiterFacade::allow_post)?;
    let post = data.repo.create_post(draft).await.map_err(|e| match e {
        crate::repo::RepoError::Conflict => ApiError::Conflict("Post"),
        other => ApiError::from_repo("Community")(other),
    })?;
    info!(id = %post.id, community = %post.community, "post created");
    Ok(HttpResponse::Created().json(post))
}

#[utoipa::path(
    get,
    path = "/api/posts/{id}",
    params(("id" = String, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post with comment count", body = Post),
        (status = 404, description = "Post not found")
    )
)]
pub async fn get_post(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(&path).await.map_err(ApiError::from_repo("Post"))?;
    Ok(HttpResponse::Ok().json(post))
}

#[utoipa::path(
    get,
    path = "/api/posts/{id}/comments",
    params(("id" = String, Path, description = "Post id")),
    responses(
        (status = 200, description = "Comments, oldest first", body = [Comment]),
        (status = 404, description = "Post not found")
    )
)]
pub async fn list_comments(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let comments = data.repo.list_comments(&path).await.map_err(ApiError::from_repo("Post"))?;
    Ok(HttpResponse::Ok().json(comments))
}

#[utoipa::path(
    get,
    path = "/api/posts/{id}/comments/tree",
    params(("id" = String, Path, description = "Post id")),
    responses(
        (status = 200, description = "Top-level comments with nested replies, oldest first", body = [CommentNode]),
        (status = 404, description = "Post not found")
    )
)]
pub async fn comment_tree(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let comments = data.repo.list_comments(&path).await.map_err(ApiError::from_repo("Post"))?;
    Ok(HttpResponse::Ok().json(crate::models::comment_tree(comments)))
}

#[utoipa::path(
    post,
    path = "/api/posts/{id}/comments",
    params(("id" = String, Path, description = "Post id")),
    request_body = NewComment,
    responses(
        (status = 201, description = "Comment created", body = Comment),
        (status = 400, description = "Missing required comment fields, or parent is not a comment on this post"),
        (status = 404, description = "Post not found"),
        (status = 409, description = "Comment id already used"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn create_comment(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    let draft = payload.into_inner().validate(path.into_inner())?;
    data.throttle(&req, RateLimiterFacade::allow_comment)?;
    let comment = data.repo.create_comment(draft).await.map_err(|e| match e {
        crate::repo::RepoError::Conflict => ApiError::Conflict("Comment"),
        other => ApiError::from_repo("Post")(other),
    })?;
    info!(id = %comment.id, post_id = %comment.post_id, "comment created");
    Ok(HttpResponse::Created().json(comment))
}

#[utoipa::path(
    post,
    path = "/api/posts/{id}/vote",
    params(("id" = String, Path, description = "Post id")),
    request_body = VoteRequest,
    responses(
        (status = 200, description = "Updated post and the caller's resulting vote", body = PostVoteResult),
        (status = 400, description = "Invalid vote type"),
        (status = 404, description = "Post not found"),
        (status = 500, description = "Persistence failure, nothing was applied")
    )
)]
pub async fn vote_post(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<VoteRequest>,
) -> Result<HttpResponse, ApiError> {
    let (user_id, vote) = payload.into_inner().validate()?;
    data.throttle(&req, RateLimiterFacade::allow_vote)?;
    let result = data.repo.vote_post(&path, &user_id, vote).await.map_err(ApiError::from_repo("Post"))?;
    Ok(HttpResponse::Ok().json(result))
}

#[utoipa::path(
    get,
    path = "/api/posts/{id}/vote",
    params(("id" = String, Path, description = "Post id"), VoteLookup),
    responses(
        (status = 200, description = "The voter's current vote on the post", body = UserVote),
        (status = 404, description = "Post not found")
    )
)]
pub async fn get_post_vote(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<VoteLookup>,
) -> Result<HttpResponse, ApiError> {
    let user_id = query
        .into_inner()
        .user_id
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_AUTHOR.to_string());
    let user_voted = data.repo.post_vote_of(&path, user_id.trim()).await.map_err(ApiError::from_repo("Post"))?;
    Ok(HttpResponse::Ok().json(UserVote { user_voted }))
}

#[utoipa::path(
    post,
    path = "/api/comments/{id}/vote",
    params(("id" = String, Path, description = "Comment id")),
    request_body = VoteRequest,
    responses(
        (status = 200, description = "Updated comment and the caller's resulting vote", body = CommentVoteResult),
        (status = 400, description = "Invalid vote type"),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn vote_comment(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<VoteRequest>,
) -> Result<HttpResponse, ApiError> {
    let (user_id, vote) = payload.into_inner().validate()?;
    data.throttle(&req, RateLimiterFacade::allow_vote)?;
    let result = data.repo.vote_comment(&path, &user_id, vote).await.map_err(ApiError::from_repo("Comment"))?;
    Ok(HttpResponse::Ok().json(result))
}

fn search_term(query: web::Query<SearchQuery>) -> Option<String> {
    query.into_inner().q.map(|q| q.trim().to_string()).filter(|q| !q.is_empty())
}

#[utoipa::path(
    get,
    path = "/api/search/posts",
    params(SearchQuery),
    responses((status = 200, description = "Posts whose title or content contains q", body = [Post]))
)]
pub async fn search_posts(data: web::Data<AppState>, query: web::Query<SearchQuery>) -> Result<HttpResponse, ApiError> {
    let Some(q) = search_term(query) else { return Ok(HttpResponse::Ok().json(Vec::<Post>::new())) };
    Ok(HttpResponse::Ok().json(data.repo.search_posts(&q).await?))
}

#[utoipa::path(
    get,
    path = "/api/search/communities",
    params(SearchQuery),
    responses((status = 200, description = "Communities whose name or description contains q", body = [Community]))
)]
pub async fn search_communities(data: web::Data<AppState>, query: web::Query<SearchQuery>) -> Result<HttpResponse, ApiError> {
    let Some(q) = search_term(query) else { return Ok(HttpResponse::Ok().json(Vec::<Community>::new())) };
    Ok(HttpResponse::Ok().json(data.repo.search_communities(&q).await?))
}

#[utoipa::path(
    get,
    path = "/api/search/comments",
    params(SearchQuery),
    responses((status = 200, description = "Comments whose content contains q", body = [Comment]))
)]
pub async fn search_comments(data: web::Data<AppState>, query: web::Query<SearchQuery>) -> Result<HttpResponse, ApiError> {
    let Some(q) = search_term(query) else { return Ok(HttpResponse::Ok().json(Vec::<Comment>::new())) };
    Ok(HttpResponse::Ok().json(data.repo.search_comments(&q).await?))
}
