use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use agora::config::{AppConfig, StorageBackend};
use agora::openapi::ApiDoc;
use agora::rate_limit::{InMemoryRateLimiter, RateLimiterFacade};
use agora::repo::{seed_default_communities, Repo};
use agora::{config, AppState, SecurityHeaders};

async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    match cfg.storage {
        #[cfg(feature = "sqlite-store")]
        StorageBackend::Sqlite => {
            let repo = agora::repo::sqlite::SqliteRepo::connect(&cfg.database_url).await?;
            info!("Using SQLite repository backend");
            Ok(Arc::new(repo))
        }
        #[cfg(feature = "inmem-store")]
        StorageBackend::Memory => {
            use agora::repo::inmem::InMemRepo;
            let repo = match &cfg.data_dir {
                Some(dir) => InMemRepo::with_snapshot_dir(dir),
                None => InMemRepo::new(),
            };
            info!("Using in-memory repository backend");
            Ok(Arc::new(repo))
        }
        #[allow(unreachable_patterns)]
        ref other => anyhow::bail!("storage backend {other:?} not compiled in"),
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = AppConfig::from_env();
    info!(storage = ?cfg.storage, port = cfg.port, "Bootstrapping agora server");

    let repo = build_repo(&cfg).await?;
    if cfg.seed_default_communities {
        seed_default_communities(repo.as_ref()).await?;
    }

    let mut state = AppState::new(repo);
    if cfg.rate_limits_enabled {
        state = state.with_rate_limiter(RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg.rate_limits.clone()));
    }
    let state = web::Data::new(state);
    let openapi = ApiDoc::openapi();

    let server_cfg = cfg.clone();
    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                // local frontend dev servers
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allowed_origin("http://localhost:8080")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "OPTIONS"])
                .max_age(3600);
            if let Some(front) = &server_cfg.frontend_url {
                c = c.allowed_origin(front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::new(server_cfg.enable_hsts))
            .wrap(cors)
            .app_data(state.clone())
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind((cfg.bind_addr.as_str(), cfg.port))?;

    info!("Listening on http://{}:{}", cfg.bind_addr, cfg.port);

    server.run().await?;
    Ok(())
}
