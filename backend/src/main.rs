//! API process entry-point: wires REST endpoints and OpenAPI docs.

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
#[cfg(debug_assertions)]
use utoipa::OpenApi;
#[cfg(debug_assertions)]
use utoipa_swagger_ui::SwaggerUi;

#[cfg(debug_assertions)]
use backend::doc::ApiDoc;
use backend::outbound::persistence::{DbPool, PoolConfig};
use backend::outbound::queue::RedisJobQueue;
use backend::server::config::AppConfig;
use backend::server::{build_http_state, routes};
use backend::RequestTrace;

/// Application bootstrap.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let config = AppConfig::from_env().map_err(std::io::Error::other)?;

    let pool = DbPool::new(PoolConfig::new(&config.database_url))
        .await
        .map_err(std::io::Error::other)?;
    let queue = RedisJobQueue::connect(&config.redis_url, "mail:jobs")
        .await
        .map_err(std::io::Error::other)?;

    let state = build_http_state(pool, Arc::new(queue), &config);
    let port = config.api_port;
    info!(port, "API listening");

    HttpServer::new(move || {
        let app = App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(RequestTrace)
            .configure(routes);

        #[cfg(debug_assertions)]
        let app =
            app.service(SwaggerUi::new("/docs/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()));

        app
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
