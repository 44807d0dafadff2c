use std::net::TcpListener;
use std::sync::Arc;

use actix_web::dev::Server;
use actix_web::{App, HttpServer, web};
use config::shared::Settings;
use sluice::connections::PoolRegistry;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_actix_web::TracingLogger;

use crate::routes;

/// A built but not yet running API server.
pub struct Application {
    server: Server,
    port: u16,
}

impl Application {
    /// Connects the application database, runs migrations and binds the
    /// listener.
    pub async fn build(settings: &Settings) -> anyhow::Result<Application> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect_with(settings.database.connect_options())
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        let registry = Arc::new(PoolRegistry::new());

        let address = format!("{}:{}", settings.api.host, settings.api.port);
        let listener = TcpListener::bind(&address)?;
        let port = listener.local_addr()?.port();
        info!(%address, "api listening");

        let server = run(listener, pool, registry)?;

        Ok(Application { server, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

fn run(
    listener: TcpListener,
    pool: PgPool,
    registry: Arc<PoolRegistry>,
) -> Result<Server, std::io::Error> {
    let pool = web::Data::new(pool);
    let registry = web::Data::from(registry);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .configure(routes::configure)
            .app_data(pool.clone())
            .app_data(registry.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
