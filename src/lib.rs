#[macro_use]
extern crate rocket;

pub mod abtest;
pub mod analytics;
pub mod auth;
pub mod config;
pub mod db;
pub mod emails;
pub mod error;
pub mod export;
pub mod gdpr;
pub mod import;
pub mod jobs;
pub mod models;
pub mod request_logger;
pub mod routes;

use crate::abtest::AbTestService;
use crate::analytics::{HeatmapService, TrackingService};
use crate::auth::AuthState;
use crate::config::AppConfig;
use crate::db::MarketingDb;
use crate::export::ExportService;
use crate::gdpr::GdprService;
use crate::import::ImportService;
use crate::jobs::dispatcher::JobDispatcher;
use crate::request_logger::RequestLogger;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::figment::Figment;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::{
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::Once;
use tokio_util::sync::CancellationToken;

static LOGGER: Once = Once::new();

/// Room for multipart boundaries and the options field next to the file.
const FORM_OVERHEAD_BYTES: u64 = 64 * 1024;

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

/// Rocket figment with the upload limits derived from `config`.
pub fn figment_with_limits(figment: Figment, config: &AppConfig) -> Figment {
    figment
        .merge(("limits.file", config.max_upload_bytes))
        .merge((
            "limits.data-form",
            config.max_upload_bytes + FORM_OVERHEAD_BYTES,
        ))
}

/// Register the pool, the configuration and every service handlers take as
/// `&State<_>`.
pub fn manage_services(rocket: Rocket<Build>, pool: PgPool, config: AppConfig) -> Rocket<Build> {
    rocket
        .manage(ImportService::new(pool.clone()))
        .manage(ExportService::new(pool.clone(), config.clone()))
        .manage(AbTestService::new(pool.clone()))
        .manage(GdprService::new(pool.clone()))
        .manage(TrackingService::new(pool.clone()))
        .manage(HeatmapService::new(pool.clone()))
        .manage(config)
        .manage(pool)
}

pub fn rocket() -> Rocket<Build> {
    init_logger();
    log::info!("Starting Marketing API Server");

    let app_config = AppConfig::from_env();
    match app_config.ensure_storage_dirs() {
        Ok(()) => log::info!(
            "storage directory initialized at: {}",
            app_config.storage_path.display()
        ),
        Err(e) => log::error!(
            "failed to create storage directories under {}: {}",
            app_config.storage_path.display(),
            e
        ),
    }

    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Patch,
            ]
            .into_iter()
            .map(From::from)
            .collect(),
        )
        .allow_credentials(true);

    let figment = figment_with_limits(rocket::Config::figment(), &app_config);
    let shutdown = CancellationToken::new();

    let mut rocket = rocket::custom(figment)
        .attach(RequestLogger)
        .attach(MarketingDb::init())
        .manage(shutdown)
        .register("/", error::catchers());

    match cors.to_cors() {
        Ok(cors) => rocket = rocket.attach(cors),
        Err(e) => log::error!("CORS disabled, invalid configuration: {}", e),
    }

    rocket
        .attach(AdHoc::try_on_ignite("Auth Configuration", |rocket| async move {
            match AuthState::from_env() {
                Ok(state) => Ok(rocket.manage(state)),
                Err(e) => {
                    log::error!("auth configuration failed: {}", e);
                    Err(rocket)
                }
            }
        }))
        // Run database migrations on startup
        .attach(AdHoc::try_on_ignite(
            "Run Migrations",
            |rocket| async move {
                match MarketingDb::fetch(&rocket) {
                    Some(db) => {
                        let pool = (**db).clone();
                        match db::run_migrations(&pool).await {
                            Ok(_) => {
                                log::info!("database migrations successful");
                                Ok(rocket)
                            }
                            Err(e) => {
                                log::error!("database migrations failed: {}", e);
                                Err(rocket)
                            }
                        }
                    }
                    None => {
                        log::error!("database pool not available for migrations");
                        Err(rocket)
                    }
                }
            },
        ))
        .attach(AdHoc::try_on_ignite(
            "Manage DB Pool and Services",
            move |rocket| async move {
                match MarketingDb::fetch(&rocket) {
                    Some(db) => {
                        let pool = (**db).clone();
                        Ok(manage_services(rocket, pool, app_config))
                    }
                    None => Err(rocket),
                }
            },
        ))
        .attach(AdHoc::on_liftoff("Spawn Job Dispatcher", |rocket| {
            Box::pin(async move {
                let pool = rocket.state::<PgPool>().cloned();
                let config = rocket.state::<AppConfig>().cloned();
                let shutdown = rocket.state::<CancellationToken>().cloned();
                match (pool, config, shutdown) {
                    (Some(pool), Some(config), Some(shutdown)) => {
                        tokio::spawn(async move {
                            log::info!("starting job dispatcher");
                            JobDispatcher::new(pool, config).run(shutdown).await
                        });
                    }
                    _ => log::error!("failed to spawn job dispatcher: managed state missing"),
                }
            })
        }))
        .attach(AdHoc::on_shutdown("Stop Job Dispatcher", |rocket| {
            Box::pin(async move {
                if let Some(shutdown) = rocket.state::<CancellationToken>() {
                    shutdown.cancel();
                }
            })
        }))
        .mount("/api/v1", routes::api_routes())
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Marketing API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use rocket_db_pools::sqlx::{self, PgPool};
    use std::path::PathBuf;

    use crate::auth::jwt::TokenSubject;
    use crate::auth::responses::Role;
    use crate::auth::{AuthConfig, AuthState, JwtService, PasswordService};
    use crate::config::AppConfig;

    pub use database::{TestDatabase, TestDatabaseError};

    pub const TEST_JWT_SECRET: &str = "integration-test-secret-with-enough-entropy";

    /// Auth state matching the tokens minted by [`TestFixtures::access_token`].
    pub fn test_auth_state() -> AuthState {
        let config = AuthConfig::with_secret(TEST_JWT_SECRET);
        let jwt = JwtService::from_config(&config).expect("jwt service");
        let passwords = PasswordService::new().expect("password service");
        AuthState::new(config, passwords, jwt)
    }

    /// Convenience helpers for seeding users and subscribers in tests.
    pub struct TestFixtures<'a> {
        pool: &'a PgPool,
    }

    impl<'a> TestFixtures<'a> {
        /// Create a fixture helper bound to the provided pool.
        pub fn new(pool: &'a PgPool) -> Self {
            Self { pool }
        }

        /// Insert a user row and optional local credentials, returning the new user id.
        pub async fn insert_user(
            &self,
            email: &str,
            display_name: Option<&str>,
            role: &str,
            password_hash: Option<&str>,
        ) -> Result<i32, sqlx::Error> {
            let user_id: i32 = sqlx::query_scalar(
                "INSERT INTO users (email, display_name, role) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(email)
            .bind(display_name.map(|name| name.to_string()))
            .bind(role)
            .fetch_one(self.pool)
            .await?;

            if let Some(hash) = password_hash {
                sqlx::query(
                    "INSERT INTO local_user_credentials (user_id, password_hash) VALUES ($1, $2)",
                )
                .bind(user_id)
                .bind(hash)
                .execute(self.pool)
                .await?;
            }

            Ok(user_id)
        }

        /// Insert a user and return `(id, bearer token)` for it.
        pub async fn user_with_token(&self, email: &str, role: &str) -> Result<(i32, String), sqlx::Error> {
            let user_id = self.insert_user(email, None, role, None).await?;
            Ok((user_id, self.access_token(user_id, email, role, 0)))
        }

        /// Mint a token with the test secret.
        pub fn access_token(&self, user_id: i32, email: &str, role: &str, token_version: i32) -> String {
            test_auth_state()
                .jwt_service
                .issue(TokenSubject {
                    user_id,
                    email,
                    role: Role::parse(role),
                    token_version,
                })
                .expect("token")
                .token
        }

        /// Insert a subscriber and return its id.
        pub async fn insert_subscriber(&self, email: &str, status: &str) -> Result<i32, sqlx::Error> {
            sqlx::query_scalar("INSERT INTO subscribers (email, status) VALUES ($1, $2) RETURNING id")
                .bind(email)
                .bind(status)
                .fetch_one(self.pool)
                .await
        }

        /// Insert a draft campaign and return its id.
        pub async fn insert_campaign(&self, name: &str) -> Result<i32, sqlx::Error> {
            sqlx::query_scalar(
                "INSERT INTO campaigns (name, subject, content) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(name)
            .bind(format!("{} subject", name))
            .bind("<p>Hello</p>")
            .fetch_one(self.pool)
            .await
        }
    }

    pub mod database {
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::{GenericImage, ImageExt, core::WaitFor};
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use uuid::Uuid;

        static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

        /// Every table holding per-test data, children first.
        const DATA_TABLES: &[&str] = &[
            "heatmap_events",
            "email_tracking",
            "data_subject_requests",
            "consent_records",
            "export_jobs",
            "import_results",
            "import_jobs",
            "campaign_variants",
            "campaigns",
            "subscribers",
            "segments",
            "subscriber_groups",
            "ticket_templates",
            "user_ai_preferences",
            "local_user_credentials",
            "users",
        ];

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        impl TestDatabaseError {
            /// No Docker daemon and no reachable `TEST_DATABASE_URL`.
            pub fn is_unavailable(&self) -> bool {
                matches!(
                    self,
                    TestDatabaseError::Container(_)
                        | TestDatabaseError::Sqlx(sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
                )
            }
        }

        /// A throwaway, fully migrated database. Each instance gets its own
        /// uniquely named database so tests can run in parallel.
        pub struct TestDatabase {
            pool: PgPool,
            server: PgConnectOptions,
            name: String,
            _container: Option<ContainerAsync<GenericImage>>,
        }

        impl TestDatabase {
            /// Use `TEST_DATABASE_URL` when set, otherwise start a disposable
            /// Postgres container.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                match std::env::var("TEST_DATABASE_URL") {
                    Ok(url) if !url.trim().is_empty() => Self::create_on(url.parse()?, None).await,
                    _ => Self::new().await,
                }
            }

            pub async fn new() -> Result<Self, TestDatabaseError> {
                let container = GenericImage::new("postgres", "16-alpine")
                    .with_wait_for(WaitFor::message_on_stderr(
                        "database system is ready to accept connections",
                    ))
                    .with_env_var("POSTGRES_PASSWORD", "postgres")
                    .start()
                    .await?;
                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let server = PgConnectOptions::new()
                    .host(&host)
                    .port(port)
                    .username("postgres")
                    .password("postgres");

                Self::create_on(server, Some(container)).await
            }

            async fn create_on(
                server: PgConnectOptions,
                container: Option<ContainerAsync<GenericImage>>,
            ) -> Result<Self, TestDatabaseError> {
                let server = server.log_statements(LevelFilter::Off).database("postgres");
                let name = format!("marketing_test_{}", Uuid::new_v4().simple());

                let admin = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(server.clone())
                    .await?;
                sqlx::query(&format!("CREATE DATABASE \"{}\"", name))
                    .execute(&admin)
                    .await?;
                admin.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(server.clone().database(&name))
                    .await?;
                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool,
                    server,
                    name,
                    _container: container,
                })
            }

            pub fn pool(&self) -> &PgPool {
                &self.pool
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool.clone()
            }

            /// Empty every data table and restart identities.
            pub async fn reset(&self) -> Result<(), TestDatabaseError> {
                let sql = format!(
                    "TRUNCATE {} RESTART IDENTITY CASCADE",
                    DATA_TABLES.join(", ")
                );
                sqlx::query(&sql).execute(&self.pool).await?;
                Ok(())
            }

            /// Close the pool and drop the database. A container, if any,
            /// stops when `self` goes out of scope.
            pub async fn close(self) -> Result<(), TestDatabaseError> {
                self.pool.close().await;
                let admin = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(self.server.clone())
                    .await?;
                sqlx::query(&format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", self.name))
                    .execute(&admin)
                    .await?;
                admin.close().await;
                Ok(())
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        pg_pool: Option<PgPool>,
        storage_path: Option<PathBuf>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                pg_pool: None,
                storage_path: None,
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        /// Manage a `PgPool` plus every service built on it.
        pub fn manage_pg_pool(mut self, pool: PgPool) -> Self {
            self.pg_pool = Some(pool);
            self
        }

        /// Root for uploaded and exported files; defaults to a fresh
        /// directory under the system temp dir.
        pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
            self.storage_path = Some(path.into());
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let storage_path = self.storage_path.unwrap_or_else(|| {
                std::env::temp_dir().join(format!("marketing-api-test-{}", uuid::Uuid::new_v4()))
            });
            let config = AppConfig {
                storage_path,
                ..AppConfig::default()
            };
            config
                .ensure_storage_dirs()
                .expect("test storage directories");

            let figment = crate::figment_with_limits(self.figment, &config);
            let mut rocket = rocket::custom(figment)
                .register("/", crate::error::catchers())
                .manage(test_auth_state());

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            match self.pg_pool {
                Some(pool) => crate::manage_services(rocket, pool, config),
                None => rocket.manage(config),
            }
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
