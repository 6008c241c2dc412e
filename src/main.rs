use actix_cors::Cors;
use actix_web::{
    middleware::{DefaultHeaders, Logger},
    web, App, HttpResponse, HttpServer, Responder,
};
use blogbase_backend::{
    config::Config,
    helper::mailer::Mailer,
    middleware::{CsrfProtection, CsrfStore, RateLimit, SlidingWindow},
    routes, AppState,
};
use chrono::Duration;
use clap::Parser;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

async fn root_handler() -> impl Responder {
    HttpResponse::Ok().content_type("text/plain").body("OK")
}

#[derive(Parser, Debug)]
#[command(name = "blogbase_server", author, version, about = "Starts the BlogBase API server.")]
struct Cli {
    /// Path to the .env configuration file.
    #[arg(long, required = true, value_name = "FILE")]
    env_file: PathBuf,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env(&cli.env_file)
        .expect("FATAL: Failed to load or parse configuration.");

    env_logger::init_from_env(env_logger::Env::new().default_filter_or(&config.log_level));

    fs::create_dir_all(&config.database_path).expect("Failed to create database directory");
    fs::create_dir_all(&config.media_path).expect("Failed to create media directory");

    let manager = SqliteConnectionManager::file(config.db_path());
    let pool = Pool::builder()
        .build(manager)
        .expect("FATAL: Failed to create SQLite connection pool.");

    {
        let conn = pool
            .get()
            .expect("Failed to get DB connection for startup check.");
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'users'",
                [],
                |row| row.get(0),
            )
            .expect("Failed to inspect database schema.");
        if tables == 0 {
            panic!(
                "FATAL: database schema missing. Run 'cargo run --bin setup_cli -- --env-file <path> db setup'"
            );
        }
    }

    let app_state = web::Data::new(AppState {
        csrf: Arc::new(CsrfStore::new()),
        api_limiter: Arc::new(SlidingWindow::new(
            config.api_rate_limit as usize,
            Duration::minutes(15),
        )),
        auth_limiter: Arc::new(SlidingWindow::new(
            config.auth_rate_limit as usize,
            Duration::hours(1),
        )),
        mailer: Mailer::new("no-reply@blogbase.local"),
    });

    let server_address = format!("{}:{}", config.web.host, config.web.port);
    println!("🚀 Server starting at http://{}", server_address);

    HttpServer::new(move || {
        let cors = {
            let allowed_origins_str = &config.allowed_origins;
            if allowed_origins_str.trim() == "*" {
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                        actix_web::http::header::HeaderName::from_static("x-csrf-token"),
                    ])
                    .supports_credentials()
                    .max_age(3600)
            } else {
                let mut cors = Cors::default();
                let origins: Vec<&str> = allowed_origins_str
                    .split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .collect();
                for origin in origins {
                    cors = cors.allowed_origin(origin);
                }
                cors.allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                        actix_web::http::header::HeaderName::from_static("x-csrf-token"),
                    ])
                    .supports_credentials()
                    .max_age(3600)
            }
        };

        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY"))
                    .add(("X-XSS-Protection", "1; mode=block")),
            )
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(pool.clone()))
            .app_data(app_state.clone())
            .service(actix_files::Files::new("/media", &config.media_path))
            .route("/", web::get().to(root_handler))
            .service(
                web::scope("/api")
                    .wrap(CsrfProtection::new(app_state.csrf.clone()))
                    .wrap(RateLimit::new(app_state.api_limiter.clone()))
                    .service(
                        web::scope("/auth")
                            .wrap(RateLimit::new(app_state.auth_limiter.clone()))
                            .configure(routes::auth::config_auth),
                    )
                    .configure(routes::posts::config_posts)
                    .configure(routes::comments::config_comments)
                    .configure(routes::tags::config_tags)
                    .configure(routes::users::config_users),
            )
    })
    .bind(server_address)?
    .run()
    .await
}
