//! Bootstrap or recover a local account without going through the API.

use clap::{Parser, ValueEnum};
use sqlx::postgres::PgPoolOptions;

use marketing_api::auth::passwords::PasswordService;
use marketing_api::import::validation::{is_valid_syntax, normalize_email};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AccountRole {
    User,
    Admin,
}

impl AccountRole {
    fn as_str(self) -> &'static str {
        match self {
            AccountRole::User => "user",
            AccountRole::Admin => "admin",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "create_user", about = "Create a Marketing API account or reset its password")]
struct Args {
    /// Login email, stored lowercased.
    #[arg(long)]
    email: String,

    #[arg(long, env = "MARKETING_BOOTSTRAP_PASSWORD", hide_env_values = true)]
    password: String,

    #[arg(long)]
    display_name: Option<String>,

    #[arg(long, value_enum, default_value_t = AccountRole::User)]
    role: AccountRole,

    /// Replace the password of an existing account and revoke its tokens.
    #[arg(long)]
    reset_password: bool,
}

fn fail(message: impl std::fmt::Display) -> ! {
    log::error!("{message}");
    std::process::exit(1)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let email = normalize_email(&args.email)
        .filter(|email| is_valid_syntax(email))
        .unwrap_or_else(|| fail(format!("'{}' is not a valid email address", args.email)));
    if !PasswordService::is_acceptable(&args.password) {
        fail("password must be at least 8 characters");
    }

    let database_url = std::env::var("DATABASE_URL")
        .or_else(|_| std::env::var("ROCKET_DATABASES__MARKETING_DB__URL"))
        .map_err(|_| "DATABASE_URL is not set")?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await?;

    let password_hash = PasswordService::new()?.hash_password(&args.password)?;
    let mut tx = pool.begin().await?;

    let existing: Option<i32> = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&mut *tx)
        .await?;

    let user_id = match (existing, args.reset_password) {
        (Some(_), false) => fail(format!(
            "user '{email}' already exists; pass --reset-password to replace its password"
        )),
        (None, true) => fail(format!("no user '{email}' to reset")),
        (Some(user_id), true) => {
            sqlx::query(
                "UPDATE users SET token_version = token_version + 1, disabled = FALSE WHERE id = $1",
            )
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
            user_id
        }
        (None, false) => {
            sqlx::query_scalar(
                "INSERT INTO users (email, display_name, role) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(&email)
            .bind(args.display_name.as_deref())
            .bind(args.role.as_str())
            .fetch_one(&mut *tx)
            .await?
        }
    };

    sqlx::query(
        r#"INSERT INTO local_user_credentials (user_id, password_hash) VALUES ($1, $2)
           ON CONFLICT (user_id) DO UPDATE
           SET password_hash = EXCLUDED.password_hash, failed_attempts = 0, locked_until = NULL"#,
    )
    .bind(user_id)
    .bind(password_hash)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    if args.reset_password {
        log::info!("reset password for '{email}' (id {user_id}); existing tokens revoked");
    } else {
        log::info!("created {} user '{email}' with id {user_id}", args.role.as_str());
    }
    Ok(())
}
