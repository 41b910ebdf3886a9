use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use modportal_client::{ApiClient, ApiConfig, FileTokenStore, LoggingNavigator};
use modportal_views::SessionContext;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_TOKEN_PATH: &str = ".modportal/access_token";

#[derive(Debug, Parser)]
#[command(name = "modportal")]
#[command(about = "Moderator portal for the opportunity platform")]
struct Cli {
    /// File holding the access token between CLI invocations.
    #[arg(long, env = "MODPORTAL_TOKEN_PATH", default_value = DEFAULT_TOKEN_PATH, global = true)]
    token_path: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the web portal.
    Serve,
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "MODPORTAL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    Whoami,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,modportal_client=info,modportal_web=info"));
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("MODPORTAL_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn file_client(token_path: PathBuf) -> Result<ApiClient> {
    ApiClient::new(
        &ApiConfig::from_env(),
        Arc::new(FileTokenStore::new(token_path)),
        Arc::new(LoggingNavigator),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let cli = Cli::parse();
    info!(token_path = %cli.token_path.display(), "modportal starting");

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => modportal_web::serve_from_env().await?,
        Commands::Login { email, password } => {
            let client = file_client(cli.token_path)?;
            if let Err(err) = modportal_views::login(&client, &email, &password).await {
                bail!("login failed: {err}");
            }
            info!(%email, "login succeeded");
            let session = SessionContext::load(client).await;
            match session.user() {
                Some(user) => println!("logged in as {} (rank #{})", user.name, user.rank),
                None => println!("logged in"),
            }
        }
        Commands::Logout => {
            let mut session = SessionContext::new(file_client(cli.token_path)?);
            session.logout().await;
            info!("token cleared");
            println!("logged out");
        }
        Commands::Whoami => {
            let session = SessionContext::load(file_client(cli.token_path)?).await;
            match (session.user(), session.error()) {
                (Some(user), _) => {
                    println!("{} <{}>", user.name, user.email.as_deref().unwrap_or("-"));
                    println!(
                        "rank #{} · {} posts · {} engagement",
                        user.rank, user.stats.total_posts, user.stats.total_engagement
                    );
                }
                (None, Some(err)) => bail!("{err}"),
                (None, None) => println!("not logged in"),
            }
        }
    }

    Ok(())
}
