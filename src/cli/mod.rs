//! CLI commands: bring up the configuration layer, run migrations, and
//! either start the server or perform one-off administrative tasks.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;

use foiacquire::auth::hash_password;
use foiacquire::config::{Config, Settings};
use foiacquire::models::{Role, User};
use foiacquire::repository::{pool::DbPool, DieselDbContext, UserRepository};

#[derive(Parser)]
#[command(name = "foia")]
#[command(about = "Scanned-document archive: routing, QC, organisation, merge, and retrieval")]
#[command(version)]
pub struct Cli {
    /// Override the data directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database schema.
    Init,

    /// Start the HTTP server.
    Serve {
        /// Bind address: a bare port, a bare host, or "host:port".
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
    },

    /// Create a user account.
    CreateUser {
        username: String,
        password: String,
        #[arg(long, default_value = "general")]
        department: String,
        #[arg(long, default_value_t = 0)]
        clearance_level: u8,
        #[arg(long, value_enum, default_value = "viewer")]
        role: CliRole,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliRole {
    Viewer,
    Operator,
    Admin,
}

impl From<CliRole> for Role {
    fn from(r: CliRole) -> Self {
        match r {
            CliRole::Viewer => Role::Viewer,
            CliRole::Operator => Role::Operator,
            CliRole::Admin => Role::Admin,
        }
    }
}

pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

async fn load_settings(data_dir_override: Option<PathBuf>) -> Settings {
    let (mut settings, _config) = Settings::load().await;
    if let Some(dir) = data_dir_override {
        settings.data_dir = dir;
    }
    settings
}

fn parse_bind_address(bind: &str) -> anyhow::Result<(String, u16)> {
    if let Ok(port) = bind.parse::<u16>() {
        return Ok(("0.0.0.0".to_string(), port));
    }
    if let Some((host, port_str)) = bind.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return Ok((host.to_string(), port));
        }
    }
    Ok((bind.to_string(), 8080))
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.data_dir).await;

    match cli.command {
        Commands::Init => cmd_init(&settings).await,
        Commands::Serve { bind } => {
            let (host, port) = parse_bind_address(&bind)?;
            println!("{} starting foiacquire server at http://{host}:{port}", style("→").cyan());
            foiacquire::server::serve(settings, &host, port).await
        }
        Commands::CreateUser {
            username,
            password,
            department,
            clearance_level,
            role,
        } => cmd_create_user(&settings, username, password, department, clearance_level, role.into()).await,
    }
}

async fn db_context(settings: &Settings) -> anyhow::Result<DieselDbContext> {
    std::fs::create_dir_all(&settings.data_dir)?;
    let pool = DbPool::connect(&settings.database_url, 10).await?;
    let ctx = DieselDbContext::new(pool);
    ctx.init_schema().await?;
    Ok(ctx)
}

async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    std::fs::create_dir_all(settings.archive_root())?;
    std::fs::create_dir_all(settings.local_storage_root())?;
    std::fs::create_dir_all(settings.feedback_dir())?;
    let ctx = db_context(settings).await?;
    let _ = Config::load().await.record_to_db(&ctx).await;
    println!("{} initialized foiacquire in {}", style("✓").green(), settings.data_dir.display());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_create_user(
    settings: &Settings,
    username: String,
    password: String,
    department: String,
    clearance_level: u8,
    role: Role,
) -> anyhow::Result<()> {
    let ctx = db_context(settings).await?;
    let password_hash = hash_password(&password)?;
    let user = User {
        user_id: uuid::Uuid::new_v4().to_string(),
        username: username.clone(),
        password_hash,
        department,
        clearance_level,
        roles: vec![role],
        email: None,
        active: true,
        attributes: Default::default(),
    };
    UserRepository(&ctx).insert(&user).await?;
    println!("{} created user {username}", style("✓").green());
    Ok(())
}
