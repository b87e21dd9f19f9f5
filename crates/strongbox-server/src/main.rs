use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use strongbox_auth::AuthResolver;
use strongbox_common::error::StrongboxError;
use strongbox_http::{AppState, HtmlView, Server, ServerConfig, StorageRoot};
use strongbox_iam::{IdentitySys, SessionStore, UserStore};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "strongbox", about = "File storage server with per-user folders")]
struct Cli {
    #[arg(long, env = "STRONGBOX_HOST", default_value = "localhost")]
    host: String,

    #[arg(long, env = "STRONGBOX_PORT", default_value_t = 8080)]
    port: u16,

    /// Connections served at once; also the listen backlog.
    #[arg(long, env = "STRONGBOX_PARALLEL", default_value_t = 5)]
    parallel: u32,

    /// Idle read timeout in seconds.
    #[arg(long, env = "STRONGBOX_TIMEOUT", default_value_t = 10)]
    timeout: u64,

    /// Session lifetime in seconds.
    #[arg(long, env = "STRONGBOX_COOKIE_PERSIST_TIME", default_value_t = 3600)]
    cookie_persist_time: u64,

    #[arg(long, env = "STRONGBOX_SERVER", default_value = "Strongbox HTTP Server/1.0")]
    server: String,

    #[arg(long, env = "STRONGBOX_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Account created at startup, as `name:password`.
    #[arg(
        long = "seed-user",
        env = "STRONGBOX_SEED_USERS",
        value_delimiter = ',',
        value_parser = parse_seed_user,
        default_values = ["client1:123", "client2:123", "client3:123"]
    )]
    seed_users: Vec<SeedUser>,

    #[arg(long, env = "STRONGBOX_LOG_JSON", default_value_t = false)]
    log_json: bool,

    #[arg(long, env = "STRONGBOX_DEBUG", default_value_t = false)]
    debug: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct SeedUser {
    name: String,
    secret: String,
}

fn parse_seed_user(value: &str) -> Result<SeedUser, String> {
    let (name, secret) = value
        .split_once(':')
        .ok_or_else(|| format!("expected name:password, got {value:?}"))?;
    let name = name.trim().to_lowercase();
    if name.is_empty() || secret.is_empty() {
        return Err(format!("expected name:password, got {value:?}"));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(format!("{name:?} is not usable as a folder name"));
    }
    Ok(SeedUser {
        name,
        secret: secret.to_string(),
    })
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            parallel: self.parallel,
            read_timeout: Duration::from_secs(self.timeout),
            cookie_ttl: Duration::from_secs(self.cookie_persist_time),
            server_name: self.server.clone(),
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let directive = if cli.debug { "strongbox=debug" } else { "strongbox=info" };
    let env_filter = EnvFilter::from_default_env().add_directive(directive.parse()?);
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let storage_dir = cli.data_dir.join("storage");
    tokio::fs::create_dir_all(&storage_dir).await?;
    let root = StorageRoot::new(&storage_dir)?;
    let identity = Arc::new(IdentitySys::new(cli.data_dir.join("identity")).await?);

    for seed in &cli.seed_users {
        match identity.create_user(&seed.name, &seed.secret).await {
            Ok(user) => info!(user = %user.name, "seeded user"),
            Err(StrongboxError::UserAlreadyExists(_)) => {
                debug!(user = %seed.name, "seed user already present")
            }
            Err(err) => return Err(err.into()),
        }
        let folder = root.resolve(&seed.name)?;
        tokio::fs::create_dir_all(&folder.absolute).await?;
    }
    info!(users = identity.user_count()?, "identity store loaded");

    let sweeper = Arc::clone(&identity);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            match sweeper.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => debug!(purged, "expired sessions removed"),
                Err(err) => warn!(error = %err, "session sweep failed"),
            }
        }
    });

    let config = cli.server_config();
    let auth = AuthResolver::new(identity.clone(), identity, config.cookie_ttl);
    let app = AppState::new(config, root, auth, Arc::new(HtmlView));

    let server = Server::bind(app).await?;
    info!(
        addr = %server.local_addr()?,
        storage = %storage_dir.display(),
        "strongbox server ready"
    );
    server
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await;
    info!("shutting down");

    Ok(())
}
