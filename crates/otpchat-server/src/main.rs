//! otpchat server binary.
//!
//! # Usage
//!
//! ```bash
//! # Local development: in-memory storage, HS256 tokens
//! otpchat-server --dev-token-secret change-me
//! otpchat-server --dev-token-secret change-me --issue-dev-token alice@example.com
//! otpchat-server --decrypt 496b --decrypt-key 0102
//!
//! # Production: provider tokens, durable storage
//! AUTH0_DOMAIN=tenant.auth0.com AUTH0_AUDIENCE=https://api.example.com \
//!     otpchat-server --database /var/lib/otpchat/otpchat.redb
//! ```

use std::{path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use otpchat_server::{
    AuthConfig, Encoding, MessageLimits, ProviderConfig, Server, ServerError, ServerRuntimeConfig,
    auth::{DEFAULT_DEV_TOKEN_TTL, issue_dev_token},
    identity::ManagementConfig,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EncodingArg {
    Hex,
    Base64,
}

impl From<EncodingArg> for Encoding {
    fn from(arg: EncodingArg) -> Self {
        match arg {
            EncodingArg::Hex => Encoding::Hex,
            EncodingArg::Base64 => Encoding::Base64,
        }
    }
}

/// One-time-pad messaging server
#[derive(Parser, Debug)]
#[command(name = "otpchat-server")]
#[command(about = "One-time-pad messaging server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, env = "OTPCHAT_BIND", default_value = "0.0.0.0:8000")]
    bind: String,

    /// redb database file (in-memory storage if omitted)
    #[arg(long, env = "OTPCHAT_DATABASE")]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Maximum plaintext length in characters
    #[arg(long, default_value = "5000")]
    max_plaintext_chars: usize,

    /// Maximum note length in characters
    #[arg(long, default_value = "255")]
    max_note_chars: usize,

    /// Wire encoding of ciphertext and keys
    #[arg(long, value_enum, default_value = "hex")]
    encoding: EncodingArg,

    /// Identity provider tenant domain
    #[arg(long, env = "AUTH0_DOMAIN")]
    auth0_domain: Option<String>,

    /// API identifier provider tokens must carry
    #[arg(long, env = "AUTH0_AUDIENCE")]
    auth0_audience: Option<String>,

    /// Secret for local HS256 development tokens
    #[arg(long, env = "SECRET_KEY", hide_env_values = true)]
    dev_token_secret: Option<String>,

    /// Minimum seconds between key set refetches for unknown key ids
    #[arg(long, default_value = "60")]
    jwks_refetch_cooldown_secs: u64,

    /// Management API client id
    #[arg(long, env = "AUTH0_CLIENT_ID")]
    management_client_id: Option<String>,

    /// Management API client secret
    #[arg(long, env = "AUTH0_CLIENT_SECRET", hide_env_values = true)]
    management_client_secret: Option<String>,

    /// Print a local development token for this email and exit
    #[arg(long, value_name = "EMAIL")]
    issue_dev_token: Option<String>,

    /// Decrypt a ciphertext from an inbox response and exit
    #[arg(long, value_name = "CIPHERTEXT", requires = "decrypt_key")]
    decrypt: Option<String>,

    /// Key for --decrypt, in the same encoding
    #[arg(long, value_name = "KEY", requires = "decrypt")]
    decrypt_key: Option<String>,
}

impl Args {
    fn provider(&self) -> Option<ProviderConfig> {
        match (&self.auth0_domain, &self.auth0_audience) {
            (Some(domain), Some(audience)) if !domain.is_empty() && !audience.is_empty() => {
                Some(ProviderConfig { domain: domain.clone(), audience: audience.clone() })
            },
            (None, None) => None,
            _ => {
                tracing::warn!("provider domain and audience must both be set, tokens disabled");
                None
            },
        }
    }

    fn management(&self) -> Result<Option<ManagementConfig>, ServerError> {
        match (&self.auth0_domain, &self.management_client_id, &self.management_client_secret) {
            (_, None, None) => Ok(None),
            (Some(domain), Some(id), Some(secret)) => {
                Ok(Some(ManagementConfig::for_domain(domain, id.clone(), secret.clone())))
            },
            _ => Err(ServerError::Config(
                "management API needs provider domain, client id and client secret".to_string(),
            )),
        }
    }

    fn into_config(self) -> Result<ServerRuntimeConfig, ServerError> {
        let auth = AuthConfig {
            provider: self.provider(),
            dev_token_secret: self.dev_token_secret.clone(),
            jwks_refetch_cooldown: Duration::from_secs(self.jwks_refetch_cooldown_secs),
            ..AuthConfig::default()
        };
        let management = self.management()?;

        Ok(ServerRuntimeConfig {
            bind_address: self.bind,
            database_path: self.database,
            limits: MessageLimits {
                max_plaintext_chars: self.max_plaintext_chars,
                max_note_chars: self.max_note_chars,
            },
            encoding: self.encoding.into(),
            auth,
            management,
        })
    }
}

#[allow(clippy::print_stdout)]
fn print_line(line: &str) {
    println!("{line}");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if let Some(email) = &args.issue_dev_token {
        let secret = args
            .dev_token_secret
            .as_deref()
            .ok_or_else(|| ServerError::Config("--issue-dev-token needs a secret".to_string()))?;
        let token = issue_dev_token(secret, email, DEFAULT_DEV_TOKEN_TTL)?;
        print_line(&token);
        return Ok(());
    }

    if let (Some(ciphertext), Some(key)) = (&args.decrypt, &args.decrypt_key) {
        let plaintext = otpchat_crypto::open(args.encoding.into(), ciphertext, key)?;
        print_line(&String::from_utf8_lossy(&plaintext));
        return Ok(());
    }

    tracing::info!("otpchat server starting");
    tracing::info!("Binding to {}", args.bind);

    let server = Server::bind(args.into_config()?).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
