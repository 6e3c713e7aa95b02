use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "sessionward")]
#[command(about = "Issue, rotate and revoke session tokens against the configured store")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file (defaults to sessionward.toml)
    #[arg(short, long, global = true, env = "SESSIONWARD_CONFIG")]
    pub config: Option<String>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Emit logs as JSON (overrides logging.json)
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Table,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a session for an authenticated user
    Issue(IssueArgs),
    /// Exchange a refresh token for a new token pair
    Refresh(TokenArgs),
    /// Revoke a single refresh token (logout)
    Revoke(TokenArgs),
    /// Revoke every session of a user, or one session by id
    RevokeAll(RevokeAllArgs),
    /// Verify an access token and print its claims
    Verify(TokenArgs),
    /// List the active sessions of a user
    Sessions(SessionsArgs),
    /// Show every refresh token issued in a session
    Lineage(LineageArgs),
    /// Delete expired records once
    Sweep,
    /// Generate signing key material
    Keygen(KeygenArgs),
}

#[derive(clap::Args)]
pub struct IssueArgs {
    /// Authenticated user id
    pub user_id: String,
    /// Role carried in every access token of the session
    #[arg(short, long)]
    pub role: Option<String>,
    /// Extra claim as key=value (repeatable)
    #[arg(long = "claim", value_name = "KEY=VALUE")]
    pub claims: Vec<String>,
}

#[derive(clap::Args)]
pub struct TokenArgs {
    /// Token presented by the client
    pub token: String,
}

#[derive(clap::Args)]
#[group(required = true, multiple = false)]
pub struct RevokeAllArgs {
    /// Revoke every session of this user
    #[arg(long)]
    pub user: Option<String>,
    /// Revoke this session (the `sid` claim of an access token)
    #[arg(long)]
    pub family: Option<String>,
}

#[derive(clap::Args)]
pub struct SessionsArgs {
    /// User id
    pub user_id: String,
}

#[derive(clap::Args)]
pub struct LineageArgs {
    /// Session (family) id
    pub family_id: String,
}

#[derive(clap::Args)]
pub struct KeygenArgs {
    /// Signing algorithm (HS256, HS384, HS512, RS256, RS384, ES384)
    #[arg(short, long, default_value = "ES384")]
    pub algorithm: String,
    /// Key id to put in the printed configuration snippet
    #[arg(long, default_value = "primary")]
    pub kid: String,
}
