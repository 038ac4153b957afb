use clap::{Args, Parser, Subcommand};

use crate::types::{KindArg, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "photomirror",
    version,
    about = "Incrementally mirror photo collections into a local index and file store"
)]
pub struct Cli {
    /// Log level (RUST_LOG overrides)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Path of the local index database
    #[arg(
        long,
        env = "PHOTOMIRROR_DB",
        default_value = "~/.photomirror/index.db",
        global = true
    )]
    pub db: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sync one or more collections, given as URLs or bare ids
    Sync(SyncArgs),

    /// Sync every album or gallery an owner has
    SyncUser(SyncUserArgs),

    /// Clear every write lock left behind by a crashed run
    Unlock(UnlockArgs),

    /// Show a summary of the local index
    Status(StatusArgs),

    /// Blacklist, mark deleted, or clear the flags of a photo or collection
    Mark(MarkArgs),
}

/// Connection, identity and retry settings shared by the syncing commands.
#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    /// API keys, comma-separated
    #[arg(long = "api-key", env = "PHOTOMIRROR_API_KEYS", value_delimiter = ',')]
    pub api_keys: Vec<String>,

    /// User agents, separated by '|'
    #[arg(long = "user-agent", env = "PHOTOMIRROR_USER_AGENTS", value_delimiter = '|')]
    pub user_agents: Vec<String>,

    /// Proxy URLs, comma-separated
    #[arg(long = "proxy", env = "PHOTOMIRROR_PROXIES", value_delimiter = ',')]
    pub proxies: Vec<String>,

    /// REST endpoint of the remote API
    #[arg(long, default_value = crate::remote::api::DEFAULT_API_BASE_URL)]
    pub api_base_url: String,

    /// Items requested per listing page
    #[arg(long, default_value_t = 500)]
    pub per_page: u32,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,

    /// Retries after the first attempt of a failed request
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Base delay before the first retry, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub retry_delay_ms: u64,

    /// Upper bound on the backoff delay, in milliseconds
    #[arg(long, default_value_t = 60_000)]
    pub max_retry_delay_ms: u64,

    /// HTTP status treated as transient (repeatable; replaces the default set)
    #[arg(long = "retry-status")]
    pub retry_statuses: Vec<u16>,
}

/// Flags controlling one sync run.
#[derive(Args, Debug, Clone)]
pub struct SyncFlags {
    /// Directory files are stored under
    #[arg(short = 'd', long, env = "PHOTOMIRROR_DIRECTORY", default_value = "~/Pictures/photomirror")]
    pub directory: String,

    /// Skip collections that completed a sync before
    #[arg(long)]
    pub ignore_completed: bool,

    /// Re-list collections and compare CDN file names regardless of timestamps
    #[arg(long)]
    pub distrust_timestamps: bool,

    /// Refetch every listed photo instead of trusting the index
    #[arg(long = "no-trust-photo-records")]
    pub no_trust_photo_records: bool,

    /// Draw a fresh identity for every file instead of pinning one
    #[arg(long)]
    pub switch_identities: bool,

    /// Update the index only; never fetch files
    #[arg(long)]
    pub index_only: bool,

    /// Files fetched concurrently per batch (1 fetches each file immediately)
    #[arg(long, default_value_t = 1)]
    pub batch_size: usize,

    /// Timeout for one file download, covering the whole body, in seconds
    #[arg(long, default_value_t = 300)]
    pub download_timeout_secs: u64,

    /// Disable progress bars
    #[arg(long)]
    pub no_progress_bar: bool,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Collection URLs, or bare ids when --kind is given
    #[arg(required = true)]
    pub inputs: Vec<String>,

    /// Kind of the bare ids given as inputs
    #[arg(long, value_enum)]
    pub kind: Option<KindArg>,

    /// Owner of the bare ids (alias or canonical id)
    #[arg(long, requires = "kind")]
    pub owner: Option<String>,

    #[command(flatten)]
    pub flags: SyncFlags,

    #[command(flatten)]
    pub remote: RemoteArgs,
}

#[derive(Args, Debug)]
pub struct SyncUserArgs {
    /// Owner alias or canonical id
    pub owner: String,

    /// Which of the owner's collections to sync
    #[arg(long, value_enum)]
    pub kind: KindArg,

    #[command(flatten)]
    pub flags: SyncFlags,

    #[command(flatten)]
    pub remote: RemoteArgs,
}

#[derive(Args, Debug)]
pub struct UnlockArgs {
    /// Clear locks without asking
    #[arg(short = 'y', long)]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// List photos whose last download failed
    #[arg(long)]
    pub failed: bool,
}

#[derive(Args, Debug)]
#[command(group(clap::ArgGroup::new("target").required(true).args(["photo", "kind"])))]
#[command(group(clap::ArgGroup::new("action").required(true).args(["blacklist", "delete", "clear"])))]
pub struct MarkArgs {
    /// Id as stored in the index (collections of owner-keyed kinds use the
    /// owner's canonical id)
    pub id: String,

    /// The id names a photo
    #[arg(long)]
    pub photo: bool,

    /// The id names a collection of this kind
    #[arg(long, value_enum)]
    pub kind: Option<KindArg>,

    /// Never sync or fetch it again
    #[arg(long)]
    pub blacklist: bool,

    /// Record that it is gone upstream
    #[arg(long)]
    pub delete: bool,

    /// Clear both flags
    #[arg(long)]
    pub clear: bool,
}
