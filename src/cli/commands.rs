//! CLI subcommand definitions

use clap::{Args, Subcommand, ValueEnum};

/// Main CLI commands
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Sign in and store the session token
    Login {
        /// Account name
        #[arg(short, long)]
        username: String,
        /// Password (falls back to RIEGO_PASSWORD)
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show who is signed in and when the token expires
    Status,
    /// GET an API path with the session's credentials and print the JSON
    Get {
        /// Path relative to the base URL (e.g. /Cultivos)
        path: String,
    },
    /// Send a write request (create, update, delete) with the session's credentials
    Send {
        #[arg(value_enum, ignore_case = true)]
        method: WriteMethod,
        /// Path relative to the base URL (e.g. /cultivos/3)
        path: String,
        /// JSON request body
        #[arg(short, long, value_name = "JSON")]
        data: Option<String>,
    },
    /// Load a line-delimited JSON stream incrementally
    Stream(StreamArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum WriteMethod {
    Post,
    Put,
    Delete,
}

#[derive(Debug, Args)]
pub(crate) struct StreamArgs {
    /// Stream path (default: /Lecturas/geo-lecturas-stream)
    pub(crate) path: Option<String>,

    /// Records per flushed batch
    #[arg(long, value_name = "N")]
    pub(crate) batch_size: Option<usize>,

    /// Flush pending records after this many milliseconds
    #[arg(long, value_name = "MS")]
    pub(crate) flush_interval_ms: Option<u64>,

    /// Stop once at least N records have been loaded
    #[arg(long, value_name = "N")]
    pub(crate) limit: Option<u64>,

    /// Count records per distinct value of this field
    #[arg(long, value_name = "FIELD")]
    pub(crate) group_by: Option<String>,
}
