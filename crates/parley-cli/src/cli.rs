use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api/";
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8000/ws/";
pub const DEFAULT_STORE_PATH: &str = "parley.db";

#[derive(Debug, Parser)]
#[command(name = "parley", version, about = "Terminal client for the Parley chat service")]
pub struct Cli {
    /// REST API base URL
    #[arg(long, env = "PARLEY_API_URL", default_value = DEFAULT_API_URL, global = true)]
    pub api_url: String,

    /// WebSocket base URL for live updates
    #[arg(long, env = "PARLEY_WS_URL", default_value = DEFAULT_WS_URL, global = true)]
    pub ws_url: String,

    /// Where the session is kept between runs
    #[arg(long, env = "PARLEY_STORE_PATH", default_value = DEFAULT_STORE_PATH, value_name = "FILE", global = true)]
    pub store: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create an account
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(long, env = "PARLEY_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Sign in and keep the session
    Login {
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(long, env = "PARLEY_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// List users you can message
    Contacts {
        #[arg(long)]
        search: Option<String>,
    },
    /// List groups
    Groups {
        /// Filter by group name
        #[arg(long)]
        name: Option<String>,
    },
    /// Print a conversation
    History {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Send a message with text, a file, or both
    Send {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        text: Option<String>,
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,
    },
    /// Delete one of your messages
    Delete { id: i64 },
    /// Open a conversation with live updates
    Chat {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Group administration
    #[command(subcommand)]
    Group(GroupCommand),
    /// Upload a new profile picture
    ProfilePicture { path: PathBuf },
}

#[derive(Debug, Subcommand)]
pub enum GroupCommand {
    /// Create a group with the given members
    Create {
        name: String,
        /// Usernames, comma separated or repeated
        #[arg(long = "member", value_delimiter = ',', required = true)]
        members: Vec<String>,
    },
    AddUser { group: String, username: String },
    RemoveUser { group: String, username: String },
    Delete { name: String },
    /// Replace the group icon
    Icon { group: String, path: PathBuf },
}

/// Exactly one of `--user` or `--group`.
#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
pub struct TargetArgs {
    /// Username of the other participant
    #[arg(long)]
    pub user: Option<String>,

    /// Group name
    #[arg(long)]
    pub group: Option<String>,
}
