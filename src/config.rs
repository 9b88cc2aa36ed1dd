use clap::builder::RangedU64ValueParser;
use clap::Parser;
use tokio::sync::Semaphore;

use crate::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::frame::DEFAULT_MAX_DEPTH;

pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Most clients that can be admitted at once, bounded by what a semaphore can hand out.
pub const MAX_CONNECTIONS_LIMIT: usize = Semaphore::MAX_PERMITS;
/// Deepest nesting that may be configured. Frames are built recursively, one level per array.
pub const MAX_NESTING_DEPTH_LIMIT: usize = 1024;

/// Server settings. Each one can be given as a flag or through the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "minidis", version, about)]
pub struct Config {
    /// The address to bind the listener to
    #[arg(long, env = "MINIDIS_BIND", default_value = DEFAULT_BIND)]
    pub bind: String,

    /// The port to listen on
    #[arg(short, long, env = "MINIDIS_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// How many clients are served at once. Further connections wait to be accepted until one of
    /// them disconnects
    #[arg(
        long,
        env = "MINIDIS_MAX_CONNECTIONS",
        default_value_t = DEFAULT_MAX_CONNECTIONS,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..=MAX_CONNECTIONS_LIMIT as u64)
    )]
    pub max_connections: usize,

    /// Most bytes buffered for a single incomplete frame
    #[arg(long, env = "MAX_FRAME_SIZE", default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,

    /// Deepest array nesting accepted from clients
    #[arg(
        long,
        env = "MINIDIS_MAX_NESTING_DEPTH",
        default_value_t = DEFAULT_MAX_DEPTH,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..=MAX_NESTING_DEPTH_LIMIT as u64)
    )]
    pub max_nesting_depth: usize,

    /// Reply with an error to unknown commands instead of dropping them silently
    #[arg(long, env = "MINIDIS_REPLY_UNKNOWN_COMMANDS")]
    pub reply_unknown_commands: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_nesting_depth: DEFAULT_MAX_DEPTH,
            reply_unknown_commands: false,
        }
    }
}

impl Config {
    /// Connection slots to hand out, kept within what the semaphore supports.
    pub fn connection_slots(&self) -> usize {
        self.max_connections.clamp(1, MAX_CONNECTIONS_LIMIT)
    }

    /// Array nesting accepted from clients, kept within what the parser can recurse through.
    pub fn nesting_depth(&self) -> usize {
        self.max_nesting_depth.clamp(1, MAX_NESTING_DEPTH_LIMIT)
    }
}
