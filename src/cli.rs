//! # Command-Line Interface Module
//!
//! Process-level configuration for a clustermq node: which node id this
//! process is, where its IPC socket lives, and how verbosely it logs.
//! Uses `clap`'s derive API the same way the teacher's benchmark CLI did,
//! plus a `NodeConfig` the binary builds from `Args` so unit tests can
//! construct configuration without going through `clap` at all.

use clap::builder::styling::{AnsiColor, Styles};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Defines the styles for the help message to replicate clap v3's appearance.
fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// clustermqd - a clustered, replicated message-queue node.
///
/// Starts one node of the queue service. The node joins cluster
/// membership through whatever `transport::GroupTransport` the process is
/// wired to; the binary shipped with this crate wires up
/// `transport::loopback::LoopbackTransport`, which only clusters nodes
/// inside one process, so multi-process deployment is a matter of
/// swapping in a real broadcast transport behind the same trait.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// This process's cluster node id.
    ///
    /// Must be unique within the cluster's membership; the lowest-id
    /// member at any moment is the one that streams sync state and arms
    /// retention timers.
    #[arg(short = 'n', long, default_value_t = 1)]
    pub node_id: u32,

    /// Path of the local IPC socket clients connect to.
    #[arg(short = 's', long, default_value = "clustermq.sock")]
    pub ipc_socket: PathBuf,

    /// Log file path, or "stderr" to log to standard error instead of a
    /// rotating file.
    #[arg(long)]
    pub log_file: Option<String>,

    /// Silence user-facing informational output on stdout.
    #[arg(short = 'q', long, help_heading = "Output and Logging")]
    pub quiet: bool,

    /// Increase diagnostic log verbosity on stderr/file.
    ///
    /// Can be used multiple times to increase detail:
    ///  -v: debug
    ///  -vv and above: trace
    /// By default, only INFO and above are shown.
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Output and Logging")]
    pub verbose: u8,
}

/// Internal configuration derived from `Args`, kept serde-`Deserialize`
/// so it can also be loaded from a TOML file for tests or non-CLI
/// embedding, mirroring the teacher's `BenchmarkConfiguration` split.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: u32,
    pub ipc_socket: PathBuf,
    pub log_file: Option<String>,
    pub quiet: bool,
    pub verbose: u8,
}

impl From<&Args> for NodeConfig {
    fn from(args: &Args) -> Self {
        Self {
            node_id: args.node_id,
            ipc_socket: args.ipc_socket.clone(),
            log_file: args.log_file.clone(),
            quiet: args.quiet,
            verbose: args.verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `Args::parse_from` exercises the same clap surface the binary
    /// does, without relying on real argv.
    #[test]
    fn node_config_is_derived_from_parsed_args() {
        let args = Args::parse_from(["clustermqd", "-n", "3", "-vv"]);
        let config = NodeConfig::from(&args);
        assert_eq!(config.node_id, 3);
        assert_eq!(config.verbose, 2);
        assert!(!config.quiet);
    }

    #[test]
    fn defaults_produce_node_one_with_default_socket() {
        let args = Args::parse_from(["clustermqd"]);
        let config = NodeConfig::from(&args);
        assert_eq!(config.node_id, 1);
        assert_eq!(config.ipc_socket, PathBuf::from("clustermq.sock"));
    }
}
