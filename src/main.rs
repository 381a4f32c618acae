//! # clustermqd - clustered message-queue node entry point
//!
//! Starts one node of the replicated queue service: parses `cli::Args`,
//! sets up logging the same way the teacher's benchmark binary did, then
//! builds a `node::Node` around a `transport::loopback::LoopbackTransport`
//! and an `ipc::local::LocalIpcChannel` and drives it until the process
//! is interrupted.
//!
//! The loopback transport only clusters nodes sharing one process; a
//! real deployment supplies its own `GroupTransport` behind the same
//! trait (see `transport.rs`). This binary exists to exercise that
//! trait end to end, not as a production multi-host launcher.

use anyhow::Result;
use clap::Parser;
use clustermq::cli::{Args, NodeConfig};
use clustermq::ipc::local::LocalIpcChannel;
use clustermq::node::Node;
use clustermq::transport::loopback::{LoopbackCluster, LoopbackTransport};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

mod logging {
    pub use clustermq::logging::ColorizedFormatter;
}
use logging::ColorizedFormatter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = NodeConfig::from(&args);

    let log_level = match config.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let guard;
    let detailed_log_layer;
    if let Some("stderr") = config.log_file.as_deref() {
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(log_level)
            .boxed();
        guard = None;
    } else {
        let file_appender = match config.log_file.as_deref() {
            Some(path_str) => {
                let log_path = std::path::Path::new(path_str);
                let log_dir = log_path.parent().unwrap_or_else(|| std::path::Path::new("."));
                let log_filename = log_path
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("clustermq.log"));
                tracing_appender::rolling::daily(log_dir, log_filename)
            }
            None => tracing_appender::rolling::daily(".", "clustermq.log"),
        };
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_filter(log_level)
            .boxed();
        guard = Some(file_guard);
    }

    let stdout_log = if !config.quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(ColorizedFormatter)
                .with_filter(log_level),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(detailed_log_layer)
        .with(stdout_log)
        .init();
    let _log_guard = guard;

    info!(node_id = config.node_id, "starting clustermqd");

    let cluster = LoopbackCluster::new();
    let transport = LoopbackTransport::join(cluster, config.node_id);
    let ipc = Arc::new(LocalIpcChannel::new(config.node_id));
    let (node, _inbound, _timers) = Node::new(Box::new(transport), ipc);

    info!(
        ipc_socket = %config.ipc_socket.display(),
        "node ready; a real deployment would bind this socket for client connections"
    );

    node.run().await;

    info!("clustermqd stopped");
    Ok(())
}
