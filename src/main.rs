//! Demo application for the shell tree synchronizer.
//!
//! Mirrors a directory:
//! 1. The root is expanded and every child is shown
//! 2. External changes are debounced and applied to the tree
//! 3. Display updates are printed from a broadcast channel
//! 4. Icons and subfolder hints are resolved on background workers

use anyhow::{Context, Result};
use shell_tree_sync::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shell_tree_sync=debug".parse()?),
        )
        .init();

    println!("=== Shell Tree Sync Demo ===\n");

    let watch_path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().context("no path given and no current directory")?,
    };
    let watch_path = watch_path
        .canonicalize()
        .with_context(|| format!("cannot open {}", watch_path.display()))?;

    println!("Mirroring: {}\n", watch_path.display());

    // 1s poll interval for paths where native watching fails
    let provider = Arc::new(FileSystemProvider::new(Duration::from_millis(1000)));
    let (display, mut updates) = BroadcastDisplay::new(256);

    let mut tree = ShellTreeBuilder::new(provider)
        .display(Arc::new(display))
        .debounce(Duration::from_millis(100))
        .build()?;

    let root = tree.add_root(AbsoluteId::from_path(&watch_path))?;
    tree.request_expand(root)?;
    let children = tree.store().children(root).to_vec();
    for child in children {
        tree.on_node_displayed(child)?;
    }

    println!("Press Ctrl+C to exit\n");
    println!("Try creating, renaming or deleting folders in the mirrored directory.\n");
    println!("---\n");

    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => println!("[Tree] {:?}", update),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    tracing::warn!("Display listener lagged by {} updates", count);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
        println!("\nShutting down...");
        let _ = shutdown_tx.send(());
    });

    run_tree_loop(&mut tree, Duration::from_millis(50), shutdown_rx).await;

    let names: Vec<String> = tree
        .store()
        .children(root)
        .iter()
        .filter_map(|child| tree.display_name(*child).map(str::to_string))
        .collect();
    println!("Final children of {}: {:?}", watch_path.display(), names);

    tree.shutdown();
    println!("Done!");

    Ok(())
}
