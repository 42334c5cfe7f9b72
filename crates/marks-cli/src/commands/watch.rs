//! Live view of the bookmark list

use anyhow::Result;

use marks_core::{spawn_sync_task, Config, Snapshot};

use super::open_synchronizer;
use crate::output::{bookmark_line, Output, OutputFormat};

/// Print the list on every change until Ctrl-C
pub async fn watch(config: &Config, output: &Output) -> Result<()> {
    let sync = open_synchronizer(config)?;
    let mut notices = sync.take_notices();
    let handle = spawn_sync_task(sync);
    let mut snapshots = handle.snapshots();

    if output.format == OutputFormat::Human {
        println!(
            "Watching bookmarks for {} (Ctrl-C to stop)",
            handle.synchronizer.owner().display_name()
        );
    }

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if !snapshot.loading {
                    print_snapshot(&snapshot, output);
                }
            }
            notice = recv_notice(&mut notices) => {
                match notice {
                    Some(notice) => output.notice(&notice),
                    None => notices = None,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

async fn recv_notice(
    notices: &mut Option<tokio::sync::mpsc::UnboundedReceiver<marks_core::Notice>>,
) -> Option<marks_core::Notice> {
    match notices {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn print_snapshot(snapshot: &Snapshot, output: &Output) {
    match output.format {
        OutputFormat::Human => {
            println!();
            println!("── {} ──", chrono::Local::now().format("%H:%M:%S"));
            if snapshot.bookmarks.is_empty() {
                println!("No bookmarks yet.");
            }
            for bookmark in &snapshot.bookmarks {
                println!("{}", bookmark_line(bookmark));
            }
        }
        // One JSON document per line so the stream can be consumed
        OutputFormat::Json => {
            if let Ok(line) = serde_json::to_string(&snapshot.bookmarks) {
                println!("{}", line);
            }
        }
        OutputFormat::Quiet => {}
    }
}
