//! Bookmark command handlers

use anyhow::{bail, Context, Result};

use marks_core::{Config, CreateOutcome, DeleteOutcome};

use super::{load, open_synchronizer, resolve_id};
use crate::metadata::fetch_title;
use crate::output::{short_id, Output};
use crate::prompt::confirm;

/// List all bookmarks
pub async fn list(config: &Config, output: &Output) -> Result<()> {
    let sync = open_synchronizer(config)?;
    let bookmarks = load(&sync).await?;
    output.print_bookmarks(&bookmarks);
    Ok(())
}

/// Add a bookmark
///
/// Without a title the page title is fetched, falling back to the URL.
pub async fn add(
    config: &Config,
    url: String,
    title: Option<String>,
    output: &Output,
) -> Result<()> {
    let title = match title {
        Some(title) => title,
        None if url.trim().is_empty() => String::new(),
        None => fetch_title(url.trim())
            .await
            .unwrap_or_else(|| url.trim().to_string()),
    };

    let sync = open_synchronizer(config)?;
    match sync.create(&url, &title).await {
        CreateOutcome::Created(bookmark) => {
            output.success(&format!("Added bookmark: {}", short_id(&bookmark)));
            output.print_bookmark(&bookmark);
            Ok(())
        }
        CreateOutcome::Invalid(e) => bail!("{}", e),
        CreateOutcome::Failed(e) => bail!("Failed to add bookmark: {}", e),
        CreateOutcome::Busy => bail!("Another add is still in progress"),
        CreateOutcome::Closed => bail!("Session closed"),
    }
}

/// Delete a bookmark
pub async fn remove(config: &Config, id: String, output: &Output) -> Result<()> {
    let sync = open_synchronizer(config)?;
    let bookmarks = load(&sync).await?;
    let bookmark = resolve_id(&id, &bookmarks)?;

    if output.should_prompt() {
        println!("Delete bookmark: {} - {}", short_id(bookmark), bookmark.title);
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    match sync.delete(bookmark.id).await {
        DeleteOutcome::Deleted => {
            output.success(&format!("Deleted bookmark: {}", bookmark.id));
            Ok(())
        }
        DeleteOutcome::Unknown => bail!("Bookmark {} is already gone", bookmark.id),
        DeleteOutcome::Failed(e) => bail!("Failed to delete bookmark: {}", e),
        DeleteOutcome::Closed => bail!("Session closed"),
    }
}

/// Open a bookmark in the browser
pub async fn open(config: &Config, id: String, output: &Output) -> Result<()> {
    let sync = open_synchronizer(config)?;
    let bookmarks = load(&sync).await?;
    let bookmark = resolve_id(&id, &bookmarks)?;

    open::that(&bookmark.url).with_context(|| format!("Failed to open {}", bookmark.url))?;
    output.message(&format!("Opened {}", bookmark.url));
    Ok(())
}
