//! Command handlers

pub mod bookmark;
pub mod config;
pub mod session;
pub mod status;
pub mod watch;

use anyhow::{anyhow, bail, Context, Result};
use uuid::Uuid;

use marks_core::session::SessionProvider;
use marks_core::{notifier, open_store, Bookmark, Config, LoadOutcome, Synchronizer, TokenSession};

/// Build a synchronizer for the signed-in user
pub fn open_synchronizer(config: &Config) -> Result<Synchronizer> {
    let session = TokenSession::from_config(config);
    let user = session
        .current_user()
        .ok_or_else(|| anyhow!("Not signed in. Run `marks login` first."))?;

    let store =
        open_store(config, session.access_token()).context("Failed to open bookmark store")?;

    Ok(Synchronizer::new(user, store, notifier::from_config(config)))
}

/// Run the initial load and return the list
pub async fn load(sync: &Synchronizer) -> Result<Vec<Bookmark>> {
    match sync.load().await {
        LoadOutcome::Applied | LoadOutcome::Stale => Ok(sync.snapshot().bookmarks),
        LoadOutcome::Failed(e) => bail!("Failed to load bookmarks: {}", e),
        LoadOutcome::Closed => bail!("Session closed"),
    }
}

/// Resolve a bookmark id (full UUID or unique prefix)
pub fn resolve_id<'a>(id: &str, bookmarks: &'a [Bookmark]) -> Result<&'a Bookmark> {
    if let Ok(uuid) = Uuid::parse_str(id) {
        return bookmarks
            .iter()
            .find(|b| b.id == uuid)
            .ok_or_else(|| anyhow!("No bookmark found with id: {}", id));
    }

    let needle = id.to_lowercase();
    let matches: Vec<_> = bookmarks
        .iter()
        .filter(|b| b.id.to_string().starts_with(&needle))
        .collect();

    match matches.len() {
        0 => bail!("No bookmark found matching: {}", id),
        1 => Ok(matches[0]),
        _ => {
            eprintln!("Multiple bookmarks match '{}':", id);
            for bookmark in &matches {
                eprintln!("  {} - {}", bookmark.id, bookmark.title);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bookmark(id: &str) -> Bookmark {
        Bookmark {
            id: Uuid::parse_str(id).unwrap(),
            user_id: Uuid::nil(),
            url: "https://example.com".to_string(),
            title: id[..4].to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_resolve_id() {
        let list = vec![
            bookmark("aaaa1111-0000-0000-0000-000000000000"),
            bookmark("aaaa2222-0000-0000-0000-000000000000"),
            bookmark("bbbb1111-0000-0000-0000-000000000000"),
        ];

        assert_eq!(resolve_id("bbbb", &list).unwrap().id, list[2].id);
        assert_eq!(resolve_id("AAAA2", &list).unwrap().id, list[1].id);
        assert_eq!(
            resolve_id("aaaa1111-0000-0000-0000-000000000000", &list)
                .unwrap()
                .id,
            list[0].id
        );
        assert!(resolve_id("aaaa", &list).is_err());
        assert!(resolve_id("cccc", &list).is_err());
        assert!(resolve_id("cccc1111-0000-0000-0000-000000000000", &list).is_err());
    }

    #[test]
    fn test_open_synchronizer_requires_sign_in() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };
        assert!(open_synchronizer(&config).is_err());

        let config = Config {
            user_id: Some(Uuid::new_v4().to_string()),
            ..config
        };
        assert!(open_synchronizer(&config).is_ok());
    }
}
