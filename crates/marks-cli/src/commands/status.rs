//! Status command handler

use anyhow::Result;

use marks_core::session::SessionProvider;
use marks_core::{Backend, Config, TokenSession};

use super::{load, open_synchronizer};
use crate::output::{Output, OutputFormat};

/// Show backend, user and bookmark count
pub async fn show(config: &Config, output: &Output) -> Result<()> {
    let user = TokenSession::from_config(config).current_user();

    // Counting needs a working store; report the failure instead of bailing
    let count = match user {
        Some(_) => match open_synchronizer(config) {
            Ok(sync) => load(&sync).await.map(|b| b.len()).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        },
        None => Err("not signed in".to_string()),
    };

    let endpoint = match config.backend {
        Backend::Local => config.sqlite_path().display().to_string(),
        Backend::Supabase => config
            .supabase_url
            .clone()
            .unwrap_or_else(|| "(not set)".to_string()),
    };

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "backend": config.backend.to_string(),
                    "endpoint": endpoint,
                    "user": user,
                    "cross_tab": config.cross_tab,
                    "signal_dir": config.signal_dir(),
                    "bookmarks": count.as_ref().ok(),
                    "error": count.as_ref().err(),
                })
            );
        }
        OutputFormat::Quiet => {
            if let Ok(n) = count {
                println!("{}", n);
            }
        }
        OutputFormat::Human => {
            println!("marks status");
            println!("============");
            println!();
            println!("Backend:");
            println!("  Type:     {}", config.backend);
            println!("  Endpoint: {}", endpoint);
            println!();
            println!("User:");
            match user {
                Some(ref user) => println!("  Signed in as {}", user.display_name()),
                None => println!("  Not signed in (run `marks login`)"),
            }
            println!();
            println!("Cross-tab signals:");
            if config.cross_tab {
                println!("  Enabled ({})", config.signal_dir().display());
            } else {
                println!("  Disabled");
            }
            println!();
            println!("Contents:");
            match count {
                Ok(n) => println!("  Bookmarks: {}", n),
                Err(e) => println!("  Unavailable: {}", e),
            }
        }
    }

    Ok(())
}
