//! Config command handlers

use anyhow::{Context, Result};

use marks_core::Config;

use crate::output::{Output, OutputFormat};

/// Placeholder shown for secrets
const REDACTED: &str = "(set)";

fn or_unset(value: Option<&str>) -> &str {
    value.unwrap_or("(not set)")
}

fn redacted(value: Option<&str>) -> &str {
    value.map(|_| REDACTED).unwrap_or("(not set)")
}

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "backend": config.backend.to_string(),
                    "supabase_url": config.supabase_url,
                    "supabase_key": config.supabase_key.as_deref().map(|_| REDACTED),
                    "access_token": config.access_token.as_deref().map(|_| REDACTED),
                    "user_id": config.user_id,
                    "email": config.email,
                    "cross_tab": config.cross_tab,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:     {}", config.data_dir.display());
            println!("  backend:      {}", config.backend);
            println!("  supabase_url: {}", or_unset(config.supabase_url.as_deref()));
            println!("  supabase_key: {}", redacted(config.supabase_key.as_deref()));
            println!("  access_token: {}", redacted(config.access_token.as_deref()));
            println!("  user_id:      {}", or_unset(config.user_id.as_deref()));
            println!("  email:        {}", or_unset(config.email.as_deref()));
            println!("  cross_tab:    {}", config.cross_tab);
            println!(
                "  log_file:     {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    config.set(&key, &value)?;
    config.save().context("Failed to save configuration")?;

    let shown = if key == "access_token" || key == "supabase_key" {
        REDACTED
    } else {
        value.as_str()
    };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}
