//! `huddle config`: Show the effective configuration.

use huddle_config::AppConfig;
use std::path::Path;

pub fn show(config_path: &Path, default: bool) -> Result<(), Box<dyn std::error::Error>> {
    if default {
        print!("{}", AppConfig::default_toml());
        return Ok(());
    }

    // Shown even when invalid, so the problem can be spotted.
    let mut config = AppConfig::load_from(config_path)?;
    config.apply_env(|key| std::env::var(key).ok());

    println!("# {}", config_path.display());
    println!("{config:#?}");
    println!();
    match config.validate() {
        Ok(()) => println!("✅ Configuration valid"),
        Err(e) => println!("❌ {e}"),
    }

    Ok(())
}
