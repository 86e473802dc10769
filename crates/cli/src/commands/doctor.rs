//! `huddle doctor`: Diagnose configuration and connectivity.

use huddle_channels::MattermostClient;
use huddle_config::AppConfig;
use std::path::Path;

pub async fn run(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 huddle doctor");
    println!("================\n");

    let mut issues = 0;

    if config_path.exists() {
        println!("  ✅ Config file found: {}", config_path.display());
    } else {
        println!("  ⚠️  No config file at {}, using defaults and environment", config_path.display());
    }

    let config = match AppConfig::load(config_path) {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            println!("\n  ⚠️  Fix the configuration before running other checks.");
            return Ok(());
        }
    };

    let client = MattermostClient::new(
        config.mattermost.server_url.clone(),
        config.mattermost.access_token.clone().unwrap_or_default(),
    );
    match client.me().await {
        Ok(me) => {
            println!("  ✅ Mattermost reachable, authenticated as @{}", me.username);
            if !config.mattermost.bot_user_id.is_empty() && config.mattermost.bot_user_id != me.id {
                println!(
                    "  ⚠️  MATTERMOST_BOT_USER_ID ({}) differs from the token's user ({})",
                    config.mattermost.bot_user_id, me.id
                );
                issues += 1;
            }
            if me.username != config.bot.username {
                println!(
                    "  ⚠️  BOT_USERNAME is \"{}\" but the token belongs to \"{}\"; mentions will not match",
                    config.bot.username, me.username
                );
                issues += 1;
            }
        }
        Err(e) => {
            println!("  ❌ Mattermost not reachable: {e}");
            issues += 1;
        }
    }

    if config.asana_enabled() {
        println!("  ✅ Asana tools enabled");
    } else {
        println!("  ⚠️  Asana tools disabled (no ASANA_API_KEY)");
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
