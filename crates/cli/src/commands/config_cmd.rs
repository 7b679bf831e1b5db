//! `taskloom config`: Show the effective or default configuration.

use taskloom_config::AppConfig;

use super::runtime::{self, CliResult};

pub async fn show(default: bool) -> CliResult<()> {
    if default {
        println!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let mut config = runtime::load_config()?;
    let has_key = config.has_api_key();
    config.api_key = None;
    let toml_str = toml::to_string_pretty(&config)?;

    println!(
        "# {}",
        AppConfig::config_dir().join("config.toml").display()
    );
    if has_key {
        println!("# api_key = [REDACTED]");
    } else {
        println!("# api_key not set (TASKLOOM_API_KEY, OPENROUTER_API_KEY or OPENAI_API_KEY)");
    }
    println!("{toml_str}");
    Ok(())
}
