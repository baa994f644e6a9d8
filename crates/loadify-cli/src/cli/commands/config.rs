//! Config command: show where the config lives and what it resolves to.

use anyhow::Result;
use loadify_core::config;

pub fn run_config() -> Result<()> {
    let path = config::config_path()?;
    let cfg = config::load_or_init_at(&path)?;
    println!("# {}", path.display());
    print!("{}", toml_of(&cfg)?);
    Ok(())
}

fn toml_of(cfg: &config::LoadifyConfig) -> Result<String> {
    // Password stays out of terminal scrollback.
    let mut shown = cfg.clone();
    if !shown.auth.password.is_empty() {
        shown.auth.password = "********".to_string();
    }
    Ok(config::to_toml(&shown)?)
}
