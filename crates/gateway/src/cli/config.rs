use std::path::Path;

use sy_domain::config::{Config, ConfigSeverity};

/// Parse and validate the config file, printing any issues.
///
/// Returns `false` when the file fails to parse or has errors.
pub fn validate(config_path: &str) -> bool {
    let config = match Config::load(Path::new(config_path)) {
        Ok(config) => config,
        Err(e) => {
            println!("{e}");
            return false;
        }
    };
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!(
        "\n{} error(s), {} warning(s) in {config_path}",
        error_count, warning_count,
    );

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let output = toml::to_string_pretty(config)
        .map_err(|e| anyhow::anyhow!("serializing config: {e}"))?;
    print!("{output}");
    Ok(())
}
