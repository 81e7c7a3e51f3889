use crate::config::Config;
use crate::error::ConfigError;

/// Layer an overlay TOML fragment on top of a base [`Config`].
///
/// Keys present in the overlay win; tables merge key-by-key, every other
/// value (arrays included, so `debugger.hidden` is replaced, not appended)
/// is replaced outright.
pub fn merge_configs(base: &Config, overlay_toml: &str) -> Result<Config, ConfigError> {
    let parse = |e: toml::de::Error| ConfigError::Parse(e.to_string());

    let mut merged = toml::Value::try_from(base).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let overlay: toml::Value = toml::from_str(overlay_toml).map_err(parse)?;

    if let toml::Value::Table(sections) = &overlay {
        for section in sections.keys() {
            tracing::debug!(section = %section, "config overlay");
        }
    }
    overlay_into(&mut merged, overlay);

    merged.try_into().map_err(parse)
}

fn overlay_into(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, val) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(slot) => overlay_into(slot, val),
                    None => {
                        base_table.insert(key, val);
                    }
                }
            }
        }
        (slot, val) => *slot = val,
    }
}
