//! Parameters file of a local run.

use anyhow::{Context, Result};
use log::warn;
use snp_demux::DemuxParams;
use std::path::Path;

/// Read the run parameters from a TOML file. Missing keys keep their
/// defaults; unknown keys are an error. Every non-default value is logged.
pub fn load_params(path: &Path) -> Result<DemuxParams> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read parameters {}", path.display()))?;
    let params = parse_params(&contents)
        .with_context(|| format!("invalid parameters in {}", path.display()))?;
    Ok(params)
}

/// Parse and validate the parameters.
pub fn parse_params(contents: &str) -> Result<DemuxParams> {
    let params: DemuxParams = toml::from_str(contents)?;
    params.validate()?;
    for (key, value, default) in non_default_values(&params)? {
        warn!("parameter {key} = {value} (default {default})");
    }
    Ok(params)
}

/// `(section.key, value, default)` for every parameter differing from its default.
fn non_default_values(params: &DemuxParams) -> Result<Vec<(String, String, String)>> {
    let actual = toml::Value::try_from(params)?;
    let default = toml::Value::try_from(DemuxParams::default())?;
    let mut changed = Vec::new();
    let (Some(actual), Some(default)) = (actual.as_table(), default.as_table()) else {
        return Ok(changed);
    };
    for (section, values) in actual {
        let (Some(values), Some(defaults)) = (
            values.as_table(),
            default.get(section).and_then(toml::Value::as_table),
        ) else {
            continue;
        };
        for (key, value) in values {
            match defaults.get(key) {
                Some(d) if d == value => {}
                d => changed.push((
                    format!("{section}.{key}"),
                    value.to_string(),
                    d.map_or_else(|| "unset".to_string(), toml::Value::to_string),
                )),
            }
        }
    }
    Ok(changed)
}
