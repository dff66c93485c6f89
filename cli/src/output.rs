use anyhow::Result;
use colored::Colorize;
use config::{Map, Value, flatten};

pub fn warn(msg: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), msg);
}

pub fn json(values: &Map) -> Result<String> {
    Ok(serde_json::to_string_pretty(&Value::Map(values.clone()).to_json())?)
}

pub fn yaml(values: &Map) -> Result<String> {
    let rendered = serde_yaml::to_string(&Value::Map(values.clone()).to_json())?;
    Ok(rendered.trim_end().to_string())
}

/// `path=value` per leaf, in key order.
pub fn flat(values: &Map) -> String {
    flatten(values)
        .into_iter()
        .map(|(path, value)| format!("{path}={value}"))
        .collect::<Vec<_>>()
        .join("\n")
}
