//! Model listing command
//!
//! Queries the configured Ollama host (or a remote backend) for the
//! models it can serve.

use crate::config::Config;
use crate::error::{PalaverError, Result};
use crate::gateway::{ModelGateway, ModelSummary, OllamaGateway};
use prettytable::{cell, row, Table};

/// List available models
///
/// # Examples
///
/// ```no_run
/// use palaver::config::Config;
/// use palaver::commands::models::list_models;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::load("config/config.yaml", &Default::default())?;
/// list_models(&config, false).await?;
/// # Ok(())
/// # }
/// ```
pub async fn list_models(config: &Config, json: bool) -> Result<()> {
    tracing::info!("Listing models from Ollama host: {}", config.ollama.host);

    let gateway = OllamaGateway::new(&config.ollama)?;
    let models = gateway.list_models().await?;
    print_models(&models, gateway.host(), json)
}

/// Print models as a table, or as JSON when `json` is set
pub fn print_models(models: &[ModelSummary], source: &str, json: bool) -> Result<()> {
    if json {
        return output_models_json(models);
    }
    if models.is_empty() {
        println!("No models available from {}", source);
        return Ok(());
    }
    output_models_table(models, source);
    Ok(())
}

fn output_models_json(models: &[ModelSummary]) -> Result<()> {
    let json = serde_json::to_string_pretty(models).map_err(PalaverError::Serialization)?;
    println!("{}", json);
    Ok(())
}

fn output_models_table(models: &[ModelSummary], source: &str) {
    let mut table = Table::new();
    table.add_row(row!["Model Name", "Size", "Modified"]);

    for model in models {
        table.add_row(row![
            model.name,
            format_size(model.size),
            model.modified_at.as_deref().unwrap_or("-")
        ]);
    }

    println!("\nAvailable models from {}:\n", source);
    table.printstd();
    println!();
}

/// Human-readable byte size
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(name: &str, size: u64) -> ModelSummary {
        ModelSummary {
            name: name.to_string(),
            size,
            digest: None,
            modified_at: Some("2024-05-01T10:00:00Z".to_string()),
        }
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(2_019_393_189), "1.9 GB");
    }

    #[test]
    fn test_models_json_shape() {
        let json = serde_json::to_value(vec![model("llama3.2:latest", 10)]).unwrap();
        assert_eq!(json[0]["name"], "llama3.2:latest");
        assert_eq!(json[0]["modifiedAt"], "2024-05-01T10:00:00Z");
    }

    #[test]
    fn test_print_models_returns_ok() {
        assert!(print_models(&[], "test", false).is_ok());
        assert!(print_models(&[model("m", 1)], "test", true).is_ok());
        assert!(print_models(&[model("m", 1)], "test", false).is_ok());
    }
}
