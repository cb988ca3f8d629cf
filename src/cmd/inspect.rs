//! Offline helpers: `appforge classify` and `appforge repair`.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

use appforge::classifier::DomainClassifier;
use appforge::config::AppforgeConfig;
use appforge::repair;

pub fn cmd_classify(project_dir: &Path, text: &str, scores: bool) -> Result<()> {
    let config = AppforgeConfig::resolve(project_dir)?;
    let classifier = DomainClassifier::new(config.classifier.default_domain);

    println!("{}", classifier.detect(text));
    if scores {
        for (domain, hits) in classifier.scores(text) {
            println!("  {:<10} {}", domain.as_str(), hits);
        }
    }
    Ok(())
}

pub fn cmd_repair(file: Option<&Path>) -> Result<()> {
    let input = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    let repaired = repair::repair(&input);
    tracing::info!(stage = repaired.stage.as_str(), "repaired input");
    println!(
        "{}",
        serde_json::to_string_pretty(&repaired.value).context("Failed to encode JSON")?
    );
    Ok(())
}
