//! Dataset command handlers (import, export, samples, sample)

use std::path::Path;

use anyhow::{Context, Result};

use udt_core::{Dataset, DatasetManager};

use crate::output::Output;

/// How a sample is addressed on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleTarget {
    Index(usize),
    Id(String),
}

impl SampleTarget {
    /// Plain non-negative integers are indices; anything else is an id
    pub fn parse(arg: &str) -> Self {
        match arg.parse::<usize>() {
            Ok(index) => SampleTarget::Index(index),
            Err(_) => SampleTarget::Id(arg.to_string()),
        }
    }
}

/// Read a dataset from a UDT JSON file
pub fn read_dataset_file(path: &Path) -> Result<Dataset> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset file: {:?}", path))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse dataset file: {:?}", path))
}

/// Replace the dataset with the contents of a file
pub async fn import(manager: &mut DatasetManager, path: &Path, output: &Output) -> Result<()> {
    let dataset = read_dataset_file(path)?;
    let count = dataset.samples.len();
    let had_session = manager.session_id().is_some();

    manager
        .set_dataset(dataset)
        .await
        .context("Failed to import dataset")?;

    match manager.session_id() {
        Some(session_id) if !had_session => {
            if output.is_quiet() {
                println!("{}", session_id);
            } else {
                output.success(&format!(
                    "Imported {} sample(s) into new session {}",
                    count, session_id
                ));
                output.message(&format!("Join it with: udt --session {} status", session_id));
            }
        }
        _ => output.success(&format!("Imported {} sample(s)", count)),
    }

    Ok(())
}

/// Write the full dataset to a file or stdout
pub async fn export(
    manager: &DatasetManager,
    path: Option<&Path>,
    output: &Output,
) -> Result<()> {
    let dataset = manager
        .get_dataset()
        .await
        .context("Failed to export dataset")?;
    let content = serde_json::to_string_pretty(&dataset)?;

    match path {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write {:?}", path))?;
            output.success(&format!(
                "Exported {} sample(s) to {}",
                dataset.samples.len(),
                path.display()
            ));
        }
        None => println!("{}", content),
    }

    Ok(())
}

/// List the sample summary
pub async fn list(manager: &DatasetManager, output: &Output) -> Result<()> {
    let summary = manager
        .get_summary()
        .await
        .context("Failed to load sample summary")?;
    output.print_summary(&summary);
    Ok(())
}

/// Show one sample
pub async fn sample(manager: &DatasetManager, target: &str, output: &Output) -> Result<()> {
    let sample = match SampleTarget::parse(target) {
        SampleTarget::Index(index) => manager.get_sample_by_index(index).await,
        SampleTarget::Id(id) => manager.get_sample(&id).await,
    }
    .with_context(|| format!("Failed to load sample {}", target))?;

    output.print_sample(&sample);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sample_target_parse() {
        assert_eq!(SampleTarget::parse("3"), SampleTarget::Index(3));
        assert_eq!(
            SampleTarget::parse("s1a2b3c4d"),
            SampleTarget::Id("s1a2b3c4d".to_string())
        );
        assert_eq!(SampleTarget::parse("-1"), SampleTarget::Id("-1".to_string()));
    }

    #[test]
    fn test_read_dataset_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("birds.udt.json");
        std::fs::write(
            &path,
            r#"{"name": "birds", "interface": {"type": "image_classification"}, "samples": [{"imageUrl": "a"}]}"#,
        )
        .unwrap();

        let dataset = read_dataset_file(&path).unwrap();
        assert_eq!(dataset.name.as_deref(), Some("birds"));
        assert_eq!(dataset.samples.len(), 1);

        std::fs::write(&path, "not json").unwrap();
        assert!(read_dataset_file(&path).is_err());
        assert!(read_dataset_file(&temp_dir.path().join("missing.json")).is_err());
    }
}
