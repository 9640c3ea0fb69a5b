//! Status command handler

use anyhow::Result;
use serde_json::json;

use udt_core::{Config, DatasetManager};

use crate::output::{Output, OutputFormat};

/// Show backend, readiness and sample counts
pub async fn show(manager: &DatasetManager, config: &Config, output: &Output) -> Result<()> {
    let ready = manager.is_ready().await;
    // a collaborative manager without a session has nothing to count
    let summary = if manager.session_id().is_some() || ready {
        Some(manager.get_summary().await?)
    } else {
        None
    };
    let name = match &summary {
        Some(_) => manager.get_dataset_property("name").await?,
        None => None,
    };

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                json!({
                    "backend": manager.kind().as_str(),
                    "ready": ready,
                    "session_id": manager.session_id(),
                    "name": name,
                    "samples": summary.as_ref().map(|s| s.len()),
                    "annotated": summary.as_ref().map(|s| s.annotated_count()),
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", if ready { "ready" } else { "not ready" });
        }
        OutputFormat::Human => {
            println!("UDT Status");
            println!("==========");
            println!();
            println!("Backend:  {}", manager.kind());
            println!("Ready:    {}", if ready { "yes" } else { "no" });
            match manager.kind() {
                udt_core::BackendKind::Collaborative => {
                    println!("Server:   {}", config.server_url);
                    println!(
                        "Session:  {}",
                        manager.session_id().unwrap_or("(none)")
                    );
                }
                udt_core::BackendKind::Cloud => {
                    println!("Storage:  {}", config.objects_dir().display());
                    println!("Privacy:  {}", config.privacy);
                }
                udt_core::BackendKind::Local => {
                    println!("Storage:  {}", config.local_dataset_path().display());
                }
            }

            println!();
            match summary {
                Some(summary) => {
                    if let Some(name) = name.as_ref().and_then(|n| n.as_str()) {
                        println!("Dataset:  {}", name);
                    }
                    println!("Samples:  {}", summary.len());
                    println!("Annotated: {}", summary.annotated_count());
                }
                None => {
                    println!("No dataset loaded. Import one with:");
                    println!("  udt import dataset.udt.json");
                }
            }
        }
    }

    Ok(())
}
