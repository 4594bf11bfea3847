//! Render recipes and print their metadata.
//!
//! Each recipe is rendered on the blocking thread pool with its own
//! [`RenderContext`](crate::render::RenderContext); several recipes render
//! concurrently and are printed in command-line order.
//!
//! # Examples
//!
//! ```bash
//! # Every variant of a recipe, as YAML snapshots
//! varia render ./recipes/zlib
//!
//! # JSON summary with an extra config file and an override
//! varia render ./recipes/zlib -m ci.yaml --variant python=3.11,3.12 --format json
//!
//! # Keep going when some variants fail
//! varia render ./recipes/* --best-effort -o rendered.yaml
//! ```

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

use super::common::{VariantArgs, print_warnings, write_output};
use crate::config::{GlobalConfig, RenderConfig};
use crate::metadata::RenderedMetadata;
use crate::render::{RecipeSource, RenderReport, render_recipe};

#[derive(Args, Debug)]
pub struct RenderCommand {
    /// Recipe directories or recipe files
    #[arg(value_name = "RECIPE", required = true)]
    pub recipes: Vec<PathBuf>,

    #[command(flatten)]
    pub variants: VariantArgs,

    /// Drop variants that fail to render instead of failing
    #[arg(long)]
    pub best_effort: bool,

    /// Render variants one at a time
    #[arg(long)]
    pub serial: bool,

    /// Write to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "yaml")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// One YAML document per metadata
    Yaml,
    /// A JSON array of metadata summaries
    Json,
}

/// JSON view of one rendered metadata.
#[derive(Debug, Serialize)]
pub struct MetadataSummary {
    pub identity: String,
    pub dist: String,
    pub variant: serde_json::Map<String, serde_json::Value>,
    pub used_vars: Vec<String>,
    pub needs_download: bool,
    pub needs_reparse: bool,
    pub document: serde_yaml::Value,
}

impl From<&RenderedMetadata> for MetadataSummary {
    fn from(meta: &RenderedMetadata) -> Self {
        Self {
            identity: meta.identity(),
            dist: meta.dist(),
            variant: meta
                .variant()
                .restrict(meta.used_vars())
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
            used_vars: meta.used_vars().iter().cloned().collect(),
            needs_download: meta.needs_download(),
            needs_reparse: meta.needs_reparse(),
            document: meta.document().clone(),
        }
    }
}

impl RenderCommand {
    pub async fn execute(self, global: &GlobalConfig) -> Result<()> {
        let mut config = self.variants.render_config(global)?;
        config.best_effort = self.best_effort;
        config.parallel = config.parallel && !self.serial;

        let reports = render_paths(&self.recipes, &config).await?;
        let metadata: Vec<&RenderedMetadata> = reports.iter().flat_map(|(_, report)| &report.metadata).collect();
        for (_, report) in &reports {
            print_warnings(&report.warnings);
        }

        let content = match self.format {
            OutputFormat::Yaml => {
                let mut documents = Vec::with_capacity(metadata.len());
                for meta in &metadata {
                    documents.push(format!("# {}\n{}", meta.dist(), meta.to_yaml()?));
                }
                documents.join("---\n")
            }
            OutputFormat::Json => {
                let summaries: Vec<MetadataSummary> = metadata.iter().map(|meta| MetadataSummary::from(*meta)).collect();
                let mut json = serde_json::to_string_pretty(&summaries)?;
                json.push('\n');
                json
            }
        };
        write_output(self.output.as_deref(), &content).await
    }
}

/// Render every recipe concurrently; reports come back in the order given.
pub(crate) async fn render_paths(paths: &[PathBuf], config: &RenderConfig) -> Result<Vec<(PathBuf, RenderReport)>> {
    let tasks = paths.iter().cloned().map(|path| {
        let config = config.clone();
        tokio::task::spawn_blocking(move || {
            let recipe = RecipeSource::load(&path)?;
            debug!("Rendering {} for {}", recipe.name(), config.target_platform);
            let ctx = config.render_context(recipe)?;
            let report = render_recipe(&ctx)?;
            anyhow::Ok((path, report))
        })
    });

    let mut reports = Vec::with_capacity(paths.len());
    for (path, joined) in paths.iter().zip(futures::future::join_all(tasks).await) {
        let result = joined.with_context(|| format!("Render task for {} failed", path.display()))?;
        reports.push(result.with_context(|| format!("Failed to render {}", path.display()))?);
    }
    Ok(reports)
}
