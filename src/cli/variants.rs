//! Show the combined specification of a recipe and the variants it renders.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::common::{VariantArgs, print_warnings, write_output};
use super::render::render_paths;
use crate::config::GlobalConfig;
use crate::variants::VariantSpec;

#[derive(Args, Debug)]
pub struct VariantsCommand {
    /// Recipe directory or recipe file
    #[arg(value_name = "RECIPE")]
    pub recipe: PathBuf,

    #[command(flatten)]
    pub variants: VariantArgs,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct VariantListing {
    recipe: String,
    target_platform: String,
    specification: BTreeMap<String, SpecEntry>,
    used_vars: Vec<String>,
    loop_vars: Vec<String>,
    variants: Vec<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Serialize)]
struct SpecEntry {
    values: Vec<String>,
    origin: String,
}

fn spec_entries(spec: &VariantSpec) -> BTreeMap<String, SpecEntry> {
    spec.variables()
        .iter()
        .map(|var| {
            let entry = SpecEntry {
                values: var.values.iter().map(|c| c.value.to_string()).collect(),
                origin: var.origin.clone(),
            };
            (var.name.clone(), entry)
        })
        .collect()
}

impl VariantsCommand {
    pub async fn execute(self, global: &GlobalConfig) -> Result<()> {
        let config = self.variants.render_config(global)?;
        let recipe = crate::render::RecipeSource::load(&self.recipe)?;
        let spec = config.combined_spec(&recipe)?;

        let reports = render_paths(std::slice::from_ref(&self.recipe), &config).await?;
        let Some((_, report)) = reports.into_iter().next() else {
            return Ok(());
        };
        print_warnings(&report.warnings);

        let listing = VariantListing {
            recipe: recipe.name().to_string(),
            target_platform: config.target_platform.clone(),
            specification: spec_entries(&spec),
            used_vars: report.used_vars.iter().cloned().collect(),
            loop_vars: report.loop_vars().into_iter().collect(),
            variants: report
                .metadata
                .iter()
                .map(|meta| {
                    meta.variant()
                        .restrict(meta.used_vars())
                        .iter()
                        .map(|(name, value)| (name.clone(), value.to_json()))
                        .collect()
                })
                .collect(),
        };

        if self.json {
            let mut json = serde_json::to_string_pretty(&listing)?;
            json.push('\n');
            return write_output(None, &json).await;
        }

        println!("{} {} ({})", "Recipe:".bold(), listing.recipe, listing.target_platform);
        println!("\n{} ({} variables)", "Specification".bold(), listing.specification.len());
        for (name, entry) in &listing.specification {
            let marker = if listing.used_vars.contains(name) { "*".green().to_string() } else { " ".to_string() };
            println!("  {marker} {name}: {}  {}", entry.values.join(", "), format!("({})", entry.origin).dimmed());
        }

        let used = if listing.used_vars.is_empty() { "(none)".to_string() } else { listing.used_vars.join(", ") };
        println!("\n{} {used}", "Used variables:".bold());
        if !listing.loop_vars.is_empty() {
            println!("{} {}", "Loop variables:".bold(), listing.loop_vars.join(", "));
        }

        println!("\n{} ({})", "Metadata".bold(), report.metadata.len());
        for meta in &report.metadata {
            println!("  {} {}", meta.dist().cyan(), meta.variant().restrict(meta.used_vars()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variants::{SpecSource, combine_specs};

    #[test]
    fn test_spec_entries_keep_origin() {
        let spec = combine_specs(&[SpecSource::new("cfg.yaml").with("python", ["3.11", "3.12"])]).unwrap();
        let entries = spec_entries(&spec);
        assert_eq!(entries["python"].values, vec!["3.11", "3.12"]);
        assert_eq!(entries["python"].origin, "cfg.yaml");
    }
}
