use crate::output::{print_json, print_table};
use clap::Subcommand;
use orchestrations_core::description::OrchestrationDescriptionUniqueName;
use std::path::Path;

#[derive(Subcommand)]
pub enum DescriptionSubcommand {
    /// List persisted descriptions
    List,
    /// Show one description as name:version
    Show { unique_name: String },
}

pub fn run(root: &Path, subcmd: DescriptionSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        DescriptionSubcommand::List => list(root, json),
        DescriptionSubcommand::Show { unique_name } => show(root, &unique_name),
    }
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let (_, store) = super::open_store(root)?;
    let mut descriptions = store.descriptions()?;
    descriptions.sort_by(|a, b| a.unique_name.cmp(&b.unique_name));

    if json {
        return print_json(&descriptions);
    }
    if descriptions.is_empty() {
        println!("No descriptions. Run `orchestrations sync`.");
        return Ok(());
    }

    let rows = descriptions
        .iter()
        .map(|d| {
            vec![
                d.unique_name.to_string(),
                if d.is_enabled { "yes" } else { "no" }.to_string(),
                d.steps().len().to_string(),
                d.recurring_cron_expression()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                d.function_name.clone(),
            ]
        })
        .collect();
    print_table(&["NAME", "ENABLED", "STEPS", "CRON", "FUNCTION"], rows);
    Ok(())
}

fn show(root: &Path, unique_name: &str) -> anyhow::Result<()> {
    let unique_name: OrchestrationDescriptionUniqueName = unique_name.parse()?;
    let (_, store) = super::open_store(root)?;
    let description = store
        .description_by_unique_name(&unique_name)?
        .ok_or_else(|| anyhow::anyhow!("description '{unique_name}' not found"))?;
    print_json(&description)
}
