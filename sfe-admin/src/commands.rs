//! Subcommand handlers

use anyhow::{bail, Context, Result};
use sfe_core::registry::SampleDirection;
use sfe_core::{Filter, PersistableFilterRegistry, Value};

use crate::Command;

pub async fn dispatch(registry: &PersistableFilterRegistry, command: Command) -> Result<()> {
    match command {
        Command::Install { file } => {
            let report = registry
                .install_file(&file)
                .await
                .with_context(|| format!("Failed to install {}", file.display()))?;
            println!(
                "Installed {} group(s), {} filter(s): {:?}",
                report.groups.len(),
                report.filters.len(),
                report.filters
            );
        }
        Command::Groups => {
            for group in registry.list_groups().await? {
                println!(
                    "{:<40} {} => {}  ({})",
                    group.symbolic, group.input_type, group.output_type, group.display_name
                );
            }
        }
        Command::Filters {
            group,
            class,
            context,
            templates,
        } => {
            let filters = match (group.as_deref(), class.as_deref()) {
                (Some(group), Some(class)) => {
                    registry
                        .filters_by_group_and_class(group, class, context, templates)
                        .await?
                }
                (Some(group), None) => registry.filters_by_group(group, context, templates).await?,
                (None, Some(class)) => registry.filters_by_class(class, context, templates).await?,
                (None, None) => bail!("Either --group or --class is required"),
            };
            for filter in &filters {
                print_filter(filter, 0);
            }
        }
        Command::Find {
            input,
            output,
            accepts,
            produces,
        } => {
            let sample = match (accepts, produces) {
                (Some(json), _) => Some((parse_value(&json, false)?, SampleDirection::Input)),
                (None, Some(json)) => Some((parse_value(&json, false)?, SampleDirection::Output)),
                (None, None) => None,
            };
            let filters = registry
                .find_compatible(
                    &input,
                    &output,
                    sample.as_ref().map(|(value, direction)| (value, *direction)),
                )
                .await?;
            for filter in &filters {
                print_filter(filter, 0);
            }
        }
        Command::Run { id, input, typed } => {
            let mut filter = registry.load(id).await?;
            let input = parse_value(&input, typed)?;
            match filter.execute_with_errors(input) {
                Ok(output) => println!("{}", serde_json::to_string_pretty(&output.to_json())?),
                Err(e) => {
                    for message in filter.errors() {
                        eprintln!("  {}", message);
                    }
                    bail!("Filter {} failed: {}", id, e);
                }
            }
        }
        Command::DeleteFilter { id } => {
            registry.delete_filter(id).await?;
            println!("Deleted filter {}", id);
        }
        Command::DeleteGroup { symbolic } => {
            registry.delete_group(&symbolic).await?;
            println!("Deleted filter group '{}'", symbolic);
        }
    }
    Ok(())
}

fn parse_value(json: &str, typed: bool) -> Result<Value> {
    if typed {
        return serde_json::from_str(json).context("Invalid typed value");
    }
    let plain: serde_json::Value = serde_json::from_str(json).context("Invalid JSON")?;
    Ok(Value::from(plain))
}

fn print_filter(filter: &Filter, depth: usize) {
    let indent = "  ".repeat(depth);
    let id = filter
        .id()
        .map_or_else(|| "-".to_string(), |id| id.to_string());
    println!(
        "{}[{}] {} ({}: {} => {})",
        indent,
        id,
        filter.display_name(),
        filter.class_name(),
        filter.input_type(),
        filter.output_type()
    );
    if let Some(children) = filter.children() {
        for child in children.values() {
            print_filter(child, depth + 1);
        }
    }
}
