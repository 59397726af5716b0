use crate::output::{display_time, print_json, print_table};
use clap::Subcommand;
use orchestrations_core::clock::{Clock, SystemClock};
use orchestrations_core::commands::OrchestrationService;
use orchestrations_core::description::{DescriptionId, OrchestrationDescriptionUniqueName};
use orchestrations_core::instance::{InstanceId, OrchestrationInstance};
use orchestrations_core::lifecycle::TerminationState;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Subcommand)]
pub enum InstanceSubcommand {
    /// List instances
    List {
        /// Only instances of this description (name:version)
        #[arg(long)]
        orchestration: Option<String>,
    },
    /// Show one instance with its steps
    Show { id: String },
    /// Cancel a scheduled instance that has not started
    Cancel { id: String },
    /// Terminate a running instance
    Terminate {
        id: String,
        /// succeeded, failed or user_canceled
        #[arg(long, default_value = "failed")]
        outcome: String,
    },
}

pub fn run(root: &Path, subcmd: InstanceSubcommand, json: bool) -> anyhow::Result<()> {
    let (config, store) = super::open_store(root)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = OrchestrationService::new(store, clock).with_silent_mode(config.silent_mode);

    match subcmd {
        InstanceSubcommand::List { orchestration } => {
            list(&service, orchestration.as_deref(), json)
        }
        InstanceSubcommand::Show { id } => show(&service, &id, json),
        InstanceSubcommand::Cancel { id } => cancel(&service, &id, json),
        InstanceSubcommand::Terminate { id, outcome } => terminate(&service, &id, &outcome, json),
    }
}

fn list(
    service: &OrchestrationService,
    orchestration: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let filter = match orchestration {
        Some(s) => {
            let unique_name: OrchestrationDescriptionUniqueName = s.parse()?;
            Some(service.get_description(&unique_name)?.id)
        }
        None => None,
    };
    let mut instances = service.list_instances(filter)?;
    instances.sort_by_key(|i| i.created_at);

    if json {
        return print_json(&instances);
    }
    if instances.is_empty() {
        println!("No instances.");
        return Ok(());
    }

    let names: HashMap<DescriptionId, String> = service
        .list_descriptions()?
        .into_iter()
        .map(|d| (d.id, d.unique_name.to_string()))
        .collect();

    let rows = instances
        .iter()
        .map(|i| {
            vec![
                i.id.to_string(),
                names
                    .get(&i.description_id)
                    .cloned()
                    .unwrap_or_else(|| i.description_id.to_string()),
                state_label(i),
                display_time(i.scheduled_to_run_at),
                i.created_by.clone(),
            ]
        })
        .collect();
    print_table(
        &["ID", "ORCHESTRATION", "STATE", "SCHEDULED", "CREATED BY"],
        rows,
    );
    Ok(())
}

fn show(service: &OrchestrationService, id: &str, json: bool) -> anyhow::Result<()> {
    let id: InstanceId = id.parse()?;
    let instance = service.get_instance(id)?;
    if json {
        return print_json(&instance);
    }

    println!("Instance:   {}", instance.id);
    println!("State:      {}", state_label(&instance));
    println!("Created:    {} by {}", display_time(Some(instance.created_at)), instance.created_by);
    println!("Scheduled:  {}", display_time(instance.scheduled_to_run_at));
    if let Some(key) = &instance.idempotency_key {
        println!("Key:        {key}");
    }
    println!();

    let rows = instance
        .steps()
        .iter()
        .map(|s| {
            let state = match s.outcome() {
                Some(outcome) => outcome.to_string(),
                None => s.lifecycle.state_name().to_string(),
            };
            vec![s.sequence.to_string(), s.description.clone(), state]
        })
        .collect();
    print_table(&["SEQ", "STEP", "STATE"], rows);
    Ok(())
}

fn cancel(service: &OrchestrationService, id: &str, json: bool) -> anyhow::Result<()> {
    let id: InstanceId = id.parse()?;
    let instance = service.cancel_scheduled_instance(id)?;
    if json {
        print_json(&instance)?;
    } else {
        println!("Cancelled instance {}", instance.id);
    }
    Ok(())
}

fn terminate(
    service: &OrchestrationService,
    id: &str,
    outcome: &str,
    json: bool,
) -> anyhow::Result<()> {
    let outcome: TerminationState = outcome.parse()?;
    let id: InstanceId = id.parse()?;
    let instance = service.terminate_instance(id, outcome)?;
    if json {
        print_json(&instance)?;
    } else {
        println!("Terminated instance {} ({outcome})", instance.id);
    }
    Ok(())
}

fn state_label(instance: &OrchestrationInstance) -> String {
    match instance.lifecycle.outcome() {
        Some(outcome) => format!("terminated ({outcome})"),
        None => instance.lifecycle.state_name().to_string(),
    }
}
