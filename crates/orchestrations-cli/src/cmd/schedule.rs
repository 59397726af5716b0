use crate::output::print_json;
use clap::Subcommand;
use orchestrations_core::clock::{Clock, SystemClock};
use orchestrations_core::scheduler::RecurringScheduler;
use std::path::Path;
use std::sync::Arc;

#[derive(Subcommand)]
pub enum ScheduleSubcommand {
    /// Run a single recurring scheduling pass and exit
    Tick,
}

pub fn run(root: &Path, subcmd: ScheduleSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ScheduleSubcommand::Tick => tick(root, json),
    }
}

fn tick(root: &Path, json: bool) -> anyhow::Result<()> {
    let (config, store) = super::open_store(root)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let scheduler =
        RecurringScheduler::new(store, clock).with_lookback(config.scheduler.lookback());

    let created = scheduler.tick()?;

    if json {
        print_json(&serde_json::json!({ "created": created }))?;
    } else if created.is_empty() {
        println!("No recurring orchestrations due.");
    } else {
        for id in created {
            println!("Scheduled instance {id}");
        }
    }
    Ok(())
}
