use crate::output::print_json;
use anyhow::Context;
use orchestrations_core::clock::{Clock, SystemClock};
use orchestrations_core::register::{OrchestrationRegister, SyncReport};
use orchestrations_server::catalog;
use std::path::Path;
use std::sync::Arc;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let (_, store) = super::open_store(root)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = catalog::declared().context("invalid declared catalog")?;

    let register = OrchestrationRegister::new(store, clock);
    let report = register.synchronize(&registry)?;

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }

    match report.rejection_summary() {
        Some(summary) => anyhow::bail!(summary),
        None => Ok(()),
    }
}

fn print_report(report: &SyncReport) {
    let groups = [
        ("inserted", &report.inserted),
        ("updated", &report.updated),
        ("re-enabled", &report.re_enabled),
        ("disabled", &report.disabled),
        ("unchanged", &report.unchanged),
    ];
    for (label, names) in groups {
        for name in names {
            println!("  {label:<10} {name}");
        }
    }
    for rejected in &report.rejected {
        println!(
            "  {:<10} {} ({})",
            "rejected",
            rejected.unique_name,
            rejected.reasons.join(", ")
        );
    }
}
