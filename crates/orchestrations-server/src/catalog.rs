//! Orchestration descriptions declared by this deployment.
//!
//! Every description the host can run is registered here explicitly. The
//! register synchronizes this set with the persisted catalog at startup.

use orchestrations_core::description::{OrchestrationDescription, OrchestrationDescriptionUniqueName};
use orchestrations_core::register::DescriptionRegistry;
use orchestrations_core::Result;
use serde_json::json;

pub fn declared() -> Result<DescriptionRegistry> {
    let mut registry = DescriptionRegistry::new();
    registry.register(calculation()?)?;
    registry.register(electrical_heating()?)?;
    registry.register(request_calculated_energy_time_series()?)?;
    registry.register(request_wholesale_services()?)?;
    Ok(registry)
}

/// Brs_023_027: a calculation started once-off or scheduled from the UI.
fn calculation() -> Result<OrchestrationDescription> {
    let mut d = OrchestrationDescription::new(
        OrchestrationDescriptionUniqueName::new("Brs_023_027", 1)?,
        "Orchestration_Brs_023_027_V1",
    );
    d.can_be_scheduled = true;
    d.parameter_schema = json!({
        "calculation_type": "string",
        "grid_area_codes": ["string"],
        "period_start_date": "datetime",
        "period_end_date": "datetime",
        "is_internal_calculation": "bool",
    });
    d.append_step_description("Calculation");
    d.append_skippable_step_description(
        "Enqueue actor messages",
        "Internal calculations produce no actor messages",
    )?;
    Ok(d)
}

/// Brs_045: recurring electrical heating calculation, weekdays at 02:00.
fn electrical_heating() -> Result<OrchestrationDescription> {
    let mut d = OrchestrationDescription::new(
        OrchestrationDescriptionUniqueName::new("Brs_045", 1)?,
        "Orchestration_Brs_045_V1",
    );
    d.set_recurring_cron_expression("0 2 * * 1-5")?;
    d.append_step_description("Calculate");
    d.append_step_description("Enqueue");
    Ok(d)
}

/// Brs_026: request for aggregated measure data, triggered by an inbound message.
fn request_calculated_energy_time_series() -> Result<OrchestrationDescription> {
    let mut d = OrchestrationDescription::new(
        OrchestrationDescriptionUniqueName::new("Brs_026", 1)?,
        "Orchestration_Brs_026_V1",
    );
    d.parameter_schema = json!({
        "requested_for_actor_number": "string",
        "requested_for_actor_role": "string",
        "business_reason": "string",
        "period_start": "string",
        "period_end": "string",
    });
    d.append_step_description("Validate request");
    d.append_step_description("Enqueue actor messages");
    Ok(d)
}

/// Brs_028: request for wholesale services, triggered by an inbound message.
fn request_wholesale_services() -> Result<OrchestrationDescription> {
    let mut d = OrchestrationDescription::new(
        OrchestrationDescriptionUniqueName::new("Brs_028", 1)?,
        "Orchestration_Brs_028_V1",
    );
    d.parameter_schema = json!({
        "requested_for_actor_number": "string",
        "requested_for_actor_role": "string",
        "period_start": "string",
        "period_end": "string",
        "charge_types": ["string"],
    });
    d.append_step_description("Validate request");
    d.append_step_description("Enqueue actor messages");
    Ok(d)
}
