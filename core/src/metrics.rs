//! Business metrics for registration admission.
//!
//! Recorded through the `metrics` facade; the embedding application installs
//! whichever recorder/exporter it wants.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `registration_admissions_total{outcome}` - Admission decisions by outcome
//! - `registration_transitions_total{transition}` - Workflow transitions applied
//! - `registration_autofill_promotions_total` - Registrations moved off the wait list
//! - `registration_autofill_spaces_total` - Spaces moved off the wait list
//! - `registration_holds_expired_total` - Held registrations canceled by expiry
//!
//! ## Gauges
//! - `registration_spaces_remaining{host_id}` - Primary spaces left (only for limited hosts)

use metrics::{describe_counter, describe_gauge};

/// Initialize and register all registration metric descriptions.
///
/// Call once at startup, before any metrics are recorded.
pub fn register_registration_metrics() {
    describe_counter!(
        "registration_admissions_total",
        "Total admission decisions by outcome (admitted, waitlisted, rejected)"
    );
    describe_counter!(
        "registration_transitions_total",
        "Total workflow transitions applied, by transition id"
    );
    describe_counter!(
        "registration_autofill_promotions_total",
        "Total registrations promoted off the wait list"
    );
    describe_counter!(
        "registration_autofill_spaces_total",
        "Total spaces promoted off the wait list"
    );
    describe_counter!(
        "registration_holds_expired_total",
        "Total held registrations canceled after their hold expired"
    );
    describe_gauge!(
        "registration_spaces_remaining",
        "Primary spaces remaining per host"
    );

    tracing::info!("Registration metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record an admission decision.
///
/// # Arguments
///
/// * `outcome` - `"admitted"`, `"waitlisted"` or `"rejected"`
pub fn record_admission(outcome: &'static str) {
    metrics::counter!("registration_admissions_total", "outcome" => outcome).increment(1);
    tracing::debug!(outcome, "Recorded admission metric");
}

/// Record a workflow transition.
pub fn record_transition(transition: &str) {
    metrics::counter!("registration_transitions_total", "transition" => transition.to_owned())
        .increment(1);
    tracing::debug!(transition, "Recorded transition metric");
}

/// Record one autofill promotion.
///
/// # Arguments
///
/// * `spaces` - Spaces the promoted registration holds
pub fn record_autofill_promotion(spaces: u32) {
    metrics::counter!("registration_autofill_promotions_total").increment(1);
    metrics::counter!("registration_autofill_spaces_total").increment(u64::from(spaces));
    tracing::debug!(spaces, "Recorded autofill_promotion metric");
}

/// Record expired holds.
pub fn record_holds_expired(count: u32) {
    metrics::counter!("registration_holds_expired_total").increment(u64::from(count));
    tracing::debug!(count, "Recorded holds_expired metric");
}

/// Update the remaining spaces gauge for a host.
pub fn update_spaces_remaining(host_id: &str, remaining: u32) {
    metrics::gauge!("registration_spaces_remaining", "host_id" => host_id.to_owned())
        .set(f64::from(remaining));
    tracing::debug!(host_id, remaining, "Updated spaces_remaining metric");
}
