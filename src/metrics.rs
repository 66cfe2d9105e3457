//! Lightweight metrics helpers for vhostd.
//!
//! Thin wrappers around the `metrics` crate macros. No exporter is embedded;
//! the embedding application installs whatever recorder it prefers and these
//! calls become no-ops when none is installed.
//!
//! Provided metrics:
//! * `vhostd_commands_total` (counter, labels: operation, outcome)
//! * `vhostd_command_duration_seconds` (histogram, label: operation)
//! * `vhostd_rollbacks_total` (counter, label: phase)
//! * `vhostd_virtual_hosts` (gauge)
//! * `vhostd_mappings` (gauge)
use std::time::Instant;

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

pub const VHOSTD_COMMANDS_TOTAL: &str = "vhostd_commands_total";
pub const VHOSTD_COMMAND_DURATION_SECONDS: &str = "vhostd_command_duration_seconds";
pub const VHOSTD_ROLLBACKS_TOTAL: &str = "vhostd_rollbacks_total";
pub const VHOSTD_VIRTUAL_HOSTS: &str = "vhostd_virtual_hosts";
pub const VHOSTD_MAPPINGS: &str = "vhostd_mappings";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        VHOSTD_COMMANDS_TOTAL,
        Unit::Count,
        "Administrative commands executed, by operation and outcome."
    );
    describe_histogram!(
        VHOSTD_COMMAND_DURATION_SECONDS,
        Unit::Seconds,
        "Wall time of administrative commands including serving-layer reloads."
    );
    describe_counter!(
        VHOSTD_ROLLBACKS_TOTAL,
        Unit::Count,
        "Commands rolled back, by the phase that failed."
    );
    describe_gauge!(VHOSTD_VIRTUAL_HOSTS, "Virtual hosts in the last committed configuration.");
    describe_gauge!(VHOSTD_MAPPINGS, "Mappings in the last committed configuration.");
});

/// Count a finished command.
pub fn increment_command_total(operation: &'static str, outcome: &'static str) {
    counter!(VHOSTD_COMMANDS_TOTAL, "operation" => operation, "outcome" => outcome).increment(1);
}

pub fn increment_rollback_total(phase: &'static str) {
    counter!(VHOSTD_ROLLBACKS_TOTAL, "phase" => phase).increment(1);
}

/// Publish the size of the configuration that was just committed.
pub fn set_configuration_size(virtual_hosts: usize, mappings: usize) {
    gauge!(VHOSTD_VIRTUAL_HOSTS).set(virtual_hosts as f64);
    gauge!(VHOSTD_MAPPINGS).set(mappings as f64);
}

/// RAII helper measuring command duration, recorded on drop so early returns
/// are measured too.
pub struct CommandTimer {
    start: Instant,
    operation: &'static str,
}

impl CommandTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for CommandTimer {
    fn drop(&mut self) {
        histogram!(VHOSTD_COMMAND_DURATION_SECONDS, "operation" => self.operation)
            .record(self.start.elapsed().as_secs_f64());
    }
}

/// Register metric descriptions (idempotent).
pub fn init_metrics() {
    Lazy::force(&DESCRIPTIONS);
    tracing::debug!("vhostd metric descriptions registered");
}
