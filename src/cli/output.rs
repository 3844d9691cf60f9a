//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, ValidationResult};
use crate::planner::{ActionType, PlannedAction, VmCreatePlan, VmUpdatePlan};
use crate::reconciler::{ReconcilePlan, ReconciliationResult};
use crate::state::VmState;
use crate::tower::{ObservedVm, VmStatus};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Sub-resource row for status display.
#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Boot")]
    boot: String,
    #[tabled(rename = "Detail")]
    detail: String,
    #[tabled(rename = "ID")]
    id: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Configuration is valid\n", "✓".green())
                } else {
                    format!(
                        "{} Configuration has {} error(s)\n",
                        "✗".red(),
                        result.error_count()
                    )
                };
                for error in &result.errors {
                    let _ = writeln!(output, "   - {error}");
                }
                if warnings || !result.is_valid() {
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   {} {warning}", "⚠".yellow());
                    }
                } else if result.warning_count() > 0 {
                    let _ = writeln!(
                        output,
                        "   {} warning(s), use --warnings to show them",
                        result.warning_count()
                    );
                }
                output
            }
        }
    }

    /// Formats a create or update plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &ReconcilePlan, detailed: bool) -> String {
        match (self.format, plan) {
            (OutputFormat::Json, _) => {
                serde_json::to_string_pretty(&PlanJson::from(plan)).unwrap_or_default()
            }
            (OutputFormat::Text, ReconcilePlan::Create(plan)) => {
                Self::format_create_plan_text(plan, detailed)
            }
            (OutputFormat::Text, ReconcilePlan::Update(plan)) => {
                Self::format_plan_text(plan, detailed)
            }
        }
    }

    fn format_create_plan_text(plan: &VmCreatePlan, detailed: bool) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "\nCreate plan for vm {}", plan.input.name);
        let _ = write!(
            output,
            "   Config hash: {}\n   Cluster: {}\n\n",
            ConfigHasher::short_hash(&plan.config_hash),
            plan.input.cluster_id
        );
        output.push_str(&Self::action_table(&plan.actions, detailed));
        let _ = write!(
            output,
            "\nPlan: {} to create, the remaining settings are applied once the vm exists\n",
            plan.action_count().to_string().green()
        );
        output
    }

    fn format_plan_text(plan: &VmUpdatePlan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required, vm {} is up to date.\n",
                "✓".green(),
                plan.vm_id
            );
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nUpdate plan for vm {}", plan.vm_id);
        let _ = write!(
            output,
            "   Config hash: {}\n   Observed status: {}\n\n",
            ConfigHasher::short_hash(&plan.config_hash),
            Self::format_status(plan.observed_status)
        );
        output.push_str(&Self::action_table(&plan.actions, detailed));

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete, {} guest change(s), {} power change(s)\n",
            plan.count(ActionType::Create).to_string().green(),
            plan.count(ActionType::Update).to_string().yellow(),
            plan.count(ActionType::Delete).to_string().red(),
            plan.count(ActionType::Configure),
            plan.count(ActionType::Power)
        );
        output
    }

    fn action_table(actions: &[PlannedAction], detailed: bool) -> String {
        let rows: Vec<PlanActionRow> = actions
            .iter()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_type(a.action_type),
                resource: a.resource.clone(),
                reason: if detailed {
                    a.reason.clone()
                } else {
                    Self::truncate(&a.reason, 40)
                },
            })
            .collect();
        let mut table = Table::new(rows).to_string();
        table.push('\n');
        table
    }

    /// Formats an observed VM.
    #[must_use]
    pub fn format_vm(&self, observed: &ObservedVm) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(observed).unwrap_or_default(),
            OutputFormat::Text => {
                let vm = &observed.vm;
                let mut output = String::new();
                let _ = write!(output, "\nVM {} ({})\n\n", vm.name, vm.id);
                let _ = writeln!(output, "   Status: {}", Self::format_status(vm.status));
                let cpu = vm
                    .cpu
                    .map_or_else(String::new, |c| format!(" ({}x{})", c.sockets, c.cores));
                let _ = writeln!(output, "   vCPU: {}{cpu}", vm.vcpu);
                let _ = writeln!(output, "   Memory: {} bytes", vm.memory);
                if let Some(hostname) = &vm.hostname {
                    let _ = writeln!(output, "   Hostname: {hostname}");
                }
                if !vm.dns_servers.is_empty() {
                    let _ = writeln!(output, "   DNS: {}", vm.dns_servers.join(", "));
                }

                let rows = Self::device_rows(observed);
                if rows.is_empty() {
                    output.push_str("\n   No devices attached.\n");
                } else {
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }
                output
            }
        }
    }

    fn device_rows(observed: &ObservedVm) -> Vec<DeviceRow> {
        let disks = observed.disks.iter().map(|d| DeviceRow {
            kind: "disk",
            boot: d.boot.to_string(),
            detail: format!("{} {} bytes", d.volume.name, d.volume.size),
            id: Self::truncate(&d.id, 12),
        });
        let cd_roms = observed.cd_roms.iter().map(|c| DeviceRow {
            kind: "cd-rom",
            boot: c.boot.to_string(),
            detail: c.iso_id.clone().unwrap_or_else(|| String::from("(empty)")),
            id: Self::truncate(&c.id, 12),
        });
        let nics = observed.nics.iter().map(|n| DeviceRow {
            kind: "nic",
            boot: String::from("-"),
            detail: format!(
                "vlan {} {}",
                n.vlan.as_ref().map_or("-", |v| v.id.as_str()),
                n.ip_address.as_deref().unwrap_or("dhcp")
            ),
            id: Self::truncate(&n.id, 12),
        });
        disks.chain(cd_roms).chain(nics).collect()
    }

    /// Formats a reconciliation result.
    #[must_use]
    pub fn format_reconciliation(&self, result: &ReconciliationResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => {
                if result.actions.is_empty() {
                    return format!("{} vm {} already converged\n", "✓".green(), result.vm_id);
                }
                let mut output = format!("{} Reconciliation successful\n\n", "✓".green());
                if result.created {
                    let _ = writeln!(output, "   created: vm {}", result.vm_id);
                }
                for step in &result.steps {
                    let _ = writeln!(output, "   done: {step}");
                }
                let _ = writeln!(output, "   Actions: {}", result.actions.len());
                let _ = writeln!(
                    output,
                    "   Final status: {}",
                    Self::format_status(result.final_status)
                );
                output
            }
        }
    }

    /// Formats recorded state.
    #[must_use]
    pub fn format_state(&self, state: &VmState) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(state).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = write!(output, "\nState: vm {}\n\n", state.vm_id);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Config hash: {}", ConfigHasher::short_hash(&state.config_hash));
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Status: {}", Self::format_status(state.vm.status));
                let _ = writeln!(
                    output,
                    "   Devices: {} disk(s), {} cd-rom(s), {} nic(s)",
                    state.vm.disks.len(),
                    state.vm.cd_roms.len(),
                    state.vm.nics.len()
                );
                if let Some(account) = &state.guest_os_account {
                    let _ = writeln!(output, "   Guest account: {}", account.username);
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let mark = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(output, "     {mark} {entry}");
                        if let Some(error) = &entry.error {
                            let _ = writeln!(output, "       {error}");
                        }
                    }
                }
                output
            }
        }
    }

    /// Formats a plain message.
    #[must_use]
    pub fn format_message(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&serde_json::json!({ "status": "success", "message": message }))
                    .unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {message}", "✓".green()),
        }
    }

    /// Formats an error message.
    #[must_use]
    pub fn format_error(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&serde_json::json!({ "status": "error", "message": message }))
                    .unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {message}", "✗".red()),
        }
    }

    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
            ActionType::Configure => "*configure".cyan().to_string(),
            ActionType::Power => "power".blue().to_string(),
        }
    }

    fn format_status(status: VmStatus) -> String {
        let text = status.to_string().to_lowercase();
        match status {
            VmStatus::Running => text.green().to_string(),
            VmStatus::Stopped | VmStatus::Deleted => text.red().to_string(),
            VmStatus::Suspended => text.yellow().to_string(),
            VmStatus::Unknown => text.dimmed().to_string(),
        }
    }

    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len - 3).collect();
            format!("{head}...")
        }
    }
}

#[derive(serde::Serialize)]
struct PlanJson {
    create: bool,
    vm_id: Option<String>,
    config_hash: String,
    observed_status: Option<VmStatus>,
    action_count: usize,
    actions: Vec<ActionJson>,
}

#[derive(serde::Serialize)]
struct ActionJson {
    action_type: String,
    resource: String,
    reason: String,
}

impl From<&ReconcilePlan> for PlanJson {
    fn from(plan: &ReconcilePlan) -> Self {
        let (vm_id, config_hash, observed_status, actions) = match plan {
            ReconcilePlan::Create(plan) => (None, &plan.config_hash, None, &plan.actions),
            ReconcilePlan::Update(plan) => (
                Some(plan.vm_id.clone()),
                &plan.config_hash,
                Some(plan.observed_status),
                &plan.actions,
            ),
        };
        Self {
            create: matches!(plan, ReconcilePlan::Create(_)),
            vm_id,
            config_hash: config_hash.clone(),
            observed_status,
            action_count: actions.len(),
            actions: actions
                .iter()
                .map(|a| ActionJson {
                    action_type: a.action_type.to_string(),
                    resource: a.resource.clone(),
                    reason: a.reason.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("0123456789abcdef", 10), "0123456...");
    }

    #[test]
    fn test_validation_json() {
        let mut result = ValidationResult::default();
        result.warnings.push(String::from("vm.disks[0]: ignored"));

        let text = OutputFormatter::new(OutputFormat::Json).format_validation(&result, false);
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");

        assert_eq!(value["valid"], true);
        assert_eq!(value["warnings"][0], "vm.disks[0]: ignored");
    }

    #[test]
    fn test_create_plan_json() {
        let spec: crate::config::VmSpec =
            serde_yaml::from_str("name: web-1\ncluster_id: c1\nvcpu: 2\nmemory: 1024")
                .expect("valid spec");
        let plan = ReconcilePlan::Create(VmCreatePlan::build(&spec).expect("valid plan"));

        let text = OutputFormatter::new(OutputFormat::Json).format_plan(&plan, false);
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");

        assert_eq!(value["create"], true);
        assert!(value["vm_id"].is_null());
        assert_eq!(value["action_count"], 1);
        assert_eq!(value["actions"][0]["resource"], "vm");
    }
}
