//! Table rendering for phase listings, feature gates, and run reports.

use colored::Colorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::features::FeatureGateRegistry;
use crate::workflow::{PhaseInfo, PhaseState, RunReport};

#[derive(Tabled)]
struct PhaseRow {
    #[tabled(rename = "PHASE")]
    phase: String,
    #[tabled(rename = "DESCRIPTION")]
    description: String,
    #[tabled(rename = "FLAGS")]
    flags: String,
}

#[derive(Tabled)]
struct FeatureRow {
    #[tabled(rename = "FEATURE")]
    name: String,
    #[tabled(rename = "STAGE")]
    stage: String,
    #[tabled(rename = "DEFAULT")]
    default: String,
    #[tabled(rename = "LOCKED")]
    locked: String,
    #[tabled(rename = "ENABLED")]
    enabled: String,
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "PHASE")]
    phase: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "DURATION")]
    duration: String,
    #[tabled(rename = "NOTE")]
    note: String,
}

/// Print the visible phases of a workflow, indented by depth.
pub fn print_phases(workflow: &str, phases: &[PhaseInfo]) {
    let rows: Vec<PhaseRow> = phases
        .iter()
        .map(|p| PhaseRow {
            phase: indent(leaf(&p.path), p.depth),
            description: p.short.clone(),
            flags: if p.inherited_flags.is_empty() {
                "-".to_string()
            } else {
                p.inherited_flags.join(",")
            },
        })
        .collect();

    println!("{} ({} phases):", format!("Phases/{workflow}").bold(), rows.len());
    let mut table = Table::new(&rows);
    apply_table_style(&mut table);
    println!("{table}");
}

/// Print every registered feature gate with its effective value.
pub fn print_features(registry: &FeatureGateRegistry) {
    let rows: Vec<FeatureRow> = registry
        .gates()
        .map(|gate| {
            let enabled = registry.is_enabled(&gate.name).unwrap_or(gate.default_enabled);
            let mut value = enabled.to_string();
            if registry.override_for(&gate.name).is_some() {
                value.push_str(" (override)");
            }
            FeatureRow {
                name: gate.name.clone(),
                stage: gate.stage.to_string(),
                default: gate.default_enabled.to_string(),
                locked: if gate.lock_to_default { "yes" } else { "-" }.to_string(),
                enabled: if enabled {
                    value.green().to_string()
                } else {
                    value.dimmed().to_string()
                },
            }
        })
        .collect();

    println!("{}:", "Feature gates".bold());
    let mut table = Table::new(&rows);
    apply_table_style(&mut table);
    println!("{table}");
}

/// Print the per-phase result of a run.
pub fn print_report(report: &RunReport) {
    let rows: Vec<RecordRow> = report
        .records
        .iter()
        .map(|r| RecordRow {
            phase: indent(leaf(&r.path), r.depth),
            state: colorize_state(r.state),
            duration: r.duration().map_or_else(|| "-".to_string(), format_duration),
            note: r.note.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    println!();
    println!("{}:", format!("Workflow/{}", report.workflow).bold());
    let mut table = Table::new(&rows);
    apply_table_style(&mut table);
    println!("{table}");
}

/// Print the failing phase and what already completed, so the operator can
/// resume with `--phases`.
pub fn print_failure(phase: &str, completed: &[String]) {
    println!();
    println!(
        "{}",
        format!("Upgrade stopped at phase {phase}").red().bold()
    );
    if completed.is_empty() {
        println!("No phase completed before the failure.");
    } else {
        println!("Completed phases (not rolled back):");
        for path in completed {
            println!("  {} {path}", "✓".green());
        }
    }
}

fn colorize_state(state: PhaseState) -> String {
    let label = state.to_string();
    match state {
        PhaseState::Succeeded => label.green().to_string(),
        PhaseState::Failed => label.red().bold().to_string(),
        PhaseState::Skipped => label.yellow().to_string(),
        PhaseState::Pending | PhaseState::Running => label.dimmed().to_string(),
    }
}

fn format_duration(d: chrono::Duration) -> String {
    let ms = d.num_milliseconds();
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{}.{}s", ms / 1000, (ms % 1000) / 100)
    }
}

fn leaf(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn indent(name: &str, depth: usize) -> String {
    format!("{}{name}", "  ".repeat(depth))
}

/// kubectl-like layout: no borders, two spaces between columns.
fn apply_table_style(table: &mut Table) {
    use tabled::settings::object::Columns;
    use tabled::settings::themes::Theme;
    use tabled::settings::{Modify, Padding};

    let mut theme = Theme::from_style(Style::empty());
    theme.remove_horizontal_lines();
    table.with(theme);
    table.with(Modify::new(Columns::new(..)).with(Padding::new(0, 2, 0, 0)));
}
