//! Output formatting: table, JSON, plain.
//!
//! Renders a [`TrackerSummary`] in the format selected by `--output`.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use kistrack_core::{PhySummary, TrackerSummary};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stderr().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// A one-line status message for stderr, e.g. `connected  lab`.
pub fn status_line(label: &str, detail: &str, ok: bool, color: bool) -> String {
    if !color {
        return format!("{label:<12} {detail}");
    }
    let label = format!("{label:<12}");
    if ok {
        format!("{} {}", label.green().bold(), detail.dimmed())
    } else {
        format!("{} {}", label.red().bold(), detail)
    }
}

// ── Table row ────────────────────────────────────────────────────────

#[derive(Tabled)]
struct PhyRow {
    #[tabled(rename = "PHY")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Handler")]
    handler: &'static str,
    #[tabled(rename = "Devices")]
    devices: usize,
    #[tabled(rename = "Packets")]
    packets: u64,
    #[tabled(rename = "Data")]
    data: u64,
    #[tabled(rename = "Errors")]
    errors: u64,
    #[tabled(rename = "Filtered")]
    filtered: u64,
    #[tabled(rename = "Rate")]
    rate: u64,
    #[tabled(rename = "Crypt")]
    crypt: u64,
}

impl From<&PhySummary> for PhyRow {
    fn from(p: &PhySummary) -> Self {
        Self {
            id: p.phy_id.map_or_else(|| "*".into(), |id| id.to_string()),
            name: p.phy_name.clone(),
            handler: if p.handler_bound { "bound" } else { "-" },
            devices: p.devices,
            packets: p.counters.packets,
            data: p.counters.data_packets,
            errors: p.counters.error_packets,
            filtered: p.counters.filter_packets,
            rate: p.counters.packet_rate,
            crypt: p.crypt_packets,
        }
    }
}

// ── Render dispatch ──────────────────────────────────────────────────

/// Render a summary in the chosen format.
///
/// - `table`: one row per PHY plus a closing `*` row with the global totals
/// - `json` / `json-compact`: the summary as serialized by serde
/// - `plain`: `<phy id>\t<name>\t<packets>` per PHY, for scripting
pub fn render_summary(format: OutputFormat, summary: &TrackerSummary) -> Result<String, CliError> {
    Ok(match format {
        OutputFormat::Table => {
            let rows: Vec<PhyRow> = summary
                .phys
                .iter()
                .chain(std::iter::once(&summary.total))
                .map(PhyRow::from)
                .collect();
            let mut table = render_table(&rows);
            if summary.bindings.duplicate_names > 0 {
                table.push_str(&format!(
                    "\n{} PHY name collision(s); see -v output",
                    summary.bindings.duplicate_names
                ));
            }
            table
        }
        OutputFormat::Json => serde_json::to_string_pretty(summary)?,
        OutputFormat::JsonCompact => serde_json::to_string(summary)?,
        OutputFormat::Plain => summary
            .phys
            .iter()
            .map(|p| {
                let id = p.phy_id.map(|id| id.to_string()).unwrap_or_default();
                format!("{id}\t{}\t{}", p.phy_name, p.counters.packets)
            })
            .collect::<Vec<_>>()
            .join("\n"),
    })
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}
