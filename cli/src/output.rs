//! Table and value formatting for CLI output.

use chrono::{DateTime, Utc};
use comfy_table::{ContentArrangement, Table};

/// Borderless table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Human-readable byte count using binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [(&str, u64); 3] = [("GB", 1 << 30), ("MB", 1 << 20), ("KB", 1 << 10)];

    UNITS
        .iter()
        .find(|(_, size)| bytes >= *size)
        .map(|(unit, size)| format!("{:.1} {}", bytes as f64 / *size as f64, unit))
        .unwrap_or_else(|| format!("{} B", bytes))
}

/// Relative time such as "5 minutes ago".
pub fn format_ago(dt: &DateTime<Utc>) -> String {
    let secs = Utc::now().signed_duration_since(*dt).num_seconds();
    if secs < 0 {
        return "just now".to_string();
    }

    const STEPS: [(&str, i64); 5] = [
        ("years", 365 * 86_400),
        ("months", 30 * 86_400),
        ("days", 86_400),
        ("hours", 3_600),
        ("minutes", 60),
    ];
    STEPS
        .iter()
        .find(|(_, unit)| secs >= *unit)
        .map(|(name, unit)| format!("{} {} ago", secs / unit, name))
        .unwrap_or_else(|| format!("{secs} seconds ago"))
}
