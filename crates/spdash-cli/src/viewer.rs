//! Plain-text state viewer.

use std::fmt::Write;

use chrono::{TimeZone, Utc};
use spdash_core::{StaleWarning, StateSnapshot, StateVariable, Timestamp, VariableSchema};

const HEADERS: [&str; 3] = ["Key", "Type", "Value"];

/// Render the snapshot as a Key/Type/Value table.
pub fn render_table(snapshot: &StateSnapshot, pattern: Option<&str>) -> String {
    let rows: Vec<[String; 3]> = snapshot
        .variables
        .iter()
        .filter(|v| pattern.map_or(true, |p| spdash_store::glob_match(p, v.id())))
        .map(|v| {
            [
                v.id().to_string(),
                v.value_type().name().to_string(),
                v.value().to_string(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    if let Some(stale) = &snapshot.stale {
        let _ = writeln!(out, "{}", stale_banner(stale));
    }
    push_row(&mut out, &HEADERS.map(String::from), &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let _ = writeln!(out, "{}", rule.join("  "));
    for row in &rows {
        push_row(&mut out, row, &widths);
    }
    if rows.is_empty() {
        let _ = writeln!(out, "(no variables)");
    }
    out
}

fn push_row(out: &mut String, row: &[String; 3], widths: &[usize; 3]) {
    let line = format!(
        "{:<w0$}  {:<w1$}  {}",
        row[0],
        row[1],
        row[2],
        w0 = widths[0],
        w1 = widths[1]
    );
    let _ = writeln!(out, "{}", line.trim_end());
}

/// Render one variable with its declaration, if any.
pub fn render_detail(
    var: &StateVariable,
    declared: Option<&VariableSchema>,
    stale: Option<&StaleWarning>,
) -> String {
    let mut out = String::new();
    if let Some(stale) = stale {
        let _ = writeln!(out, "{}", stale_banner(stale));
    }
    let _ = writeln!(out, "Key:       {}", var.id());
    let _ = writeln!(out, "Type:      {}", var.value_type());
    let _ = writeln!(out, "Value:     {}", var.value());
    let _ = writeln!(out, "Updated:   {}", format_millis(var.timestamp()));
    let _ = writeln!(out, "Origin:    {}", var.origin());
    if let Some(seq) = var.sequence() {
        let _ = writeln!(out, "Sequence:  {}", seq);
    }
    match declared {
        Some(decl) => {
            let _ = writeln!(out, "Writable:  {}", decl.writable);
            if !decl.allowed.is_empty() {
                let _ = writeln!(out, "Allowed:   {}", decl.allowed.join(", "));
            }
            if decl.min.is_some() || decl.max.is_some() {
                let bound = |b: Option<f64>| b.map_or("-".to_string(), |v| v.to_string());
                let _ = writeln!(out, "Range:     [{}, {}]", bound(decl.min), bound(decl.max));
            }
        }
        None => {
            let _ = writeln!(out, "Declared:  no");
        }
    }
    let _ = writeln!(out, "Raw:       {}", spdash_core::encode_string(var.value()));
    out
}

fn stale_banner(stale: &StaleWarning) -> String {
    format!(
        "WARNING: data may be stale ({}) since {}",
        stale.reason,
        format_millis(stale.since)
    )
}

fn format_millis(ms: Timestamp) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string(),
        None => ms.to_string(),
    }
}
