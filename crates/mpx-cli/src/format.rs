// SPDX-License-Identifier: MIT OR Apache-2.0
//! Output formatting for the mirrorpix CLI.

use mpx_core::{AttemptStatus, HistoryRecord};
use mpx_history::PeriodStat;

/// One line per record: timestamp, primary backend, name, link.
pub fn record_line(record: &HistoryRecord) -> String {
    let when = chrono::DateTime::from_timestamp_millis(record.timestamp_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "????-??-??".into());
    let failed = record
        .results
        .iter()
        .filter(|a| a.status == AttemptStatus::Failed)
        .count();
    let suffix = if failed > 0 {
        format!("  ({failed} failed)")
    } else {
        String::new()
    };
    format!(
        "{when}  {:<9} {:<28} {}{suffix}",
        record.primary_backend.as_str(),
        truncate(&record.local_file_name, 28),
        record.generated_link,
    )
}

/// Multi-line detail view of one record.
pub fn record_detail(record: &HistoryRecord) -> String {
    let mut out = String::new();
    out.push_str(&format!("id:      {}\n", record.id));
    out.push_str(&format!("file:    {}\n", record.local_file_name));
    out.push_str(&format!("primary: {}\n", record.primary_backend));
    out.push_str(&format!("link:    {}\n", record.generated_link));
    out.push_str("attempts:\n");
    for attempt in &record.results {
        match attempt.status {
            AttemptStatus::Success => {
                let url = attempt
                    .result
                    .as_ref()
                    .map(|r| r.url.as_str())
                    .unwrap_or("-");
                out.push_str(&format!("  {:<9} ok      {url}\n", attempt.backend_id));
            }
            AttemptStatus::Failed => {
                let error = attempt.error.as_deref().unwrap_or("-");
                out.push_str(&format!("  {:<9} failed  {error}\n", attempt.backend_id));
            }
        }
    }
    out
}

/// Timeline sidebar rendering.
pub fn stats_lines(stats: &[PeriodStat]) -> String {
    stats
        .iter()
        .map(|s| format!("{}-{:02}  {}", s.year, s.month, s.count))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a progress percentage bar segment for terminal output.
pub fn percent_bar(percent: u8, width: usize) -> String {
    let filled = usize::from(percent.min(100)) * width / 100;
    format!(
        "[{}{}] {percent:>3}%",
        "#".repeat(filled),
        "-".repeat(width - filled)
    )
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
