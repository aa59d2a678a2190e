use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tabled::Tabled;
use tabled::builder::Builder;
use tabled::settings::Style;
use terminal_size::{Width as TermWidth, terminal_size};

/// Narrowest a column is squeezed to before the table is allowed to overflow
const MIN_COLUMN_WIDTH: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human readable table
    #[default]
    Table,
    /// Pretty-printed JSON
    Json,
    /// Tab-separated values without a header
    Plain,
}

/// Current terminal width, or a sensible default when not attached to one
pub fn terminal_width() -> usize {
    match terminal_size() {
        Some((TermWidth(w), _)) => max_width_for(w as usize),
        None => 100,
    }
}

fn max_width_for(columns: usize) -> usize {
    // For very wide terminals, don't use the full width
    if columns > 200 { 180 } else { columns.max(40) }
}

/// Cut `text` to at most `max` characters, marking the cut with "..."
pub fn truncate(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    if max <= 3 {
        return text.chars().take(max).collect();
    }
    let mut cut: String = text.chars().take(max - 3).collect();
    cut.push_str("...");
    cut
}

/// Shrink the widest column until the row fits in `available` characters
fn fit_columns(widths: &mut [usize], available: usize) {
    // Each column costs its content plus 3 characters of border/padding
    let overhead = widths.len() * 3 + 1;
    let budget = available.saturating_sub(overhead);
    while widths.iter().sum::<usize>() > budget {
        let Some((index, widest)) = widths
            .iter()
            .copied()
            .enumerate()
            .max_by_key(|(_, w)| *w)
        else {
            break;
        };
        if widest <= MIN_COLUMN_WIDTH {
            break;
        }
        widths[index] = widest - 1;
    }
}

fn clean_cell(text: &str) -> String {
    text.replace(['\t', '\n', '\r'], " ")
}

/// Render rows as a table sized to the terminal
pub fn render_table(headers: Vec<String>, rows: Vec<Vec<String>>, available: usize) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }
    fit_columns(&mut widths, available);

    let mut builder = Builder::default();
    builder.push_record(headers);
    for row in rows {
        builder.push_record(
            row.iter()
                .enumerate()
                .map(|(i, cell)| truncate(cell, widths.get(i).copied().unwrap_or(usize::MAX))),
        );
    }

    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

/// Print a list of rows in the requested format
pub fn print_rows<T: Tabled + Serialize>(rows: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
        OutputFormat::Plain => {
            for row in rows {
                let fields: Vec<String> = row.fields().iter().map(|f| clean_cell(f)).collect();
                println!("{}", fields.join("\t"));
            }
        }
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("(none)");
                return Ok(());
            }
            let headers = T::headers().iter().map(|h| h.to_string()).collect();
            let cells = rows
                .iter()
                .map(|row| row.fields().iter().map(|f| clean_cell(f)).collect())
                .collect();
            println!("{}", render_table(headers, cells, terminal_width()));
        }
    }
    Ok(())
}

/// Print one resource: key/value lines for humans, the raw object for JSON
pub fn print_record<S: Serialize>(
    fields: &[(&str, String)],
    raw: &S,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(raw)?),
        OutputFormat::Plain => {
            for (key, value) in fields {
                println!("{}\t{}", key, clean_cell(value));
            }
        }
        OutputFormat::Table => {
            let label_width = fields.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
            for (key, value) in fields {
                println!("{:<label_width$}  {}", format!("{}:", key), value, label_width = label_width + 1);
            }
        }
    }
    Ok(())
}

/// Wrap free text (message bodies, descriptions) to the terminal width
pub fn wrap_text(text: &str) -> String {
    let width = terminal_width().min(100);
    text.lines()
        .map(|line| {
            if line.chars().count() <= width {
                line.to_string()
            } else {
                textwrap::fill(line, width)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// "3 days ago"-style rendering of a past timestamp
pub fn relative_time(when: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(when);
    if diff.num_days() > 0 {
        format!("{} days ago", diff.num_days())
    } else if diff.num_hours() > 0 {
        format!("{} hours ago", diff.num_hours())
    } else if diff.num_minutes() > 0 {
        format!("{} minutes ago", diff.num_minutes())
    } else {
        "just now".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly10!", 10), "exactly10!");
        assert_eq!(truncate("a much longer subject line", 10), "a much ...");
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
        assert_eq!(truncate("abcdef", 2), "ab");
    }

    #[test]
    fn test_fit_columns_shrinks_widest_first() {
        let mut widths = vec![10, 60, 20];
        fit_columns(&mut widths, 80);
        assert_eq!(widths.iter().sum::<usize>(), 80 - 10);
        assert_eq!(widths[0], 10);
        assert_eq!(widths[2], 20);

        let mut tiny = vec![30, 30];
        fit_columns(&mut tiny, 10);
        assert_eq!(tiny, vec![MIN_COLUMN_WIDTH, MIN_COLUMN_WIDTH]);
    }

    #[test]
    fn test_render_table_truncates_long_cells() {
        let table = render_table(
            vec!["Id".to_string(), "Subject".to_string()],
            vec![vec!["1".to_string(), "x".repeat(200)]],
            60,
        );
        assert!(table.contains("Subject"));
        assert!(table.contains("..."));
        assert!(table.lines().all(|l| l.chars().count() <= 60));
    }

    #[test]
    fn test_relative_time() {
        let now = Utc::now();
        assert_eq!(relative_time(now - Duration::days(3), now), "3 days ago");
        assert_eq!(relative_time(now - Duration::hours(5), now), "5 hours ago");
        assert_eq!(relative_time(now - Duration::minutes(7), now), "7 minutes ago");
        assert_eq!(relative_time(now, now), "just now");
    }

    #[test]
    fn test_max_width() {
        assert_eq!(max_width_for(300), 180);
        assert_eq!(max_width_for(120), 120);
        assert_eq!(max_width_for(10), 40);
    }
}
