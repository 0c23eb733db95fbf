//! Box-drawing table renderer for fleet status output.

use colored::Colorize;
use shadowfleet_kernel::shadow::ShadowSnapshot;
use shadowfleet_types::health::Health;

/// A table builder that collects headers and rows, then renders them with
/// Unicode box-drawing borders.
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Add a row. Extra cells are truncated; missing cells are filled with "".
    pub fn add_row(&mut self, cells: Vec<String>) {
        let mut cells = cells;
        cells.resize(self.headers.len(), String::new());
        self.rows.push(cells);
    }

    fn column_widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }
        widths
    }

    fn border(widths: &[usize], left: &str, mid: &str, right: &str) -> String {
        let segments: Vec<String> = widths.iter().map(|w| "\u{2500}".repeat(w + 2)).collect();
        format!("{left}{}{right}", segments.join(mid))
    }

    /// Render with `style` applied to each padded data cell.
    ///
    /// ```text
    /// ┌───────┬────────┐
    /// │ Agent │ State  │
    /// ├───────┼────────┤
    /// │ a1    │ active │
    /// └───────┴────────┘
    /// ```
    pub fn render_with(&self, style: impl Fn(usize, &str, String) -> String) -> String {
        let widths = self.column_widths();
        let mut lines = vec![Self::border(&widths, "\u{250c}", "\u{252c}", "\u{2510}")];

        let header: Vec<String> = self
            .headers
            .iter()
            .zip(widths.iter().copied())
            .map(|(h, w)| format!(" {} ", format!("{h:<w$}").bold()))
            .collect();
        lines.push(format!("\u{2502}{}\u{2502}", header.join("\u{2502}")));
        lines.push(Self::border(&widths, "\u{251c}", "\u{253c}", "\u{2524}"));

        for row in &self.rows {
            let cells: Vec<String> = row
                .iter()
                .zip(widths.iter().copied())
                .enumerate()
                .map(|(col, (cell, w))| {
                    format!(" {} ", style(col, cell.as_str(), format!("{cell:<w$}")))
                })
                .collect();
            lines.push(format!("\u{2502}{}\u{2502}", cells.join("\u{2502}")));
        }

        lines.push(Self::border(&widths, "\u{2514}", "\u{2534}", "\u{2518}"));
        lines.join("\n")
    }

    pub fn render(&self) -> String {
        self.render_with(|_, _, padded| padded)
    }
}

const HEALTH_COLUMNS: [usize; 2] = [2, 3];

fn paint(health: &str, padded: String) -> String {
    match health {
        "green" => padded.green().to_string(),
        "yellow" => padded.yellow().to_string(),
        "red" => padded.red().bold().to_string(),
        _ => padded,
    }
}

/// Fleet status table, one row per shadow.
pub fn status_table(snapshots: &[ShadowSnapshot]) -> String {
    let mut table = Table::new(&[
        "Agent",
        "State",
        "Health",
        "Overall",
        "Necessity",
        "Max level",
        "Missed",
        "Last seen",
    ]);
    for snap in snapshots {
        table.add_row(vec![
            snap.agent_id.to_string(),
            snap.state.to_string(),
            snap.health.to_string(),
            snap.overall_health.to_string(),
            format!("{:?}", snap.necessity).to_lowercase(),
            snap.max_observed_level.to_string(),
            snap.missed_heartbeats.to_string(),
            snap.last_seen.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }
    table.render_with(|col, cell, padded| {
        if HEALTH_COLUMNS.contains(&col) {
            paint(cell, padded)
        } else {
            padded
        }
    })
}

/// Count shadows per overall health.
pub fn health_counts(snapshots: &[ShadowSnapshot]) -> [(Health, usize); 3] {
    [Health::Green, Health::Yellow, Health::Red]
        .map(|h| (h, snapshots.iter().filter(|s| s.overall_health == h).count()))
}
