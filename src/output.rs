use crate::chrome::{CommandResult, SessionStatus, SkillDraft, TabInfo};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

pub trait OutputFormatter {
    fn format_text(&self) -> String;
    fn format_json(&self, pretty: bool) -> crate::Result<String>;
}

pub fn print_output<T: OutputFormatter>(
    data: &T,
    as_json: bool,
    json_pretty: bool,
) -> crate::Result<()> {
    let output = if as_json {
        data.format_json(json_pretty)?
    } else {
        data.format_text()
    };

    println!("{}", output);
    Ok(())
}

pub fn to_json<T: Serialize>(data: &T, pretty: bool) -> crate::Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(data)?)
    } else {
        Ok(serde_json::to_string(data)?)
    }
}

pub mod text {
    use colored::Colorize;

    pub fn success(msg: &str) -> String {
        format!("{} {}", "✓".green().bold(), msg)
    }

    pub fn error(msg: &str) -> String {
        format!("{} {}", "✗".red().bold(), msg)
    }

    pub fn warning(msg: &str) -> String {
        format!("{} {}", "⚠".yellow().bold(), msg)
    }

    pub fn info(msg: &str) -> String {
        format!("{} {}", "ℹ".blue().bold(), msg)
    }

    pub fn bullet(msg: &str) -> String {
        format!("  • {}", msg)
    }

    pub fn section(title: &str) -> String {
        format!("\n{}\n{}", title.bold(), "─".repeat(title.chars().count()))
    }

    pub fn key_value(key: &str, value: &str) -> String {
        format!("  {}: {}", key.bold(), value)
    }

    pub fn table_header(columns: &[&str]) -> String {
        let header = columns
            .iter()
            .map(|c| format!("{:20}", c.bold()))
            .collect::<Vec<_>>()
            .join(" ");
        let divider = "─".repeat(columns.len() * 21);
        format!("{}\n{}", header, divider)
    }

    pub fn table_row(values: &[String]) -> String {
        values
            .iter()
            .map(|v| format!("{:20}", v))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{}...", kept)
        }
    }
}

pub struct TableBuilder {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self {
            headers: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn headers(mut self, headers: Vec<String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn row(mut self, row: Vec<String>) -> Self {
        self.rows.push(row);
        self
    }

    pub fn build(self) -> String {
        let mut output = String::new();

        if !self.headers.is_empty() {
            output.push_str(&text::table_header(
                &self.headers.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            ));
            output.push('\n');
        }

        for row in self.rows {
            output.push_str(&text::table_row(&row));
            output.push('\n');
        }

        output
    }
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct TabList(pub Vec<TabInfo>);

impl OutputFormatter for TabList {
    fn format_text(&self) -> String {
        if self.0.is_empty() {
            return text::info("No open tabs");
        }
        self.0
            .iter()
            .fold(
                TableBuilder::new().headers(vec!["Id".into(), "Title".into(), "Url".into()]),
                |table, tab| {
                    table.row(vec![
                        tab.id.clone(),
                        text::truncate(&tab.title, 20),
                        text::truncate(&tab.url, 60),
                    ])
                },
            )
            .build()
    }

    fn format_json(&self, pretty: bool) -> crate::Result<String> {
        to_json(self, pretty)
    }
}

impl OutputFormatter for SessionStatus {
    fn format_text(&self) -> String {
        let mut lines = vec![
            text::section(&format!("Tab {}", self.tab)),
            text::key_value("Attached", &self.attached.to_string()),
            text::key_value("Task refs", &self.task_refs.to_string()),
            text::key_value("Recording", &self.recording.to_string()),
            text::key_value("Contexts", &self.context_count.to_string()),
            text::key_value("Buffered events", &self.buffered_events.to_string()),
        ];
        if self.attaching {
            lines.push(text::warning("Attach in progress"));
        }
        if let Some(id) = &self.correlation_id {
            lines.push(text::key_value("Correlation", id));
        }
        if let Some(at) = &self.attached_at {
            lines.push(text::key_value("Attached at", &at.to_rfc3339()));
        }
        for (frame, url) in &self.frame_urls {
            lines.push(text::bullet(&format!("{} {}", frame, text::truncate(url, 80))));
        }
        lines.join("\n")
    }

    fn format_json(&self, pretty: bool) -> crate::Result<String> {
        to_json(self, pretty)
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct SessionList(pub Vec<SessionStatus>);

impl OutputFormatter for SessionList {
    fn format_text(&self) -> String {
        if self.0.is_empty() {
            return text::info("No sessions");
        }
        self.0
            .iter()
            .map(|status| {
                let mut flags = Vec::new();
                if status.attached {
                    flags.push("attached".to_string());
                }
                if status.recording {
                    flags.push("recording".to_string());
                }
                if status.task_refs > 0 {
                    flags.push(format!("{} task(s)", status.task_refs));
                }
                if flags.is_empty() {
                    flags.push("idle".to_string());
                }
                text::bullet(&format!("{} ({})", status.tab, flags.join(", ")))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn format_json(&self, pretty: bool) -> crate::Result<String> {
        to_json(self, pretty)
    }
}

impl OutputFormatter for CommandResult {
    fn format_text(&self) -> String {
        let mut lines = Vec::new();
        if self.success {
            lines.push(text::success("Command succeeded"));
        } else {
            let code = self.error_code.map(|c| c.as_str()).unwrap_or("ERROR");
            lines.push(text::error(&format!(
                "{}: {}",
                code,
                self.error.as_deref().unwrap_or("command failed")
            )));
        }

        if let Some(output) = &self.output {
            match output.get("results").and_then(|v| v.as_array()) {
                Some(results) => {
                    lines.push(text::section("Actions"));
                    lines.extend(results.iter().map(action_line));
                }
                None => {
                    lines.push(serde_json::to_string_pretty(output).unwrap_or_default());
                }
            }
        }
        lines.join("\n")
    }

    fn format_json(&self, pretty: bool) -> crate::Result<String> {
        to_json(self, pretty)
    }
}

fn action_line(result: &Value) -> String {
    let field = |key: &str| result.get(key).and_then(|v| v.as_str()).unwrap_or("");
    let index = result.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
    let verified = result
        .get("verified")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let line = format!("#{} {} {}", index, field("type"), field("selector"));
    if verified {
        text::success(&line)
    } else {
        text::error(&format!("{} ({})", line, field("errorCode")))
    }
}

impl OutputFormatter for SkillDraft {
    fn format_text(&self) -> String {
        let mut lines = vec![text::section(&format!(
            "Captured {} action(s)",
            self.actions.len()
        ))];
        lines.extend(self.event_summary());
        if self.segments.len() > 1 {
            lines.push(text::section("Segments"));
            for segment in &self.segments {
                lines.push(text::bullet(&format!(
                    "#{} ends {} with {} event(s)",
                    segment.index,
                    segment
                        .ends_at
                        .map(crate::chrome::recording::format_timestamp)
                        .unwrap_or_else(|| "-".into()),
                    segment.events.len()
                )));
            }
        }
        if let Some(map) = &self.page_map {
            lines.push(text::key_value(
                "Page map",
                &format!("{} frame(s) at {}", map.frame_summaries.len(), map.url),
            ));
        }
        lines.join("\n")
    }

    fn format_json(&self, pretty: bool) -> crate::Result<String> {
        to_json(self, pretty)
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigInfo {
    pub path: PathBuf,
    pub exists: bool,
}

impl OutputFormatter for ConfigInfo {
    fn format_text(&self) -> String {
        format!(
            "{}\n{}",
            text::key_value("Config Path", &self.path.display().to_string()),
            text::key_value("Exists", &self.exists.to_string())
        )
    }

    fn format_json(&self, pretty: bool) -> crate::Result<String> {
        to_json(self, pretty)
    }
}

impl OutputFormatter for crate::config::Config {
    fn format_text(&self) -> String {
        self.show()
    }

    fn format_json(&self, pretty: bool) -> crate::Result<String> {
        to_json(self, pretty)
    }
}
