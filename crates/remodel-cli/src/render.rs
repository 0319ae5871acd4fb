use std::io::IsTerminal;

use anstyle::{AnsiColor, Effects, Style};
use remodel_planner::Change;
use remodel_state::FinalizeStage;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputStyle {
    Plain,
    Rich,
}

pub fn resolve_output_style(stdout_is_terminal: bool, no_color: bool) -> OutputStyle {
    if stdout_is_terminal && !no_color {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub fn current_output_style() -> OutputStyle {
    resolve_output_style(
        std::io::stdout().is_terminal(),
        std::env::var_os("NO_COLOR").is_some(),
    )
}

fn badge_style(status: &str) -> Style {
    let color = match status {
        "ok" => AnsiColor::BrightGreen,
        "warn" => AnsiColor::BrightYellow,
        "err" => AnsiColor::BrightRed,
        _ => AnsiColor::BrightBlue,
    };
    Style::new()
        .fg_color(Some(color.into()))
        .effects(Effects::BOLD)
}

fn task_kind_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::BrightCyan.into()))
}

fn dim_style() -> Style {
    Style::new().effects(Effects::DIMMED)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

fn status_badge(status: &str) -> String {
    match status {
        "ok" => "[OK]".to_string(),
        "warn" => "[WARN]".to_string(),
        "err" => "[ERR]".to_string(),
        other => format!("[{}]", other.to_ascii_uppercase()),
    }
}

pub fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!(
            "{} {message}",
            colorize(badge_style(status), &status_badge(status))
        ),
    }
}

/// One header line followed by one line per task, with its wait edges.
pub fn format_change_lines(change: &Change, style: OutputStyle) -> Vec<String> {
    let mut lines = vec![format!(
        "change {} ({}): {}",
        change.id, change.remodel_kind, change.summary
    )];
    if let Some(label) = change.recovery_system_label.as_deref() {
        lines.push(format!("recovery system: {label}"));
    }

    let width = change
        .tasks()
        .iter()
        .map(|task| task.kind.len())
        .max()
        .unwrap_or_default();
    for task in change.tasks() {
        let kind = format!("{:<width$}", task.kind);
        let waits = if task.wait_tasks.is_empty() {
            String::new()
        } else {
            let ids: Vec<String> = task.wait_tasks.iter().map(|id| id.to_string()).collect();
            format!(" [waits: {}]", ids.join(","))
        };
        let line = match style {
            OutputStyle::Plain => format!("{:>3} {kind} {}{waits}", task.id, task.summary),
            OutputStyle::Rich => format!(
                "{:>3} {} {}{}",
                task.id,
                colorize(task_kind_style(), &kind),
                task.summary,
                colorize(dim_style(), &waits)
            ),
        };
        lines.push(line);
    }
    lines
}

pub fn format_finalize_lines(
    change_id: &str,
    stage: FinalizeStage,
    log: &[String],
    no_longer_required: &[String],
    style: OutputStyle,
) -> Vec<String> {
    let mut lines = vec![render_status_line(
        style,
        "ok",
        &format!("change {change_id} finalized: {stage}"),
    )];
    lines.extend(
        log.iter()
            .map(|entry| render_status_line(style, "warn", entry)),
    );
    if !no_longer_required.is_empty() {
        lines.push(format!(
            "no longer required: {}",
            no_longer_required.join(", ")
        ));
    }
    lines
}
