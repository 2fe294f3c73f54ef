//! Terminal styling that honors `--no-color`.

use owo_colors::OwoColorize;

use crate::cli::AppContext;

#[derive(Debug, Clone, Copy)]
pub enum Tone {
    Good,
    Bad,
    Warn,
    Accent,
}

pub fn paint(ctx: &AppContext, text: &str, tone: Tone) -> String {
    if ctx.no_color {
        return text.to_string();
    }
    match tone {
        Tone::Good => text.green().to_string(),
        Tone::Bad => text.red().to_string(),
        Tone::Warn => text.yellow().to_string(),
        Tone::Accent => text.cyan().to_string(),
    }
}

/// Color the +/- lines of a unified diff.
pub fn paint_diff(ctx: &AppContext, diff: &str) -> String {
    if ctx.no_color {
        return diff.to_string();
    }
    let mut out = String::with_capacity(diff.len());
    for line in diff.split_inclusive('\n') {
        let painted = if line.starts_with("+++") || line.starts_with("---") {
            line.bold().to_string()
        } else if line.starts_with('+') {
            line.green().to_string()
        } else if line.starts_with('-') {
            line.red().to_string()
        } else if line.starts_with("@@") {
            line.cyan().to_string()
        } else {
            line.to_string()
        };
        out.push_str(&painted);
    }
    out
}
