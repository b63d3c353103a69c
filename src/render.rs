use chrono::{DateTime, Local, Utc};
use feed_core::{DisplayEvent, ProfileCache};
use std::sync::Arc;

use crate::config::DisplayConfig;

/// Turns feed entries into terminal lines.
pub struct Renderer {
    display: DisplayConfig,
    profiles: Arc<ProfileCache>,
}

impl Renderer {
    pub fn new(display: DisplayConfig, profiles: Arc<ProfileCache>) -> Self {
        Self { display, profiles }
    }

    pub fn render(&self, entry: &DisplayEvent) -> String {
        let mut out = self.line(entry, 0);
        if self.display.show_context {
            for reply in &entry.replies {
                self.render_replies(reply, 1, &mut out);
            }
        }
        out
    }

    fn render_replies(&self, entry: &DisplayEvent, depth: usize, out: &mut String) {
        out.push('\n');
        out.push_str(&self.line(entry, depth));
        for reply in &entry.replies {
            self.render_replies(reply, depth + 1, out);
        }
    }

    fn line(&self, entry: &DisplayEvent, depth: usize) -> String {
        let author = self.profiles.display_name(&entry.event.pubkey);
        let mut line = format!(
            "{}[{}] {}: {}",
            "  ".repeat(depth),
            format_time(entry.created_at()),
            author,
            preview(&entry.event.content, self.display.preview_length)
        );

        let counts = [
            ("↩", entry.reply_count()),
            ("+", entry.reactions.len()),
            ("⚡", entry.zaps.len()),
        ];
        let badges: Vec<String> = counts
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(|(icon, n)| format!("{icon}{n}"))
            .collect();
        if !badges.is_empty() {
            line.push_str(&format!(" ({})", badges.join(" ")));
        }
        line
    }
}

fn format_time(created_at: u64) -> String {
    i64::try_from(created_at)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|t| t.with_timezone(&Local).format("%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "??-?? ??:??".to_string())
}

/// Single-line preview of at most `max` characters.
pub fn preview(content: &str, max: usize) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
