use std::sync::LazyLock;

use regex::Regex;

use playerwatch_types::{EventKind, LogEvent};

/// Patterns in priority order: every connect pattern before any disconnect
/// pattern. Names are captured lazily up to the keyword.
static PATTERNS: LazyLock<Vec<(EventKind, Regex)>> = LazyLock::new(|| {
    [
        (EventKind::Login, r"Player (.+?)\s+connected"),
        (EventKind::Login, r"Player connected:\s*([^,]+)"),
        (EventKind::Logout, r"Player (.+?)\s+disconnected"),
        (EventKind::Logout, r"Player disconnected:\s*([^,]+)"),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("player pattern is valid")))
    .collect()
});

/// Extracts player connect/disconnect events from raw log lines
pub struct LineParser;

impl LineParser {
    /// Parse one raw log line.
    ///
    /// The patterns are searched anywhere in the line, so any timestamp or
    /// level prefix is accepted. Returns `None` for lines without an event.
    pub fn parse(raw: &str) -> Option<LogEvent> {
        let line = raw.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return None;
        }

        PATTERNS.iter().find_map(|(kind, regex)| {
            let name = regex.captures(line)?.get(1)?.as_str();
            let user = Self::clean_name(name);
            if user.is_empty() {
                return None;
            }
            Some(match kind {
                EventKind::Login => LogEvent::login(user),
                EventKind::Logout => LogEvent::logout(user),
            })
        })
    }

    /// Strip surrounding whitespace and control characters from a captured name
    fn clean_name(name: &str) -> &str {
        name.trim_matches(|c: char| c.is_whitespace() || c.is_control())
    }
}
