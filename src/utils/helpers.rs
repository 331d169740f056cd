/// Helper utilities for the backup CLI

/// Quote a word for a POSIX shell.
///
/// Words made only of characters the shell never interprets are returned
/// unchanged, everything else is wrapped in single quotes.
pub fn shell_quote(word: &str) -> String {
    let is_plain = |c: char| c.is_ascii_alphanumeric() || "_-+=:,./@%".contains(c);

    if !word.is_empty() && word.chars().all(is_plain) {
        return word.to_string();
    }

    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Validate `login@host` repository credentials (basic check)
pub fn is_valid_login(login: &str) -> bool {
    let parts: Vec<&str> = login.split('@').collect();
    if parts.len() != 2 {
        return false;
    }

    parts
        .iter()
        .all(|part| !part.is_empty() && !part.chars().any(char::is_whitespace))
}

/// Format duration to human-readable string
pub fn format_duration(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Truncate string with ellipsis
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Horizontal rule printed between disks
pub fn rule() -> String {
    "-".repeat(crate::utils::RULE_WIDTH)
}
