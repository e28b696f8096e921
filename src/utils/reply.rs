pub fn error(message: &str) -> String {
    format!("[ERROR] {}", message)
}

pub fn success(message: &str) -> String {
    format!("[SUCCESS] {}", message)
}

pub fn block(title: &str, content: &str) -> String {
    format!("[{}]\n{}", title.to_uppercase(), content)
}

fn truncate_chars_prefix(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((end, _)) => &value[..end],
        None => value,
    }
}

/// Caps a reply at `max_chars` characters, never splitting a code point.
pub fn truncate(reply: &str, max_chars: usize) -> String {
    let total = reply.chars().count();
    if total <= max_chars {
        return reply.to_string();
    }
    format!(
        "{}\n... truncated, total {} chars",
        truncate_chars_prefix(reply, max_chars),
        total
    )
}
