mod discord;

pub use discord::DiscordChannel;

/// Split a message into chunks no longer than `max_len`, preferring line
/// breaks and falling back to char boundaries for oversized lines.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.split_inclusive('\n') {
        if current.len() + line.len() > max_len && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if line.len() > max_len {
            // A single line longer than the limit gets hard-split.
            let mut rest = line;
            while rest.len() > max_len {
                let mut end = max_len;
                while !rest.is_char_boundary(end) {
                    end -= 1;
                }
                chunks.push(rest[..end].to_string());
                rest = &rest[end..];
            }
            current.push_str(rest);
        } else {
            current.push_str(line);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
