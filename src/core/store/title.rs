//! Automatic titles for a conversation's first exchange.

use crate::core::message::Message;

pub const MAX_TITLE_CHARS: usize = 80;

const TITLE_INSTRUCTION: &str = "Summarize the following conversation as a short title of at \
most six words. Reply with the title only, without quotes or punctuation at the end.";

/// System instruction followed by the first exchange.
pub fn title_prompt(first_exchange: &[Message]) -> Vec<Message> {
    std::iter::once(Message::system(TITLE_INSTRUCTION))
        .chain(
            first_exchange
                .iter()
                .filter(|message| !message.is_system())
                .map(|message| Message::new(message.role, message.content.clone())),
        )
        .collect()
}

/// Trim, strip surrounding quotes, collapse whitespace and cap the length.
/// Returns `None` when nothing usable remains.
pub fn sanitize_title(raw: &str) -> Option<String> {
    const QUOTES: &[char] = &['"', '\'', '`', '“', '”', '‘', '’', '«', '»'];
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let stripped = collapsed.trim_matches(|c: char| QUOTES.contains(&c) || c.is_whitespace());
    let title: String = stripped.chars().take(MAX_TITLE_CHARS).collect();
    let title = title.trim_end().to_string();
    (!title.is_empty()).then_some(title)
}
