//! MIME parsing of fetched messages via `mail-parser`.

use mail_parser::MessageParser;

use crate::channels::RawMessage;

/// The parts of a message the pipeline cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub uid: u32,
    pub sender: String,
    pub sender_name: Option<String>,
    /// Empty when the message has no Subject header.
    pub subject: String,
    pub body: String,
}

/// Why a message cannot go through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("message {0} is not valid MIME")]
    Unparseable(u32),

    #[error("message {0} has no sender address")]
    NoSender(u32),

    #[error("message {0} has no readable body")]
    NoReadableBody(u32),
}

/// Parse a fetched message, preferring the plain-text body over HTML.
pub fn parse_message(raw: &RawMessage) -> Result<ParsedMessage, MessageError> {
    let parsed = MessageParser::default()
        .parse(&raw.body)
        .ok_or(MessageError::Unparseable(raw.uid))?;

    let from = parsed.from().and_then(|addr| addr.first());
    let sender = from
        .and_then(|a| a.address())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(MessageError::NoSender(raw.uid))?;
    let sender_name = from
        .and_then(|a| a.name())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let body = extract_text(&parsed).ok_or(MessageError::NoReadableBody(raw.uid))?;

    Ok(ParsedMessage {
        uid: raw.uid,
        sender,
        sender_name,
        subject: parsed.subject().unwrap_or_default().trim().to_string(),
        body,
    })
}

/// Readable text of a message: the plain-text body, else the HTML body with
/// tags removed. `None` when neither exists or both are blank.
fn extract_text(parsed: &mail_parser::Message) -> Option<String> {
    if let Some(text) = parsed.body_text(0)
        && !text.trim().is_empty()
    {
        return Some(text.into_owned());
    }
    if let Some(html) = parsed.body_html(0) {
        let text = strip_html(html.as_ref());
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
