//! Splitting a reply into its spoken part and its read-aloud suggestion.
//!
//! Replies are expected to look like `spoken text【suggestion】`. ASCII
//! brackets are accepted as a fallback when no full-width span is present.

pub const FULL_WIDTH_OPEN: char = '【';
pub const FULL_WIDTH_CLOSE: char = '】';
pub const ASCII_OPEN: char = '[';
pub const ASCII_CLOSE: char = ']';

/// Result of [`extract_bracketed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Reply text with bracketed spans removed
    pub spoken: String,
    /// Interior of the first bracketed span, empty if there is none
    pub suggestion: String,
}

impl Extraction {
    pub fn has_suggestion(&self) -> bool {
        !self.suggestion.is_empty()
    }
}

/// Split `text` into spoken part and suggestion.
///
/// The suggestion is the trimmed interior of the first `【…】` span, or of the
/// first `[…]` span when no full-width span exists. The spoken part is the
/// text with every complete span of either kind removed, trimmed. Without any
/// span the text is returned unchanged with an empty suggestion.
pub fn extract_bracketed(text: &str) -> Extraction {
    let span = first_span(text, FULL_WIDTH_OPEN, FULL_WIDTH_CLOSE)
        .or_else(|| first_span(text, ASCII_OPEN, ASCII_CLOSE));

    let Some(interior) = span else {
        return Extraction {
            spoken: text.to_string(),
            suggestion: String::new(),
        };
    };

    let stripped = strip_spans(text, FULL_WIDTH_OPEN, FULL_WIDTH_CLOSE);
    let stripped = strip_spans(&stripped, ASCII_OPEN, ASCII_CLOSE);

    Extraction {
        spoken: stripped.trim().to_string(),
        suggestion: interior.trim().to_string(),
    }
}

/// Whether `text` already carries a non-empty bracketed suggestion.
pub fn has_bracketed_suggestion(text: &str) -> bool {
    extract_bracketed(text).has_suggestion()
}

fn first_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)? + open.len_utf8();
    let len = text[start..].find(close)?;
    Some(&text[start..start + len])
}

fn strip_spans(text: &str, open: char, close: char) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(open) {
        let after_open = &rest[start + open.len_utf8()..];
        let Some(len) = after_open.find(close) else {
            break;
        };
        out.push_str(&rest[..start]);
        rest = &after_open[len + close.len_utf8()..];
    }

    out.push_str(rest);
    out
}
