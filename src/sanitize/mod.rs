//! Rendering of cached message bodies for display.

use html2text::from_read;

/// Marks a body that was rebuilt from the list preview because the full body
/// was never fetched.
pub const DEGRADED_BODY_PREFIX: &str = "[Full email body not cached - showing preview]\n\n";

pub const BODY_UNAVAILABLE_OFFLINE: &str = "[Email body not available offline]";

const TEXT_WIDTH: usize = 80;

/// Picks the best cached representation: plain text, then HTML flattened to
/// text, then the preview marked as degraded, then the fixed sentinel.
pub fn render_cached_body(
    body_text: Option<&str>,
    body_html: Option<&str>,
    preview: Option<&str>,
) -> String {
    if let Some(text) = body_text.filter(|t| !t.is_empty()) {
        return text.to_string();
    }
    if let Some(html) = body_html.filter(|h| !h.trim().is_empty()) {
        let text = html_to_text(html);
        if !text.trim().is_empty() {
            return text;
        }
    }
    match preview.filter(|p| !p.is_empty()) {
        Some(preview) => format!("{}{}", DEGRADED_BODY_PREFIX, preview),
        None => BODY_UNAVAILABLE_OFFLINE.to_string(),
    }
}

pub fn is_degraded(body: &str) -> bool {
    body.starts_with(DEGRADED_BODY_PREFIX) || body == BODY_UNAVAILABLE_OFFLINE
}

pub fn html_to_text(html: &str) -> String {
    from_read(html.as_bytes(), TEXT_WIDTH).unwrap_or_default()
}
