//! Automatic session titles

/// Title given to sessions that have not been auto-titled yet
pub const DEFAULT_TITLE: &str = "New Chat";

/// Maximum number of words carried over from the first user message
pub const TITLE_WORD_LIMIT: usize = 8;

/// Marker appended when the message had more words than the limit
pub const TITLE_ELLIPSIS: &str = "…";

/// Derive a session title from the first user message
///
/// Takes the first eight whitespace-delimited words joined by single
/// spaces, appending an ellipsis when the message had more. Returns
/// `None` for blank input so callers keep the default title.
///
/// # Examples
///
/// ```
/// use palaver::session::derive_title;
///
/// assert_eq!(derive_title("hello   world").as_deref(), Some("hello world"));
/// assert_eq!(derive_title("   "), None);
/// ```
pub fn derive_title(message: &str) -> Option<String> {
    let mut words = message.split_whitespace();
    let head: Vec<&str> = words.by_ref().take(TITLE_WORD_LIMIT).collect();
    if head.is_empty() {
        return None;
    }

    let mut title = head.join(" ");
    if words.next().is_some() {
        title.push_str(TITLE_ELLIPSIS);
    }
    Some(title)
}
