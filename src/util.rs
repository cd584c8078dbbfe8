/// Masks everything after the first `visible_chars` characters with a fixed
/// eight-character run of `*`, so masked values don't leak their length.
/// Used for member emails and display names on the group page.
pub fn mask_identifier(text: &str, visible_chars: usize) -> String {
    if text.is_empty() {
        return String::new();
    }
    let visible: String = text.chars().take(visible_chars).collect();
    format!("{visible}{}", "*".repeat(8))
}
