/// Cuts `text` to at most `max_chars` characters, appending `marker` when
/// anything was removed.
///
/// Lengths are counted in `char`s so multi-byte input is never split
/// mid-character. Returns whether truncation happened.
pub fn bound_input(text: String, max_chars: usize, marker: &str) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            let mut bounded = String::with_capacity(cut + marker.len());
            bounded.push_str(&text[..cut]);
            bounded.push_str(marker);
            (bounded, true)
        }
        None => (text, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_input_is_untouched() {
        let (text, truncated) = bound_input("hello".to_string(), 10, "...");
        assert_eq!(text, "hello");
        assert!(!truncated);
    }

    #[test]
    fn test_input_at_ceiling_is_untouched() {
        let input = "a".repeat(1000);
        let (text, truncated) = bound_input(input.clone(), 1000, "...");
        assert_eq!(text, input);
        assert!(!truncated);
    }

    #[test]
    fn test_long_input_is_cut_to_ceiling_plus_marker() {
        let (text, truncated) = bound_input("b".repeat(1500), 1000, "...");
        assert!(truncated);
        assert_eq!(text.len(), 1003);
        assert_eq!(text, format!("{}...", "b".repeat(1000)));
    }

    #[test]
    fn test_multibyte_input_counts_characters() {
        let (text, truncated) = bound_input("héllo wörld".to_string(), 4, "…");
        assert!(truncated);
        assert_eq!(text, "héll…");
        assert_eq!(text.chars().count(), 5);
    }

    #[test]
    fn test_zero_ceiling_keeps_only_marker() {
        let (text, truncated) = bound_input("abc".to_string(), 0, "...");
        assert_eq!(text, "...");
        assert!(truncated);
    }
}
