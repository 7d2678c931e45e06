//! Phone number and display formatting helpers

/// Normalize a phone number for API calls and correlation.
///
/// Strips the `whatsapp:` channel prefix, spaces, dashes, and parentheses,
/// and guarantees a leading `+`. The result is the canonical form used
/// everywhere a number crosses a service boundary.
pub fn clean_phone_number(phone: &str) -> String {
    if phone.is_empty() {
        return String::new();
    }

    let stripped = phone.strip_prefix("whatsapp:").unwrap_or(phone);
    let mut cleaned: String = stripped
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();

    if !cleaned.starts_with('+') {
        cleaned.insert(0, '+');
    }

    cleaned
}

/// Format a phone number for display.
///
/// International numbers with more than 10 digits are grouped as
/// `+C AAA BBB CCCC`; anything shorter is returned as-is (minus whitespace).
pub fn format_phone_number(phone: &str) -> String {
    if phone.is_empty() {
        return String::new();
    }

    let stripped = phone.strip_prefix("whatsapp:").unwrap_or(phone);
    let cleaned: Vec<char> = stripped.chars().filter(|c| !c.is_whitespace()).collect();

    // Group by characters, not bytes: input may carry non-ASCII junk and
    // must still format without panicking.
    let n = cleaned.len();
    if cleaned.first() == Some(&'+') && n > 11 {
        let group = |range: std::ops::Range<usize>| cleaned[range].iter().collect::<String>();
        return format!(
            "{} {} {} {}",
            group(0..n - 10),
            group(n - 10..n - 7),
            group(n - 7..n - 4),
            group(n - 4..n)
        );
    }

    cleaned.into_iter().collect()
}

/// Format a call duration in seconds as `MM:SS`, or `HH:MM:SS` past one hour.
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// Initials for an avatar placeholder: first letter of the first and last
/// word of the name, or `?` for an empty name.
pub fn initials(name: &str) -> String {
    let parts: Vec<&str> = name.split_whitespace().collect();
    match parts.as_slice() {
        [] => "?".to_string(),
        [only] => only.chars().next().map_or("?".into(), |c| {
            c.to_uppercase().collect()
        }),
        [first, .., last] => {
            let mut s = String::new();
            if let Some(c) = first.chars().next() {
                s.extend(c.to_uppercase());
            }
            if let Some(c) = last.chars().next() {
                s.extend(c.to_uppercase());
            }
            s
        }
    }
}

/// Truncate a string to `max_len` characters, ending with `...` if cut.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let cut: String = s.chars().take(keep).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_strips_channel_prefix_and_punctuation() {
        assert_eq!(clean_phone_number("whatsapp:+1 (202) 555-0123"), "+12025550123");
        assert_eq!(clean_phone_number("+44 7000 000000"), "+447000000000");
    }

    #[test]
    fn test_clean_adds_plus() {
        assert_eq!(clean_phone_number("12025550123"), "+12025550123");
    }

    #[test]
    fn test_clean_empty() {
        assert_eq!(clean_phone_number(""), "");
    }

    #[test]
    fn test_format_international() {
        assert_eq!(format_phone_number("+12345678900"), "+1 234 567 8900");
        assert_eq!(format_phone_number("+442025550123"), "+44 202 555 0123");
    }

    #[test]
    fn test_format_short_number_passthrough() {
        assert_eq!(format_phone_number("555 0123"), "5550123");
    }

    #[test]
    fn test_format_non_ascii_input_does_not_panic() {
        assert_eq!(format_phone_number("+1234\u{00fc}678900"), "+1 234 \u{00fc}67 8900");
        assert_eq!(format_phone_number("\u{00fc}ber"), "\u{00fc}ber");
    }

    #[test]
    fn test_format_then_clean_roundtrip() {
        for number in ["+12345678900", "+447000000000", "whatsapp:+1 234 567 8900"] {
            let canonical = clean_phone_number(number);
            assert_eq!(clean_phone_number(&format_phone_number(&canonical)), canonical);
            assert!(canonical.starts_with('+'));
            assert!(canonical[1..].chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "00:00");
        assert_eq!(format_duration(65), "01:05");
        assert_eq!(format_duration(3600), "01:00:00");
        assert_eq!(format_duration(3725), "01:02:05");
    }

    #[test]
    fn test_initials() {
        assert_eq!(initials(""), "?");
        assert_eq!(initials("Ada"), "A");
        assert_eq!(initials("Ada Lovelace"), "AL");
        assert_eq!(initials("Jean de la Fontaine"), "JF");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer string", 9), "a long...");
    }
}
