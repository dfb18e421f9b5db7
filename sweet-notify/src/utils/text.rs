/// Truncate `input` to at most `max_chars` characters, marking the cut with
/// an ellipsis.
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        None => input.to_string(),
        Some((byte_idx, _)) => {
            let mut out = input[..byte_idx].to_string();
            out.push('…');
            out
        }
    }
}

/// Truncate `input` to at most `max_bytes` bytes, cutting on a char boundary
/// and marking the cut with an ellipsis. The ellipsis counts towards the
/// limit, so the result is empty when not even the ellipsis fits.
pub fn truncate_bytes(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return input.to_string();
    }
    let budget = match max_bytes.checked_sub('…'.len_utf8()) {
        Some(budget) => budget,
        None => return String::new(),
    };
    let mut cut = budget;
    while !input.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = input[..cut].to_string();
    out.push('…');
    out
}
