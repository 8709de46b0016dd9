//! Bounded resource names
//!
//! Kubernetes object names used here must fit in a DNS label. Generated names
//! join two tokens and, when too long, shrink both tokens in proportion to
//! their own length so the result stays recognisable from either side.

/// Maximum length of a generated object name
pub const MAX_NAME_LENGTH: usize = 63;

/// Generated names stay strictly below this length
const NAME_MARGIN: usize = MAX_NAME_LENGTH - 3;

/// Join two tokens as `first-last`, shrinking both proportionally if needed
pub fn resource_name(first: &str, last: &str) -> String {
    let name = format!("{first}-{last}");
    let length = name.chars().count();
    if length < NAME_MARGIN {
        return name;
    }

    let excess = length - NAME_MARGIN;
    let keep = |token: &str| {
        let len = token.chars().count();
        len - excess * len / length
    };

    format!(
        "{}-{}",
        prefix_chars(first, keep(first)),
        prefix_chars(last, keep(last))
    )
}

/// Hard-cut an explicit name to the maximum length
pub fn truncate_name(name: &str) -> &str {
    prefix_chars(name, MAX_NAME_LENGTH)
}

fn prefix_chars(s: &str, count: usize) -> &str {
    match s.char_indices().nth(count) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
