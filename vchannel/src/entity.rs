//! Mapping of logical queue names onto identifiers the backend accepts.
//!
//! Dots become dashes and every other ASCII punctuation character except `-` and `_` becomes an
//! underscore. The mapping is lossy: `a.b` and `a-b` both end up as `a-b`, and nothing here
//! detects such collisions.

const fn build_table() -> [u8; 128] {
    let mut table = [0u8; 128];
    let mut i = 0;
    while i < 128 {
        let c = i as u8;
        table[i] = if c == b'.' {
            b'-'
        } else if c.is_ascii_punctuation() && c != b'-' && c != b'_' {
            b'_'
        } else {
            c
        };
        i += 1;
    }
    table
}

static TRANSLATION: [u8; 128] = build_table();

/// Translates a single character. Non-ASCII characters pass through unchanged.
fn translate(c: char) -> char {
    if c.is_ascii() {
        TRANSLATION[c as usize] as char
    } else {
        c
    }
}

/// Returns the backend-legal form of a logical queue name.
///
/// No length limit is enforced; a name the backend still rejects surfaces as an error when the
/// queue is resolved.
pub fn entity_name(name: &str) -> String {
    name.chars().map(translate).collect()
}
