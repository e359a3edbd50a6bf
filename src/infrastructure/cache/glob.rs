//! Glob matching for cache key patterns.
//!
//! Supports `*` (any run of characters, including none) and `?` (exactly one
//! character). Every other character matches itself.

/// Returns true if `text` matches `pattern`.
#[must_use]
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    // Position of the last `*` seen and the text position it was tried at.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match (pattern.get(p), text.get(t)) {
            (Some('*'), _) => {
                backtrack = Some((p, t));
                p += 1;
            }
            (Some('?'), Some(_)) => {
                p += 1;
                t += 1;
            }
            (Some(pc), Some(tc)) if pc == tc => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, tried)) => {
                    p = star + 1;
                    t = tried + 1;
                    backtrack = Some((star, tried + 1));
                }
                None => return false,
            },
        }
    }

    pattern.get(p..).is_some_and(|rest| rest.iter().all(|&c| c == '*'))
}
