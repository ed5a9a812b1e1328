//! Small helpers shared across the engine.

use std::time::Duration;

use regex::Regex;

/// Levenshtein distance between two strings.
///
/// Used by prompt auto-detection to compare consecutive prompt readbacks.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };

    let mut current: Vec<usize> = (0..=short.len()).collect();
    for i in 1..=long.len() {
        let previous = current.clone();
        current[0] = i;
        for j in 1..=short.len() {
            let add = previous[j] + 1;
            let delete = current[j - 1] + 1;
            let mut change = previous[j - 1];
            if short[j - 1] != long[i - 1] {
                change += 1;
            }
            current[j] = add.min(delete).min(change);
        }
    }
    current[short.len()]
}

/// A pattern that can never match: it requires a character after the
/// end of input. Used as a placeholder keeping event lists aligned.
pub fn never_matching() -> Regex {
    Regex::new(r"\z.").unwrap()
}

/// Render a pattern or sentinel for log output.
pub fn pattern_to_str(pattern: Option<&Regex>) -> &str {
    pattern.map_or("<none>", |p| p.as_str())
}

/// Probe TCP reachability of a host before spending a protocol timeout
/// on it. Supports IPv6 via the resolver.
pub async fn is_reachable(host: &str, port: u16) -> bool {
    let addr = format!("{}:{}", host, port);
    matches!(
        tokio::time::timeout(
            Duration::from_secs(5),
            tokio::net::TcpStream::connect(addr),
        )
        .await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein_distance("router#", "router#"), 0);
    }

    #[test]
    fn test_levenshtein_substitution() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn test_levenshtein_empty() {
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("abc", ""), 3);
    }

    #[test]
    fn test_levenshtein_prompt_noise() {
        // Two readbacks of the same prompt with minor echo noise should be
        // close relative to their length.
        let first = "RP/0/RP0/CPU0:ios#";
        let second = "RP/0/RP0/CPU0:ios# ";
        let d = levenshtein_distance(first, second);
        assert!((d as f64) / (first.len() as f64) < 0.3);
    }
}
