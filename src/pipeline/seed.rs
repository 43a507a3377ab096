//! Keyword fallback for seed queries.
//!
//! Plain lexical lookup: the query is split into words and the ones found in
//! [`ERROR_KEYWORDS`] are returned in the order they appear.

/// Words that commonly appear in error messages.
pub const ERROR_KEYWORDS: &[&str] = &[
    "timeout",
    "timed",
    "connection",
    "refused",
    "failed",
    "failure",
    "error",
    "exception",
    "slow",
    "latency",
    "spike",
    "crash",
    "memory",
    "oom",
    "cpu",
    "disk",
    "database",
    "db",
    "cache",
    "redis",
    "queue",
    "kafka",
    "pool",
    "exhausted",
    "failover",
    "deadlock",
    "unavailable",
    "circuit",
];

/// Used when nothing in the query is recognised.
pub const DEFAULT_KEYWORD: &str = "error";

/// Up to `max` recognised keywords from `query`, first occurrence order.
/// Falls back to [`DEFAULT_KEYWORD`].
pub fn keywords(query: &str, max: usize) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for word in query
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        if found.len() >= max {
            break;
        }
        if ERROR_KEYWORDS.contains(&word) && !found.iter().any(|f| f == word) {
            found.push(word.to_string());
        }
    }
    if found.is_empty() {
        found.push(DEFAULT_KEYWORD.to_string());
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_in_query_order() {
        assert_eq!(
            keywords("Checkout is slow, DB connection pool exhausted?", 3),
            vec!["slow", "db", "connection"]
        );
    }

    #[test]
    fn test_whole_words_only() {
        assert_eq!(keywords("dbadmin errors", 3), vec![DEFAULT_KEYWORD]);
    }

    #[test]
    fn test_duplicates_collapsed() {
        assert_eq!(keywords("timeout after timeout", 3), vec!["timeout"]);
    }
}
