use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A discoverable thread returned by a search. Read-only snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub score: i64,
    #[serde(default)]
    pub permalink: Option<String>,
}

impl ContentItem {
    /// Accept items created no earlier than `now - max_age` (boundary inclusive)
    pub fn is_recent(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        let age = now.signed_duration_since(self.created_at);
        match chrono::Duration::from_std(max_age) {
            Ok(max_age) => age <= max_age,
            // Out of chrono's range means "no practical limit"
            Err(_) => true,
        }
    }
}

/// A comment inside an item's (flattened) comment tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub author: Option<String>,
    pub body: String,
    pub score: i64,
}

impl Comment {
    /// Removed, deleted, authorless, and blank comments are never engaged
    pub fn is_valid(&self) -> bool {
        self.author.is_some()
            && self.body != "[removed]"
            && self.body != "[deleted]"
            && !self.body.trim().is_empty()
    }
}

/// Keep valid comments only, highest score first, at most `k`
pub fn top_comments(comments: Vec<Comment>, k: usize) -> Vec<Comment> {
    let mut valid: Vec<Comment> = comments.into_iter().filter(Comment::is_valid).collect();
    valid.sort_by(|a, b| b.score.cmp(&a.score));
    valid.truncate(k);
    valid
}

/// Handle to a reply the platform accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyHandle {
    pub id: String,
    pub permalink: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item_created_at(created_at: DateTime<Utc>) -> ContentItem {
        ContentItem {
            id: "abc123".to_string(),
            title: "How do you test legacy code?".to_string(),
            body: String::new(),
            created_at,
            score: 4,
            permalink: None,
        }
    }

    fn comment(id: &str, author: Option<&str>, body: &str, score: i64) -> Comment {
        Comment {
            id: id.to_string(),
            author: author.map(str::to_string),
            body: body.to_string(),
            score,
        }
    }

    #[test]
    fn test_recency_boundary() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        let max_age = Duration::from_secs(7 * 86_400);
        let edge = now - chrono::Duration::seconds(7 * 86_400);

        assert!(item_created_at(edge).is_recent(now, max_age));
        assert!(!item_created_at(edge - chrono::Duration::seconds(1)).is_recent(now, max_age));
        assert!(item_created_at(now).is_recent(now, max_age));
    }

    #[test]
    fn test_comment_validity() {
        assert!(comment("c1", Some("alice"), "Try property tests", 3).is_valid());
        assert!(!comment("c2", Some("bob"), "[removed]", 9).is_valid());
        assert!(!comment("c3", Some("bob"), "[deleted]", 9).is_valid());
        assert!(!comment("c4", None, "orphan", 9).is_valid());
        assert!(!comment("c5", Some("carol"), "   \n", 9).is_valid());
    }

    #[test]
    fn test_top_comments_ranks_valid_by_score() {
        let ranked = top_comments(
            vec![
                comment("low", Some("a"), "ok", 1),
                comment("removed", Some("b"), "[removed]", 100),
                comment("high", Some("c"), "great answer", 42),
                comment("mid", Some("d"), "decent", 7),
                comment("ghost", None, "no author", 80),
            ],
            2,
        );
        let ids: Vec<&str> = ranked.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid"]);
    }
}
