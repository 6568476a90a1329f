use chrono::{DateTime, Utc};

/// A matchmaking queue entry.
///
/// Ordering is `(rating, enqueue_time, user_id)` ascending — two tickets
/// with the same rating break ties by arrival order, and a final tie on
/// arrival order (should never happen with real clocks) falls back to the
/// user id so the set never silently drops a ticket as a duplicate key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchTicket {
    pub user_id: String,
    pub rating: i32,
    pub enqueued_at: DateTime<Utc>,
}

impl MatchTicket {
    pub fn new(user_id: String, rating: i32) -> Self {
        Self {
            user_id,
            rating,
            enqueued_at: Utc::now(),
        }
    }

    pub fn waited(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.enqueued_at
    }

    fn order_key(&self) -> (i32, DateTime<Utc>, &str) {
        (self.rating, self.enqueued_at, self.user_id.as_str())
    }
}

impl PartialOrd for MatchTicket {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MatchTicket {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_rating_first() {
        let now = Utc::now();
        let low = MatchTicket {
            user_id: "a".into(),
            rating: 1000,
            enqueued_at: now,
        };
        let high = MatchTicket {
            user_id: "b".into(),
            rating: 1200,
            enqueued_at: now,
        };
        assert!(low < high);
    }

    #[test]
    fn breaks_rating_ties_by_enqueue_time() {
        let earlier = MatchTicket {
            user_id: "a".into(),
            rating: 1000,
            enqueued_at: Utc::now() - chrono::Duration::seconds(5),
        };
        let later = MatchTicket {
            user_id: "b".into(),
            rating: 1000,
            enqueued_at: Utc::now(),
        };
        assert!(earlier < later);
    }
}
