//! Matchmaker: holds waiting players in a rating-ordered queue and pairs
//! them once their ratings are close enough, widening the acceptable gap
//! the longer a ticket has waited so nobody queues forever.

use crate::models::MatchTicket;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use tracing::info;

const NARROW_WINDOW: i32 = 100;
const WIDE_WINDOW: i32 = 200;
const WIDE_WINDOW_AFTER_SECS: i64 = 20;
const UNBOUNDED_AFTER_SECS: i64 = 40;

#[derive(Default)]
pub struct Matchmaker {
    queue: Mutex<BTreeSet<MatchTicket>>,
    ttl_secs: i64,
}

impl Matchmaker {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            queue: Mutex::new(BTreeSet::new()),
            ttl_secs,
        }
    }

    pub fn enqueue(&self, ticket: MatchTicket) {
        let mut q = self.queue.lock();
        q.retain(|t| t.user_id != ticket.user_id);
        q.insert(ticket);
    }

    /// Removes a user's own ticket (explicit cancel). Returns whether one
    /// was present.
    pub fn dequeue(&self, user_id: &str) -> bool {
        let mut q = self.queue.lock();
        let before = q.len();
        q.retain(|t| t.user_id != user_id);
        q.len() != before
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Drops tickets older than `ttl_secs`, returning the evicted user ids.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut q = self.queue.lock();
        let ttl = self.ttl_secs;
        let (expired, kept): (Vec<_>, Vec<_>) = q
            .iter()
            .cloned()
            .partition(|t| t.waited(now).num_seconds() >= ttl);
        *q = kept.into_iter().collect();
        expired.into_iter().map(|t| t.user_id).collect()
    }

    /// One sweep over the queue pairing off compatible tickets. Tickets are
    /// visited in rating order so a pairing never skips over a closer match
    /// further down the set.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<(MatchTicket, MatchTicket)> {
        let mut q = self.queue.lock();
        let mut pairs = Vec::new();
        let mut remaining: Vec<MatchTicket> = q.iter().cloned().collect();

        let mut i = 0;
        while i < remaining.len() {
            let a = remaining[i].clone();
            let window = rating_window(a.waited(now).num_seconds().max(0));

            let mut match_j = None;
            for (j, b) in remaining.iter().enumerate().skip(i + 1) {
                if (a.rating - b.rating).abs() <= window {
                    match_j = Some(j);
                    break;
                }
            }

            if let Some(j) = match_j {
                let b = remaining.remove(j);
                remaining.remove(i);
                info!(a = %a.user_id, b = %b.user_id, rating_gap = (a.rating - b.rating).abs(), "paired matchmaking tickets");
                pairs.push((a, b));
            } else {
                i += 1;
            }
        }

        *q = remaining.into_iter().collect();
        pairs
    }
}

fn rating_window(waited_secs: i64) -> i32 {
    if waited_secs >= UNBOUNDED_AFTER_SECS {
        i32::MAX
    } else if waited_secs >= WIDE_WINDOW_AFTER_SECS {
        WIDE_WINDOW
    } else {
        NARROW_WINDOW
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(user: &str, rating: i32) -> MatchTicket {
        MatchTicket::new(user.into(), rating)
    }

    #[test]
    fn sweep_pairs_close_ratings_immediately() {
        let mm = Matchmaker::new(120);
        mm.enqueue(ticket("alice", 1000));
        mm.enqueue(ticket("bob", 1050));
        let pairs = mm.sweep(Utc::now());
        assert_eq!(pairs.len(), 1);
        assert_eq!(mm.queue_len(), 0);
    }

    #[test]
    fn sweep_leaves_distant_ratings_unpaired_when_fresh() {
        let mm = Matchmaker::new(120);
        mm.enqueue(ticket("alice", 1000));
        mm.enqueue(ticket("bob", 1500));
        let pairs = mm.sweep(Utc::now());
        assert!(pairs.is_empty());
        assert_eq!(mm.queue_len(), 2);
    }

    #[test]
    fn dequeue_removes_only_named_user() {
        let mm = Matchmaker::new(120);
        mm.enqueue(ticket("alice", 1000));
        mm.enqueue(ticket("bob", 1050));
        assert!(mm.dequeue("alice"));
        assert_eq!(mm.queue_len(), 1);
        assert!(!mm.dequeue("alice"));
    }

    #[test]
    fn enqueue_replaces_existing_ticket_for_same_user() {
        let mm = Matchmaker::new(120);
        mm.enqueue(ticket("alice", 1000));
        mm.enqueue(ticket("alice", 1400));
        assert_eq!(mm.queue_len(), 1);
    }

    #[test]
    fn expire_stale_evicts_tickets_past_ttl() {
        let mm = Matchmaker::new(10);
        let mut stale = ticket("alice", 1000);
        stale.enqueued_at = Utc::now() - chrono::Duration::seconds(30);
        mm.enqueue(stale);
        mm.enqueue(ticket("bob", 1000));

        let evicted = mm.expire_stale(Utc::now());
        assert_eq!(evicted, vec!["alice".to_string()]);
        assert_eq!(mm.queue_len(), 1);
    }

    #[test]
    fn distant_ratings_pair_once_wait_widens_the_window() {
        let mm = Matchmaker::new(120);
        let mut a = ticket("alice", 1000);
        a.enqueued_at = Utc::now() - chrono::Duration::seconds(25);
        mm.enqueue(a);
        mm.enqueue(ticket("bob", 1150));

        let pairs = mm.sweep(Utc::now());
        assert_eq!(pairs.len(), 1);
    }
}
