//! Room Manager: one actor task per match owns that match's membership
//! state, so join/leave/ready transitions never race each other even
//! though many connection tasks call into the same match concurrently.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RoomState {
    pub match_id: String,
    pub members: HashSet<String>,
    pub ready: HashSet<String>,
}

enum RoomCommand {
    Join {
        user_id: String,
        reply: oneshot::Sender<RoomState>,
    },
    Leave {
        user_id: String,
        reply: oneshot::Sender<RoomState>,
    },
    MarkReady {
        user_id: String,
        reply: oneshot::Sender<RoomState>,
    },
    Snapshot {
        reply: oneshot::Sender<RoomState>,
    },
}

#[derive(Clone)]
pub struct RoomHandle {
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub async fn join(&self, user_id: String) -> Option<RoomState> {
        self.send(|reply| RoomCommand::Join { user_id, reply }).await
    }

    pub async fn leave(&self, user_id: String) -> Option<RoomState> {
        self.send(|reply| RoomCommand::Leave { user_id, reply }).await
    }

    pub async fn mark_ready(&self, user_id: String) -> Option<RoomState> {
        self.send(|reply| RoomCommand::MarkReady { user_id, reply }).await
    }

    pub async fn snapshot(&self) -> Option<RoomState> {
        self.send(|reply| RoomCommand::Snapshot { reply }).await
    }

    async fn send<F>(&self, build: F) -> Option<RoomState>
    where
        F: FnOnce(oneshot::Sender<RoomState>) -> RoomCommand,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(build(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }
}

async fn run_room(match_id: String, mut rx: mpsc::Receiver<RoomCommand>) {
    let mut state = RoomState {
        match_id: match_id.clone(),
        members: HashSet::new(),
        ready: HashSet::new(),
    };

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RoomCommand::Join { user_id, reply } => {
                state.members.insert(user_id);
                let _ = reply.send(state.clone());
            }
            RoomCommand::Leave { user_id, reply } => {
                state.members.remove(&user_id);
                state.ready.remove(&user_id);
                let _ = reply.send(state.clone());
            }
            RoomCommand::MarkReady { user_id, reply } => {
                if state.members.contains(&user_id) {
                    state.ready.insert(user_id);
                }
                let _ = reply.send(state.clone());
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(state.clone());
            }
        }
    }

    info!(match_id, "room actor shut down, channel closed");
}

#[derive(Clone, Default)]
pub struct RoomManager {
    rooms: Arc<DashMap<String, RoomHandle>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, match_id: &str) -> RoomHandle {
        self.rooms
            .entry(match_id.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(64);
                tokio::spawn(run_room(match_id.to_string(), rx));
                RoomHandle { tx }
            })
            .clone()
    }

    pub fn get(&self, match_id: &str) -> Option<RoomHandle> {
        self.rooms.get(match_id).map(|h| h.clone())
    }

    /// Drops the handle so the actor task exits once its channel drains;
    /// called once a match reaches FINISHED or ABANDONED.
    pub fn unregister(&self, match_id: &str) {
        if self.rooms.remove(match_id).is_none() {
            warn!(match_id, "unregister called for a room that was not tracked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_adds_member() {
        let manager = RoomManager::new();
        let handle = manager.get_or_create("m1");
        let state = handle.join("alice".into()).await.unwrap();
        assert!(state.members.contains("alice"));
    }

    #[tokio::test]
    async fn leave_removes_member_and_ready_flag() {
        let manager = RoomManager::new();
        let handle = manager.get_or_create("m1");
        handle.join("alice".into()).await.unwrap();
        handle.mark_ready("alice".into()).await.unwrap();
        let state = handle.leave("alice".into()).await.unwrap();
        assert!(!state.members.contains("alice"));
        assert!(!state.ready.contains("alice"));
    }

    #[tokio::test]
    async fn ready_requires_membership() {
        let manager = RoomManager::new();
        let handle = manager.get_or_create("m1");
        let state = handle.mark_ready("alice".into()).await.unwrap();
        assert!(!state.ready.contains("alice"));
    }

    #[tokio::test]
    async fn get_or_create_returns_the_same_room_for_same_id() {
        let manager = RoomManager::new();
        let first = manager.get_or_create("m1");
        first.join("alice".into()).await.unwrap();
        let second = manager.get_or_create("m1");
        let state = second.snapshot().await.unwrap();
        assert!(state.members.contains("alice"));
    }

    #[tokio::test]
    async fn unregister_drops_the_handle() {
        let manager = RoomManager::new();
        manager.get_or_create("m1");
        manager.unregister("m1");
        assert!(manager.get("m1").is_none());
    }
}
