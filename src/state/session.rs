//! Per-player memory kept across turns: machine setup and chat habits.

use dashmap::DashMap;
use serde::Serialize;
use utoipa::ToSchema;

/// What the lane looked like when a player last shot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PlayerSession {
    /// Left wheel speed percentage.
    pub wheel_left: i32,
    /// Right wheel speed percentage.
    pub wheel_right: i32,
    /// Carriage position.
    pub position_lr: i32,
    /// Pan position.
    pub position_pan: i32,
    /// Shots taken since joining.
    pub drops: u32,
    /// Player has chained commands before; no hint needed.
    pub knows_multiple: bool,
    /// Single commands sent since the last hint.
    pub single_command_uses: u32,
}

/// Concurrent map of player sessions.
#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: DashMap<String, PlayerSession>,
}

impl SessionTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Session for `username`, created from `defaults` when missing.
    pub fn get_or_insert(&self, username: &str, defaults: PlayerSession) -> PlayerSession {
        self.sessions
            .entry(username.to_string())
            .or_insert(defaults)
            .clone()
    }

    /// Session for `username`, if any.
    pub fn get(&self, username: &str) -> Option<PlayerSession> {
        self.sessions.get(username).map(|entry| entry.clone())
    }

    /// Mutate an existing session; returns whether one existed.
    pub fn update<F>(&self, username: &str, apply: F) -> bool
    where
        F: FnOnce(&mut PlayerSession),
    {
        match self.sessions.get_mut(username) {
            Some(mut entry) => {
                apply(entry.value_mut());
                true
            }
            None => false,
        }
    }
}
