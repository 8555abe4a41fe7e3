//! Ordered set of waiting players with a cursor on whoever holds the turn.

use indexmap::IndexSet;
use thiserror::Error;

/// Errors raised when modifying the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue already holds its maximum number of players.
    #[error("the queue is full ({max} players)")]
    Full {
        /// Configured maximum.
        max: usize,
    },
}

/// Players in join order; the cursor marks the current player.
///
/// The cursor may sit one slot before the first player after a removal, so that
/// [`PlayerQueue::next_player`] lands on whoever took the removed player's place.
#[derive(Debug, Clone, Default)]
pub struct PlayerQueue {
    players: IndexSet<String>,
    cursor: isize,
    max_size: usize,
}

impl PlayerQueue {
    /// Queue capped at `max_size` players; `0` means unlimited.
    pub fn new(max_size: usize) -> Self {
        Self {
            players: IndexSet::new(),
            cursor: 0,
            max_size,
        }
    }

    /// Append a player, returning their position.
    pub fn add(&mut self, username: &str) -> Result<usize, QueueError> {
        if let Some(index) = self.players.get_index_of(username) {
            return Ok(index);
        }
        if self.max_size > 0 && self.players.len() >= self.max_size {
            return Err(QueueError::Full { max: self.max_size });
        }

        let (index, _) = self.players.insert_full(username.to_string());
        if self.cursor < 0 || self.cursor_index() >= self.players.len() {
            self.cursor = 0;
        }
        Ok(index)
    }

    /// Remove a player, returning the position they held.
    pub fn remove(&mut self, username: &str) -> Option<usize> {
        let (index, _) = self.players.shift_remove_full(username)?;
        if index as isize <= self.cursor {
            self.cursor -= 1;
        }
        Some(index)
    }

    /// Advance the cursor, wrapping to the front.
    pub fn next_player(&mut self) -> Option<String> {
        if self.players.is_empty() {
            self.cursor = 0;
            return None;
        }
        self.cursor += 1;
        if self.cursor_index() >= self.players.len() {
            self.cursor = 0;
        }
        self.current_player()
    }

    /// Player the cursor points at.
    pub fn current_player(&self) -> Option<String> {
        self.players
            .get_index(self.cursor.max(0) as usize)
            .cloned()
    }

    /// Move the cursor onto `username`.
    pub fn select_player(&mut self, username: &str) -> bool {
        match self.players.get_index_of(username) {
            Some(index) => {
                self.cursor = index as isize;
                true
            }
            None => false,
        }
    }

    /// Put `replacement` in `username`'s slot.
    ///
    /// A replacement already queued elsewhere is moved rather than duplicated.
    pub fn replace_player(&mut self, username: &str, replacement: &str) {
        let mut slot = self.cursor.max(0) as usize;
        if self.players.is_empty() {
            self.players.insert(replacement.to_string());
            return;
        }

        if let Some(existing) = self.players.get_index_of(replacement) {
            if existing < slot {
                slot -= 1;
            }
            self.players.shift_remove_index(existing);
        }
        self.players.shift_remove(username);

        let slot = slot.min(self.players.len());
        self.players.shift_insert(slot, replacement.to_string());
    }

    /// Position of `username`.
    pub fn index_of(&self, username: &str) -> Option<usize> {
        self.players.get_index_of(username)
    }

    /// Number of queued players.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Whether nobody is queued.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Remove everyone.
    pub fn clear(&mut self) {
        self.players.clear();
        self.cursor = 0;
    }

    /// Players in queue order.
    pub fn players(&self) -> Vec<String> {
        self.players.iter().cloned().collect()
    }

    fn cursor_index(&self) -> usize {
        self.cursor.max(0) as usize
    }
}
