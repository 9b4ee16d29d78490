use super::{MemoryError, MemoryResult, Role, Turn};
use crate::persistence::PersistenceMirror;
use std::sync::Arc;

/// Turns kept by [`ConversationLog::trim`], independent of the limit.
pub const RETAINED_AFTER_TRIM: usize = 10;

/// Ordered log of turns with a never-reused index counter.
///
/// Every mutation is persisted before it becomes visible here: the new turn
/// list is written to the local store, and only on success replaces the
/// in-memory list. A failed write leaves the log untouched.
pub struct ConversationLog {
    turns: Vec<Turn>,
    next_index: u64,
    in_construction: Option<u64>,
    mirror: Arc<PersistenceMirror>,
}

impl ConversationLog {
    pub fn new(mirror: Arc<PersistenceMirror>) -> Self {
        Self {
            turns: Vec::new(),
            next_index: 0,
            in_construction: None,
            mirror,
        }
    }

    /// Restore previously persisted turns without writing them back.
    pub fn hydrated(mut turns: Vec<Turn>, mirror: Arc<PersistenceMirror>) -> Self {
        turns.sort_by_key(|t| t.index);
        let next_index = turns.last().map_or(0, |t| t.index + 1);
        Self {
            turns,
            next_index,
            in_construction: None,
            mirror,
        }
    }

    pub fn mirror(&self) -> Arc<PersistenceMirror> {
        self.mirror.clone()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn get(&self, index: u64) -> Option<&Turn> {
        self.position(index).map(|pos| &self.turns[pos])
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Index the next appended turn will receive.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn in_construction(&self) -> Option<u64> {
        self.in_construction
    }

    /// Mark `index` as owned by the active stream session.
    pub fn begin_construction(&mut self, index: u64) {
        self.in_construction = Some(index);
    }

    /// Clear the construction mark if it still belongs to `index`.
    pub fn finish_construction(&mut self, index: u64) -> bool {
        if self.in_construction == Some(index) {
            self.in_construction = None;
            true
        } else {
            false
        }
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>) -> MemoryResult<u64> {
        let index = self.allocate();
        let mut turns = self.turns.clone();
        turns.push(Turn::new(index, role, content));
        self.commit(turns)?;
        Ok(index)
    }

    /// Append a user turn and its empty assistant placeholder in one write.
    pub fn append_exchange(&mut self, user_text: impl Into<String>) -> MemoryResult<(u64, u64)> {
        let user_index = self.allocate();
        let assistant_index = self.allocate();
        let mut turns = self.turns.clone();
        turns.push(Turn::new(user_index, Role::User, user_text));
        turns.push(Turn::new(assistant_index, Role::Assistant, String::new()));
        self.commit(turns)?;
        Ok((user_index, assistant_index))
    }

    /// Replace a turn's content. Missing turns are a logged no-op.
    pub fn update_content(&mut self, index: u64, content: &str) -> MemoryResult<bool> {
        let Some(pos) = self.position(index) else {
            tracing::warn!(index = %index, "Update for missing turn ignored");
            return Ok(false);
        };
        if self.turns[pos].content == content {
            return Ok(true);
        }
        let mut turns = self.turns.clone();
        turns[pos].content = content.to_string();
        self.commit(turns)?;
        Ok(true)
    }

    /// User edit: like [`Self::update_content`] but refuses the turn being
    /// generated and reports missing turns.
    pub fn edit(&mut self, index: u64, content: &str) -> MemoryResult<()> {
        self.ensure_not_constructing(index)?;
        if self.position(index).is_none() {
            return Err(MemoryError::TurnNotFound(index));
        }
        self.update_content(index, content)?;
        Ok(())
    }

    /// Remove one turn. Absent indices are a no-op returning `false`.
    pub fn delete(&mut self, index: u64) -> MemoryResult<bool> {
        self.ensure_not_constructing(index)?;
        let Some(pos) = self.position(index) else {
            tracing::debug!(index = %index, "Delete for missing turn ignored");
            return Ok(false);
        };
        let mut turns = self.turns.clone();
        turns.remove(pos);
        self.commit(turns)?;
        Ok(true)
    }

    /// Remove every turn with `index >= threshold`, returning the removed
    /// indices. The counter is not rewound.
    pub fn truncate_from(&mut self, threshold: u64) -> MemoryResult<Vec<u64>> {
        if let Some(active) = self.in_construction.filter(|&i| i >= threshold) {
            return Err(MemoryError::Busy(active));
        }
        let removed: Vec<u64> = self
            .turns
            .iter()
            .map(|t| t.index)
            .filter(|&i| i >= threshold)
            .collect();
        if removed.is_empty() {
            return Ok(removed);
        }
        let turns = self
            .turns
            .iter()
            .filter(|t| t.index < threshold)
            .cloned()
            .collect();
        self.commit(turns)?;
        Ok(removed)
    }

    /// Once the log grows past `limit`, keep only the newest
    /// [`RETAINED_AFTER_TRIM`] turns. Returns how many were dropped.
    pub fn trim(&mut self, limit: usize) -> MemoryResult<usize> {
        if self.turns.len() <= limit || self.turns.len() <= RETAINED_AFTER_TRIM {
            return Ok(0);
        }
        let dropped = self.turns.len() - RETAINED_AFTER_TRIM;
        let turns = self.turns.iter().skip(dropped).cloned().collect();
        self.commit(turns)?;
        tracing::info!(dropped = dropped, limit = limit, "Trimmed conversation log");
        Ok(dropped)
    }

    /// Empty the log and restart numbering at zero.
    pub fn clear(&mut self) -> MemoryResult<()> {
        self.commit(Vec::new())?;
        self.next_index = 0;
        self.in_construction = None;
        Ok(())
    }

    /// Replace the log with `entries`, numbered from zero.
    pub fn replace_all(&mut self, entries: Vec<(Role, String)>) -> MemoryResult<()> {
        let turns: Vec<Turn> = entries
            .into_iter()
            .zip(0u64..)
            .map(|((role, content), index)| Turn::new(index, role, content))
            .collect();
        let next_index = turns.len() as u64;
        self.commit(turns)?;
        self.next_index = next_index;
        self.in_construction = None;
        Ok(())
    }

    fn allocate(&mut self) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn position(&self, index: u64) -> Option<usize> {
        self.turns.binary_search_by_key(&index, |t| t.index).ok()
    }

    fn ensure_not_constructing(&self, index: u64) -> MemoryResult<()> {
        if self.in_construction == Some(index) {
            Err(MemoryError::Busy(index))
        } else {
            Ok(())
        }
    }

    fn commit(&mut self, turns: Vec<Turn>) -> MemoryResult<()> {
        self.mirror.write_log(&turns)?;
        self.turns = turns;
        Ok(())
    }
}
