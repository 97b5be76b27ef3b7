use std::{collections::VecDeque, ops::Range};

use crate::playback::track::{PlayHandle, Track};

/// What happens to a track that finishes normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueMode {
    /// Finished tracks leave the queue.
    #[default]
    Drain,
    /// Finished tracks go back to the end of the queue.
    Repeat,
    /// A single clip; the session leaves once it ends.
    Clip,
}

/// The track in the "now playing" slot, with the handle its play was issued under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playing {
    pub handle: PlayHandle,
    pub track: Track,
}

/// Ordered tracks for one guild. Positions count the now-playing slot as 0.
///
/// Purely synchronous: callers hold the session lock across a mutation and the
/// player command that goes with it.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    pending: VecDeque<Track>,
    current: Option<Playing>,
    paused: bool,
    mode: QueueMode,
}

impl PlaybackQueue {
    pub fn new(mode: QueueMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    pub fn current(&self) -> Option<&Playing> {
        self.current.as_ref()
    }

    pub fn is_current(&self, handle: PlayHandle) -> bool {
        self.current.as_ref().is_some_and(|p| p.handle == handle)
    }

    pub fn pending(&self) -> impl Iterator<Item = &Track> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Position the next appended track will play at.
    pub fn next_position(&self) -> usize {
        self.pending.len() + usize::from(self.current.is_some())
    }

    /// Appends one track and returns its play position.
    pub fn push(&mut self, track: Track) -> usize {
        let position = self.next_position();
        self.pending.push_back(track);
        position
    }

    /// Appends tracks contiguously, in order, and returns the positions they occupy.
    pub fn extend(&mut self, tracks: impl IntoIterator<Item = Track>) -> Range<usize> {
        let start = self.next_position();
        self.pending.extend(tracks);
        start..self.next_position()
    }

    /// Moves the head of the queue into the now-playing slot under a fresh handle.
    /// Whatever was playing before is dropped.
    pub fn start_next(&mut self) -> Option<Playing> {
        let track = self.pending.pop_front()?;
        let playing = Playing {
            handle: PlayHandle::next(),
            track,
        };
        self.current = Some(playing.clone());
        self.paused = false;
        Some(playing)
    }

    /// Ends the play issued under `handle`. Returns `None` when that play is not
    /// current, so a repeated end event advances nothing.
    pub fn finish(&mut self, handle: PlayHandle) -> Option<Track> {
        if !self.is_current(handle) {
            return None;
        }
        let finished = self.current.take().map(|p| p.track)?;
        self.paused = false;
        if self.mode == QueueMode::Repeat {
            self.pending.push_back(finished.clone());
        }
        Some(finished)
    }

    /// Empties the now-playing slot without touching pending tracks.
    pub fn take_current(&mut self) -> Option<Playing> {
        self.paused = false;
        self.current.take()
    }

    /// Puts a track back in the now-playing slot after a failed replacement.
    pub fn restore_current(&mut self, playing: Option<Playing>) {
        self.current = playing;
    }

    /// Returns a track to the head of the queue after its play was rejected.
    pub fn requeue_front(&mut self, track: Track) {
        self.pending.push_front(track);
    }

    /// Drops pending tracks beyond `len`. Used to undo a rejected enqueue.
    pub fn truncate(&mut self, len: usize) {
        self.pending.truncate(len);
    }

    /// Removes every pending track, leaving the current one alone.
    pub fn clear(&mut self) -> usize {
        let removed = self.pending.len();
        self.pending.clear();
        removed
    }

    /// Drops everything, including the now-playing slot.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.current = None;
        self.paused = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::UserId;

    fn track(id: &str) -> Track {
        Track {
            encoded: format!("enc-{}", id),
            identifier: id.to_string(),
            title: format!("Track {}", id),
            author: "someone".to_string(),
            uri: None,
            duration_ms: 1_000,
            source_name: "http".to_string(),
            requester: UserId(1),
            seek_offset_ms: None,
        }
    }

    fn ids(queue: &PlaybackQueue) -> Vec<String> {
        queue.pending().map(|t| t.identifier.clone()).collect()
    }

    #[test]
    fn test_positions_count_now_playing_slot() {
        let mut queue = PlaybackQueue::default();
        assert_eq!(queue.push(track("a")), 0);
        queue.start_next();
        assert_eq!(queue.push(track("b")), 1);
        assert_eq!(queue.push(track("c")), 2);
    }

    #[test]
    fn test_playlist_stays_contiguous_between_singles() {
        let mut queue = PlaybackQueue::default();
        queue.push(track("a"));
        let range = queue.extend(vec![track("p1"), track("p2"), track("p3")]);
        queue.push(track("b"));

        assert_eq!(range, 1..4);
        assert_eq!(ids(&queue), vec!["a", "p1", "p2", "p3", "b"]);
    }

    #[test]
    fn test_finish_is_idempotent_per_handle() {
        let mut queue = PlaybackQueue::default();
        queue.push(track("a"));
        queue.push(track("b"));
        let playing = queue.start_next().unwrap();

        assert_eq!(queue.finish(playing.handle).map(|t| t.identifier), Some("a".into()));
        assert_eq!(queue.finish(playing.handle), None);
        assert_eq!(ids(&queue), vec!["b"]);
    }

    #[test]
    fn test_stale_handle_does_not_finish_current() {
        let mut queue = PlaybackQueue::default();
        queue.push(track("a"));
        queue.push(track("b"));
        let first = queue.start_next().unwrap();
        let second = queue.start_next().unwrap();

        assert_ne!(first.handle, second.handle);
        assert_eq!(queue.finish(first.handle), None);
        assert!(queue.is_current(second.handle));
    }

    #[test]
    fn test_repeat_mode_requeues_finished_track() {
        let mut queue = PlaybackQueue::new(QueueMode::Repeat);
        queue.push(track("siren"));
        let playing = queue.start_next().unwrap();

        queue.finish(playing.handle);
        assert_eq!(ids(&queue), vec!["siren"]);
        assert!(queue.current().is_none());
    }

    #[test]
    fn test_clear_keeps_current() {
        let mut queue = PlaybackQueue::default();
        queue.extend(vec![track("a"), track("b"), track("c")]);
        queue.start_next();

        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.current().map(|p| p.track.identifier.as_str()), Some("a"));
        assert_eq!(queue.next_position(), 1);
    }

    #[test]
    fn test_truncate_undoes_enqueue() {
        let mut queue = PlaybackQueue::default();
        queue.push(track("a"));
        let before = queue.pending_len();
        queue.extend(vec![track("x"), track("y")]);
        queue.truncate(before);
        assert_eq!(ids(&queue), vec!["a"]);
    }

    #[test]
    fn test_requeue_front_restores_head() {
        let mut queue = PlaybackQueue::default();
        queue.extend(vec![track("a"), track("b")]);
        let playing = queue.start_next().unwrap();
        queue.take_current();
        queue.requeue_front(playing.track);
        assert_eq!(ids(&queue), vec!["a", "b"]);
        assert!(queue.current().is_none());
    }
}
