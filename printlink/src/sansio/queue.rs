//! Command queues, the sent-block history and resend recovery.
//!
//! Blocks waiting for transmission live in one FIFO per [`Priority`]. Once a
//! block has been written it moves to the history, most recent first, where
//! it stays until a resend request pulls it back into the resend queue or it
//! ages out. A block is owned by exactly one queue at a time.

use super::protocol::trim_command;
use bitflags::bitflags;
use std::collections::VecDeque;
use tracing::trace;

/// Transmission priority of a queued block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Priority {
    Normal,
    High,
    /// Blocks the controller asked for again. Filled by resend recovery.
    Resend,
}

impl Priority {
    /// Every priority, highest first.
    pub const DESCENDING: [Priority; 3] = [Priority::Resend, Priority::High, Priority::Normal];

    fn index(self) -> usize {
        match self {
            Priority::Normal => 0,
            Priority::High => 1,
            Priority::Resend => 2,
        }
    }

    /// The pause flag for this priority.
    pub fn flag(self) -> Paused {
        match self {
            Priority::Normal => Paused::NORMAL,
            Priority::High => Paused::HIGH,
            Priority::Resend => Paused::RESEND,
        }
    }
}

bitflags! {
    /// Set of priorities excluded from transmission.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct Paused: u8 {
        const NORMAL = 0b001;
        const HIGH = 0b010;
        const RESEND = 0b100;
    }
}

/// One command plus its sequence number, once it has one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    text: String,
    line: Option<u64>,
}

impl Block {
    /// A block carrying `text` as is. Use [`Queues::enqueue`] for raw input.
    pub fn new(text: impl Into<String>, line: Option<u64>) -> Self {
        Block {
            text: text.into(),
            line,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// The assigned line number; `None` until first transmission.
    pub fn line(&self) -> Option<u64> {
        self.line
    }
}

/// The pending queues and the history of one connection.
#[derive(Debug)]
pub struct Queues {
    pending: [VecDeque<Block>; 3],
    /// Most recently sent first.
    history: VecDeque<Block>,
    history_capacity: usize,
}

impl Queues {
    pub fn new(history_capacity: usize) -> Self {
        Queues {
            pending: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            history: VecDeque::new(),
            history_capacity,
        }
    }

    /// Strip `text` and append it to the tail of `priority`.
    ///
    /// Returns `false` without queueing anything if only a comment or
    /// whitespace was given.
    pub fn enqueue(&mut self, priority: Priority, text: &str, line: Option<u64>) -> bool {
        match trim_command(text) {
            Some(code) => {
                self.push_back(priority, Block::new(code, line));
                true
            }
            None => false,
        }
    }

    pub fn push_back(&mut self, priority: Priority, block: Block) {
        self.pending[priority.index()].push_back(block);
    }

    /// Remove the head of the highest priority queue that is not paused.
    pub fn dequeue_highest_ready(&mut self, paused: Paused) -> Option<(Priority, Block)> {
        Priority::DESCENDING
            .iter()
            .filter(|p| !paused.contains(p.flag()))
            .find_map(|&p| self.pending[p.index()].pop_front().map(|block| (p, block)))
    }

    /// Record `block` as fully transmitted.
    ///
    /// An unnumbered block takes `*next_line`, which is then advanced.
    /// Returns the line the block now carries.
    pub fn commit_sent(&mut self, mut block: Block, next_line: &mut u64) -> u64 {
        let line = match block.line {
            Some(line) => line,
            None => {
                let line = *next_line;
                *next_line += 1;
                block.line = Some(line);
                line
            }
        };
        self.history.push_front(block);
        if self.history.len() > self.history_capacity * 3 / 2 {
            trace!(
                len = self.history.len(),
                capacity = self.history_capacity,
                "shrinking history"
            );
            self.history.truncate(self.history_capacity);
        }
        line
    }

    /// Forget everything whose line number is about to become meaningless.
    pub fn reset_sequencing(&mut self) {
        self.pending[Priority::Resend.index()].clear();
        self.history.clear();
    }

    /// Drop every block, history included.
    pub fn clear(&mut self) {
        for queue in self.pending.iter_mut() {
            queue.clear();
        }
        self.history.clear();
    }

    /// Refill the resend queue so transmission restarts at `target`.
    ///
    /// Returns how many blocks changed queue. Zero means the request can not
    /// be served from what is cached.
    pub fn recover(&mut self, target: u64) -> usize {
        let mut moved = 0;

        // History is newest first; prepending each match leaves the resend
        // queue in ascending order.
        while let Some(block) = self.history.pop_front() {
            trace!(line = ?block.line, text = %block.text, "pop sent block");
            if block.line.map_or(false, |line| line >= target) {
                self.pending[Priority::Resend.index()].push_front(block);
                moved += 1;
            } else {
                self.history.push_front(block);
                break;
            }
        }

        if moved == 0 {
            // The line may already be queued for resend, as after "rs 3"
            // followed by "rs 6": peel off what the controller now has.
            let resend = &mut self.pending[Priority::Resend.index()];
            while let Some(block) = resend.pop_front() {
                trace!(line = ?block.line, text = %block.text, "pop resend block");
                if block.line.map_or(false, |line| line < target) {
                    self.history.push_front(block);
                    moved += 1;
                } else {
                    resend.push_front(block);
                    break;
                }
            }
        }

        moved
    }

    pub fn len(&self, priority: Priority) -> usize {
        self.pending[priority.index()].len()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    /// Blocks waiting for transmission, across all priorities.
    pub fn buffered_lines(&self) -> usize {
        self.pending.iter().map(VecDeque::len).sum()
    }

    /// The queued blocks of `priority`, head first.
    pub fn iter(&self, priority: Priority) -> impl Iterator<Item = &Block> {
        self.pending[priority.index()].iter()
    }

    /// The history, most recently sent first.
    pub fn history(&self) -> impl Iterator<Item = &Block> {
        self.history.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines<'a>(blocks: impl Iterator<Item = &'a Block>) -> Vec<u64> {
        blocks.filter_map(Block::line).collect()
    }

    fn with_history(sent: &[u64]) -> Queues {
        let mut queues = Queues::new(64);
        for &line in sent {
            let mut next = 0;
            queues.commit_sent(Block::new(format!("G1 X{}", line), Some(line)), &mut next);
        }
        queues
    }

    #[test]
    fn test_enqueue_trims() {
        let mut queues = Queues::new(8);
        assert!(queues.enqueue(Priority::Normal, "G1 X10 ; move  ", None));
        assert!(queues.enqueue(Priority::Normal, "G1 X10", None));
        assert!(!queues.enqueue(Priority::Normal, "; comment only", None));
        assert!(!queues.enqueue(Priority::Normal, " \r\n", None));
        let blocks: Vec<_> = queues.iter(Priority::Normal).collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], blocks[1]);
        assert_eq!(blocks[0].text(), "G1 X10");
        assert_eq!(blocks[0].line(), None);
    }

    #[test]
    fn test_priority_order() {
        let mut queues = Queues::new(8);
        queues.enqueue(Priority::Normal, "G1 X1", None);
        queues.enqueue(Priority::High, "M112", None);
        queues.enqueue(Priority::Normal, "G1 X2", None);
        queues.push_back(Priority::Resend, Block::new("G1 X0", Some(0)));

        let order: Vec<_> = std::iter::from_fn(|| queues.dequeue_highest_ready(Paused::empty()))
            .map(|(p, b)| (p, b.text().to_string()))
            .collect();
        assert_eq!(
            order,
            vec![
                (Priority::Resend, "G1 X0".to_string()),
                (Priority::High, "M112".to_string()),
                (Priority::Normal, "G1 X1".to_string()),
                (Priority::Normal, "G1 X2".to_string()),
            ]
        );
    }

    #[test]
    fn test_paused_priority_skipped() {
        let mut queues = Queues::new(8);
        queues.enqueue(Priority::Normal, "G1 X1", None);
        queues.enqueue(Priority::High, "M105", None);

        let paused = Paused::HIGH | Paused::NORMAL;
        assert!(queues.dequeue_highest_ready(paused).is_none());

        let (priority, block) = queues.dequeue_highest_ready(Paused::HIGH).unwrap();
        assert_eq!(priority, Priority::Normal);
        assert_eq!(block.text(), "G1 X1");
        assert_eq!(queues.len(Priority::High), 1);
    }

    #[test]
    fn test_commit_assigns_lines() {
        let mut queues = Queues::new(8);
        let mut next = 5;
        assert_eq!(queues.commit_sent(Block::new("G28", None), &mut next), 5);
        assert_eq!(queues.commit_sent(Block::new("G1 X1", Some(2)), &mut next), 2);
        assert_eq!(queues.commit_sent(Block::new("G1 X2", None), &mut next), 6);
        assert_eq!(next, 7);
        assert_eq!(lines(queues.history()), vec![6, 2, 5]);
    }

    #[test]
    fn test_history_shrinks_past_one_and_a_half() {
        let mut queues = Queues::new(4);
        let mut next = 0;
        for _ in 0..6 {
            queues.commit_sent(Block::new("G1", None), &mut next);
        }
        assert_eq!(queues.history_len(), 6);
        queues.commit_sent(Block::new("G1", None), &mut next);
        assert_eq!(queues.history_len(), 4);
        assert_eq!(lines(queues.history()), vec![6, 5, 4, 3]);
    }

    #[test]
    fn test_recover_from_history() {
        let mut queues = with_history(&[6, 7, 8, 9, 10]);
        assert_eq!(lines(queues.history()), vec![10, 9, 8, 7, 6]);

        assert_eq!(queues.recover(8), 3);
        assert_eq!(lines(queues.iter(Priority::Resend)), vec![8, 9, 10]);
        assert_eq!(lines(queues.history()), vec![7, 6]);
    }

    #[test]
    fn test_recover_peels_resend_queue() {
        let mut queues = with_history(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(queues.recover(3), 4);
        assert_eq!(lines(queues.iter(Priority::Resend)), vec![3, 4, 5, 6]);

        // The controller got 3 and 4 after all and now wants 5.
        assert_eq!(queues.recover(5), 2);
        assert_eq!(lines(queues.iter(Priority::Resend)), vec![5, 6]);
        assert_eq!(lines(queues.history()), vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_recover_uncached() {
        let mut queues = with_history(&[40, 41]);
        assert_eq!(queues.recover(50), 0);
        assert_eq!(queues.len(Priority::Resend), 0);
        assert_eq!(lines(queues.history()), vec![41, 40]);

        let mut empty = Queues::new(4);
        assert_eq!(empty.recover(0), 0);
    }

    #[test]
    fn test_reset_sequencing_keeps_unsent() {
        let mut queues = with_history(&[0, 1, 2]);
        queues.recover(1);
        queues.enqueue(Priority::Normal, "G1 X1", None);
        queues.enqueue(Priority::High, "M105", None);

        queues.reset_sequencing();
        assert_eq!(queues.len(Priority::Resend), 0);
        assert_eq!(queues.history_len(), 0);
        assert_eq!(queues.len(Priority::Normal), 1);
        assert_eq!(queues.len(Priority::High), 1);
        assert_eq!(queues.buffered_lines(), 2);

        queues.clear();
        assert_eq!(queues.buffered_lines(), 0);
    }
}
