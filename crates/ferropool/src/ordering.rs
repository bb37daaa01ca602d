use std::collections::BTreeMap;

/// Reconstructs input order from values that complete in any order.
///
/// Values are pushed with their task index. [`pop_ready`](Self::pop_ready)
/// releases them strictly by index, as soon as the contiguous prefix up to
/// that index is available. A value that arrives in order is never stored.
///
/// The buffer holds at most the values that completed ahead of the oldest
/// outstanding task, which for a pool of `n` workers is bounded by the number
/// of tasks that could finish while that one task runs.
#[derive(Debug)]
pub(crate) struct OrderingBuffer<T> {
    /// Index of the next value to release. Everything below it was released.
    next: usize,
    /// The in-order value waiting to be popped, if any.
    ready: Option<T>,
    pending: BTreeMap<usize, T>,
}

impl<T> OrderingBuffer<T> {
    pub(crate) const fn new() -> Self {
        Self {
            next: 0,
            ready: None,
            pending: BTreeMap::new(),
        }
    }

    /// Accepts the value for `index`.
    ///
    /// Returns `false` and drops the value if `index` was already released or
    /// is already buffered.
    pub(crate) fn push(&mut self, index: usize, value: T) -> bool {
        let ready_index = self.next + usize::from(self.ready.is_some());
        if index < ready_index || self.pending.contains_key(&index) {
            return false;
        }

        if index == self.next && self.ready.is_none() {
            self.ready = Some(value);
        } else {
            self.pending.insert(index, value);
        }
        true
    }

    /// Releases the next value in index order, if it has arrived.
    pub(crate) fn pop_ready(&mut self) -> Option<T> {
        let value = self
            .ready
            .take()
            .or_else(|| self.pending.remove(&self.next))?;
        self.next += 1;
        Some(value)
    }

    /// Drops every buffered value and returns how many there were.
    pub(crate) fn clear(&mut self) -> usize {
        let buffered = self.buffered();
        self.ready = None;
        self.pending.clear();
        buffered
    }

    /// Number of values released so far.
    #[cfg(test)]
    pub(crate) const fn released(&self) -> usize {
        self.next
    }

    /// Number of values waiting for an earlier index.
    pub(crate) fn buffered(&self) -> usize {
        self.pending.len() + usize::from(self.ready.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain<T>(buffer: &mut OrderingBuffer<T>) -> Vec<T> {
        core::iter::from_fn(|| buffer.pop_ready()).collect()
    }

    #[test]
    fn in_order_values_pass_straight_through() {
        let mut buffer = OrderingBuffer::new();
        for i in 0..4 {
            assert!(buffer.push(i, i * 10));
            assert_eq!(buffer.pop_ready(), Some(i * 10));
            assert_eq!(buffer.buffered(), 0);
        }
        assert_eq!(buffer.released(), 4);
    }

    #[test]
    fn out_of_order_values_wait_for_the_gap() {
        let mut buffer = OrderingBuffer::new();

        assert!(buffer.push(2, 'c'));
        assert!(buffer.push(1, 'b'));
        assert_eq!(buffer.pop_ready(), None);
        assert_eq!(buffer.buffered(), 2);

        assert!(buffer.push(0, 'a'));
        assert_eq!(drain(&mut buffer), vec!['a', 'b', 'c']);

        assert!(buffer.push(4, 'e'));
        assert_eq!(buffer.pop_ready(), None);
        assert!(buffer.push(3, 'd'));
        assert_eq!(drain(&mut buffer), vec!['d', 'e']);
        assert_eq!(buffer.released(), 5);
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn reversed_completion_is_released_at_the_end() {
        let mut buffer = OrderingBuffer::new();
        for i in (1..100).rev() {
            buffer.push(i, i);
            assert_eq!(buffer.pop_ready(), None);
        }
        buffer.push(0, 0);
        assert_eq!(drain(&mut buffer), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn clearing_drops_everything_buffered() {
        let mut buffer = OrderingBuffer::new();
        assert!(buffer.push(0, 'a'));
        assert!(buffer.push(2, 'c'));
        assert!(buffer.push(3, 'd'));

        assert_eq!(buffer.clear(), 3);
        assert_eq!(buffer.buffered(), 0);
        assert_eq!(buffer.pop_ready(), None);
    }

    #[test]
    fn stale_and_duplicate_indices_are_rejected() {
        let mut buffer = OrderingBuffer::new();
        assert!(buffer.push(0, "zero"));
        assert!(!buffer.push(0, "again"));
        assert_eq!(buffer.pop_ready(), Some("zero"));
        assert!(!buffer.push(0, "late"));

        assert!(buffer.push(5, "five"));
        assert!(!buffer.push(5, "five again"));
        assert_eq!(buffer.buffered(), 1);
    }
}
