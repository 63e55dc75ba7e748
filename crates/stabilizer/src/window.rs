//! Bounded FIFO window

use std::collections::VecDeque;

/// Sliding window keeping the most recent `capacity` items
#[derive(Debug, Clone)]
pub struct SlidingWindow<T> {
    data: VecDeque<T>,
    capacity: usize,
}

impl<T> SlidingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push to the back, evicting from the front once over capacity
    pub fn push(&mut self, item: T) {
        self.data.push_back(item);
        while self.data.len() > self.capacity {
            self.data.pop_front();
        }
    }

    pub fn back(&self) -> Option<&T> {
        self.data.back()
    }

    /// Oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.data.iter()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let mut window = SlidingWindow::new(3);
        for i in 0..5 {
            window.push(i);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(window.back(), Some(&4));
    }

    #[test]
    fn test_clear() {
        let mut window = SlidingWindow::new(2);
        window.push("a");
        window.clear();
        assert!(window.is_empty());
    }
}
