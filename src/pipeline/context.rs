use std::collections::VecDeque;

/// Rolling memory of the most recent accepted highlights of one video.
///
/// Owned by the pipeline driver for the duration of a run. Only the merge
/// step appends to it, always in chronological segment order.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentContext {
    capacity: usize,
    recent: VecDeque<String>,
}

impl AssessmentContext {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            recent: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, description: String) {
        if self.capacity == 0 {
            return;
        }
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(description);
    }

    /// Copy of the buffer, oldest first, handed to an in-flight judgment call.
    pub fn snapshot(&self) -> Vec<String> {
        self.recent.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}
