//! Reorders out-of-order worker results into chronological order.

use std::collections::HashMap;

use super::context::AssessmentContext;
use super::judgment::Judgment;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Accepted(Judgment),
    Rejected { score: u8 },
    Dropped { reason: String },
}

/// A worker result tagged with where its segment sits in the video.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedOutcome {
    pub segment_index: usize,
    pub start_time: f64,
    pub outcome: Outcome,
}

/// Holds early arrivals until every segment that starts before them has reported.
pub struct ResultMerger {
    order: Vec<usize>,
    /// segment index -> its slot in `order`
    position: HashMap<usize, usize>,
    cursor: usize,
    pending: HashMap<usize, TaggedOutcome>,
}

impl ResultMerger {
    /// `expected` lists every `(segment_index, start_time)` that will report.
    pub fn new(expected: impl IntoIterator<Item = (usize, f64)>) -> Self {
        let mut keyed: Vec<(usize, f64)> = expected.into_iter().collect();
        keyed.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        let order: Vec<usize> = keyed.into_iter().map(|(index, _)| index).collect();
        let position = order.iter().enumerate().map(|(slot, &index)| (index, slot)).collect();
        Self {
            order,
            position,
            cursor: 0,
            pending: HashMap::new(),
        }
    }

    /// Accept one result and return every result that is now releasable, in order.
    pub fn push(&mut self, tagged: TaggedOutcome) -> Vec<TaggedOutcome> {
        let index = tagged.segment_index;
        let Some(&slot) = self.position.get(&index) else {
            log::warn!("Ignoring result for unexpected segment {}", index);
            return Vec::new();
        };
        if slot < self.cursor || self.pending.contains_key(&index) {
            log::warn!("Ignoring duplicate result for segment {}", index);
            return Vec::new();
        }
        self.pending.insert(index, tagged);

        let mut released = Vec::new();
        while let Some(next) = self.order.get(self.cursor) {
            match self.pending.remove(next) {
                Some(ready) => {
                    released.push(ready);
                    self.cursor += 1;
                }
                None => break,
            }
        }
        released
    }

    pub fn is_complete(&self) -> bool {
        self.cursor == self.order.len()
    }

    /// Results still held back, waiting on an earlier segment.
    pub fn held(&self) -> usize {
        self.pending.len()
    }

    /// Release whatever is still held, in start-time order.
    pub fn finish(mut self) -> Vec<TaggedOutcome> {
        let mut rest: Vec<TaggedOutcome> = self.pending.drain().map(|(_, v)| v).collect();
        rest.sort_by(|a, b| {
            a.start_time
                .total_cmp(&b.start_time)
                .then(a.segment_index.cmp(&b.segment_index))
        });
        rest
    }
}

/// Append accepted descriptions to the context in the order given.
pub fn fold_into_context(context: &mut AssessmentContext, released: &[TaggedOutcome]) {
    for tagged in released {
        if let Outcome::Accepted(judgment) = &tagged.outcome {
            context.push(judgment.description.clone());
        }
    }
}
