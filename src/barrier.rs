//! Resource-state bookkeeping.
//!
//! Each stage owns a [`StateTracker`] for the resources it allocated. Before a
//! dispatch or draw the stage opens a [`BarrierBatch`], declares the state every
//! touched subresource must be in, and flushes. Transitions to the state a
//! subresource is already in are dropped, so a pass only lists what it needs.

use std::collections::HashMap;

use crate::device::{Barrier, BufferHandle, GpuDevice, ResourceState, Subresource};

/// Last known state of every subresource a stage owns.
#[derive(Debug, Default)]
pub struct StateTracker {
    states: HashMap<BufferHandle, Vec<ResourceState>>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `buffer` with every subresource in `initial`.
    pub fn register(&mut self, buffer: BufferHandle, subresources: u32, initial: ResourceState) {
        self.states
            .insert(buffer, vec![initial; subresources.max(1) as usize]);
    }

    /// State of one subresource, or of the whole buffer if all agree.
    pub fn state(&self, buffer: BufferHandle, subresource: Subresource) -> Option<ResourceState> {
        let states = self.states.get(&buffer)?;
        match subresource {
            Subresource::Index(i) => states.get(i as usize).copied(),
            Subresource::All => {
                let first = *states.first()?;
                states.iter().all(|s| *s == first).then_some(first)
            }
        }
    }

    pub fn is_tracked(&self, buffer: BufferHandle) -> bool {
        self.states.contains_key(&buffer)
    }
}

/// Transitions accumulated for one pass.
///
/// States move in the tracker only when the batch is flushed; a batch that is
/// dropped leaves the tracker as it was.
pub struct BarrierBatch<'a> {
    tracker: &'a mut StateTracker,
    staged: HashMap<BufferHandle, Vec<ResourceState>>,
    pending: Vec<Barrier>,
}

impl<'a> BarrierBatch<'a> {
    pub fn new(tracker: &'a mut StateTracker) -> Self {
        Self {
            tracker,
            staged: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Require `subresource` of `buffer` to be in `state` for the pass.
    ///
    /// Untracked buffers are ignored; they belong to another stage.
    pub fn transition(
        &mut self,
        buffer: BufferHandle,
        subresource: Subresource,
        state: ResourceState,
    ) -> &mut Self {
        if !self.staged.contains_key(&buffer) {
            let Some(current) = self.tracker.states.get(&buffer) else {
                return self;
            };
            self.staged.insert(buffer, current.clone());
        }
        let Some(states) = self.staged.get_mut(&buffer) else {
            return self;
        };

        match subresource {
            Subresource::Index(i) => {
                if let Some(current) = states.get_mut(i as usize) {
                    push_transition(&mut self.pending, buffer, subresource, current, state);
                }
            }
            Subresource::All => {
                let uniform = states.windows(2).all(|w| w[0] == w[1]);
                if uniform {
                    let before = states[0];
                    if before != state {
                        self.pending.push(Barrier {
                            buffer,
                            subresource: Subresource::All,
                            before,
                            after: state,
                        });
                        states.iter_mut().for_each(|s| *s = state);
                    }
                } else {
                    for (i, current) in states.iter_mut().enumerate() {
                        let sub = Subresource::Index(i as u32);
                        push_transition(&mut self.pending, buffer, sub, current, state);
                    }
                }
            }
        }
        self
    }

    /// Shorthand for a whole-buffer transition.
    pub fn require(&mut self, buffer: BufferHandle, state: ResourceState) -> &mut Self {
        self.transition(buffer, Subresource::All, state)
    }

    pub fn pending(&self) -> &[Barrier] {
        &self.pending
    }

    /// Submit the accumulated transitions and commit them to the tracker.
    /// Returns how many were issued.
    pub fn flush(self, device: &mut dyn GpuDevice) -> usize {
        let count = self.pending.len();
        if count > 0 {
            device.barrier(&self.pending);
            log::trace!("flushed {} barriers", count);
        }
        self.tracker.states.extend(self.staged);
        count
    }
}

fn push_transition(
    pending: &mut Vec<Barrier>,
    buffer: BufferHandle,
    subresource: Subresource,
    current: &mut ResourceState,
    state: ResourceState,
) {
    if *current != state {
        pending.push(Barrier {
            buffer,
            subresource,
            before: *current,
            after: state,
        });
        *current = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingDevice;

    fn handle(i: u32) -> BufferHandle {
        BufferHandle(i)
    }

    // ========== Tracker Tests ==========

    #[test]
    fn test_register_and_query() {
        let mut tracker = StateTracker::new();
        tracker.register(handle(0), 1, ResourceState::COMMON);
        tracker.register(handle(1), 30, ResourceState::COMMON);

        assert_eq!(tracker.state(handle(0), Subresource::All), Some(ResourceState::COMMON));
        assert_eq!(tracker.state(handle(1), Subresource::Index(29)), Some(ResourceState::COMMON));
        assert_eq!(tracker.state(handle(1), Subresource::Index(30)), None);
        assert_eq!(tracker.state(handle(2), Subresource::All), None);
    }

    // ========== Batch Tests ==========

    #[test]
    fn test_redundant_transitions_dropped() {
        let mut tracker = StateTracker::new();
        tracker.register(handle(0), 1, ResourceState::UNORDERED_ACCESS);

        let mut batch = BarrierBatch::new(&mut tracker);
        batch.require(handle(0), ResourceState::UNORDERED_ACCESS);
        assert!(batch.pending().is_empty());

        batch.require(handle(0), ResourceState::NON_PIXEL_SHADER_RESOURCE);
        batch.require(handle(0), ResourceState::NON_PIXEL_SHADER_RESOURCE);
        assert_eq!(batch.pending().len(), 1);
        assert_eq!(batch.pending()[0].before, ResourceState::UNORDERED_ACCESS);
    }

    #[test]
    fn test_split_subresources() {
        let mut tracker = StateTracker::new();
        tracker.register(handle(3), 4, ResourceState::COMMON);

        let mut device = RecordingDevice::new();
        let mut batch = BarrierBatch::new(&mut tracker);
        batch.transition(handle(3), Subresource::Index(1), ResourceState::UNORDERED_ACCESS);
        assert_eq!(batch.pending().len(), 1);
        batch.flush(&mut device);
        assert_eq!(tracker.state(handle(3), Subresource::All), None);

        let mut batch = BarrierBatch::new(&mut tracker);
        batch.require(handle(3), ResourceState::UNORDERED_ACCESS);
        // Only the three subresources not already in UAV move.
        assert_eq!(batch.pending().len(), 3);
        assert!(batch
            .pending()
            .iter()
            .all(|b| b.before == ResourceState::COMMON));
    }

    #[test]
    fn test_dropped_batch_leaves_tracker_unchanged() {
        let mut tracker = StateTracker::new();
        tracker.register(handle(0), 2, ResourceState::COMMON);

        {
            let mut batch = BarrierBatch::new(&mut tracker);
            batch.require(handle(0), ResourceState::UNORDERED_ACCESS);
            assert_eq!(batch.pending().len(), 1);
        }
        assert_eq!(tracker.state(handle(0), Subresource::All), Some(ResourceState::COMMON));

        // The same request still produces its barrier once flushed.
        let mut device = RecordingDevice::new();
        let mut batch = BarrierBatch::new(&mut tracker);
        batch.require(handle(0), ResourceState::UNORDERED_ACCESS);
        assert_eq!(batch.flush(&mut device), 1);
        assert_eq!(
            tracker.state(handle(0), Subresource::All),
            Some(ResourceState::UNORDERED_ACCESS)
        );
        assert_eq!(device.barrier_count(), 1);
    }

    #[test]
    fn test_untracked_ignored() {
        let mut tracker = StateTracker::new();
        let mut batch = BarrierBatch::new(&mut tracker);
        batch.require(handle(9), ResourceState::UNORDERED_ACCESS);
        assert!(batch.pending().is_empty());
    }
}
