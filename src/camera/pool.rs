use log::warn;
use std::sync::Mutex;

/// Fixed set of frame buffers lent out one frame per slot.
///
/// When every slot is lent out, checkout fails until a frame comes back.
#[derive(Debug)]
pub struct FramePool {
    in_use: Mutex<Vec<bool>>,
}

impl FramePool {
    pub fn new(slots: usize) -> Self {
        Self {
            in_use: Mutex::new(vec![false; slots.max(1)]),
        }
    }

    pub fn capacity(&self) -> usize {
        self.in_use.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    pub fn available(&self) -> usize {
        self.in_use
            .lock()
            .map(|slots| slots.iter().filter(|used| !**used).count())
            .unwrap_or(0)
    }

    /// Reserve a free slot, or `None` when the pool is exhausted.
    pub fn checkout(&self) -> Option<usize> {
        let mut slots = self.in_use.lock().ok()?;
        let slot = slots.iter().position(|used| !used)?;
        slots[slot] = true;
        Some(slot)
    }

    /// Give a slot back. Unknown or already free slots are ignored.
    pub fn checkin(&self, slot: usize) -> bool {
        let Ok(mut slots) = self.in_use.lock() else {
            return false;
        };

        match slots.get_mut(slot) {
            Some(used) if *used => {
                *used = false;
                true
            }
            Some(_) => {
                warn!("frame buffer {slot} released twice");
                false
            }
            None => {
                warn!("released unknown frame buffer {slot}");
                false
            }
        }
    }
}
