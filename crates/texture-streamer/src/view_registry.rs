//! Shader-visible view slot allocation
//!
//! Views live in a fixed-capacity slot table, the way a descriptor heap hands
//! out indices. A [`ViewSlot`] owns its slot and returns it to the table when
//! dropped, so a released slot is reused by the next acquisition.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::TextureError;

/// Default number of view slots
pub const DEFAULT_VIEW_CAPACITY: usize = 4096;

#[derive(Debug)]
struct SlotTable<V> {
    /// Grows up to `capacity`; its length is the high-water mark
    slots: Vec<Option<V>>,
    /// Released indices, reused most recent first
    free_list: Vec<u32>,
    capacity: usize,
}

impl<V> SlotTable<V> {
    fn allocate(&mut self) -> Option<u32> {
        if let Some(index) = self.free_list.pop() {
            return Some(index);
        }
        if self.slots.len() < self.capacity {
            self.slots.push(None);
            Some((self.slots.len() - 1) as u32)
        } else {
            None
        }
    }

    fn free(&mut self, index: u32) -> Option<V> {
        let view = self.slots.get_mut(index as usize).and_then(Option::take)?;
        self.free_list.push(index);
        Some(view)
    }

    fn occupied(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }
}

/// Fixed-capacity table of shader-visible views
#[derive(Debug)]
pub struct ViewRegistry<V> {
    table: Arc<Mutex<SlotTable<V>>>,
}

impl<V> Clone for ViewRegistry<V> {
    fn clone(&self) -> Self {
        Self { table: self.table.clone() }
    }
}

impl<V> ViewRegistry<V> {
    /// Creates a registry that holds at most `capacity` views
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Arc::new(Mutex::new(SlotTable {
                slots: Vec::new(),
                free_list: Vec::new(),
                capacity,
            })),
        }
    }

    /// Stores `view` in the most recently released slot, or a new one
    ///
    /// # Errors
    /// Returns [`TextureError::Allocation`] when every slot is in use
    pub fn acquire(&self, view: V) -> Result<ViewSlot<V>, TextureError> {
        let mut table = self.table.lock();
        let Some(index) = table.allocate() else {
            return Err(TextureError::allocation("view slot", format!("all {} view slots are in use", table.capacity)));
        };
        table.slots[index as usize] = Some(view);

        Ok(ViewSlot {
            index,
            table: self.table.clone(),
        })
    }

    /// Runs `f` with the view stored in slot `index`, if any
    pub fn with_view<R>(&self, index: u32, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.table.lock().slots.get(index as usize).and_then(Option::as_ref).map(f)
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.table.lock().occupied()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.table.lock().capacity
    }
}

/// Owning handle to one occupied view slot
#[derive(Debug)]
pub struct ViewSlot<V> {
    index: u32,
    table: Arc<Mutex<SlotTable<V>>>,
}

impl<V> ViewSlot<V> {
    /// Slot index, stable for the lifetime of the handle
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Runs `f` with the view held in this slot
    pub fn with_view<R>(&self, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.table.lock().slots.get(self.index as usize).and_then(Option::as_ref).map(f)
    }
}

impl<V> Drop for ViewSlot<V> {
    fn drop(&mut self) {
        let view = self.table.lock().free(self.index);
        // The view may release device state of its own; do that outside the table lock
        drop(view);
    }
}
