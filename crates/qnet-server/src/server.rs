// server.rs — connection slot arena.
//
// Connections are addressed by a generational handle (slot index plus
// generation counter) so a handle kept across a disconnect can never
// silently alias whichever peer reuses the slot.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    index: u32,
    generation: u32,
}

impl SlotHandle {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Fixed-capacity arena; capacity is the server's max client count.
#[derive(Debug)]
pub struct SlotArena<T> {
    slots: Vec<Slot<T>>,
}

impl<T> SlotArena<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot {
            generation: 0,
            value: None,
        });
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(|s| s.value.is_some())
    }

    /// Insert into the first free slot. None when the arena is full.
    pub fn insert(&mut self, value: T) -> Option<SlotHandle> {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.is_none() {
                slot.generation += 1;
                slot.value = Some(value);
                return Some(SlotHandle {
                    index: i as u32,
                    generation: slot.generation,
                });
            }
        }
        None
    }

    pub fn get(&self, handle: SlotHandle) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: SlotHandle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    pub fn remove(&mut self, handle: SlotHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.take()
    }

    /// Handles of every occupied slot, in slot order.
    pub fn handles(&self) -> Vec<SlotHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.value.is_some())
            .map(|(i, s)| SlotHandle {
                index: i as u32,
                generation: s.generation,
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.value.as_ref().map(|v| {
                (
                    SlotHandle {
                        index: i as u32,
                        generation: s.generation,
                    },
                    v,
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_until_full() {
        let mut arena = SlotArena::with_capacity(2);
        let a = arena.insert("a").unwrap();
        let b = arena.insert("b").unwrap();
        assert!(arena.is_full());
        assert!(arena.insert("c").is_none());
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.get(b), Some(&"b"));
    }

    #[test]
    fn stale_handle_is_detectable_after_reuse() {
        let mut arena = SlotArena::with_capacity(1);
        let old = arena.insert("first").unwrap();
        assert_eq!(arena.remove(old), Some("first"));

        let new = arena.insert("second").unwrap();
        assert_eq!(old.index(), new.index());
        // the stale handle must not alias the new occupant
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.remove(old), None);
        assert_eq!(arena.get(new), Some(&"second"));
    }

    #[test]
    fn handles_track_occupancy() {
        let mut arena = SlotArena::with_capacity(3);
        let a = arena.insert(1).unwrap();
        let b = arena.insert(2).unwrap();
        arena.remove(a);
        assert_eq!(arena.handles(), vec![b]);
        assert_eq!(arena.len(), 1);
    }
}
