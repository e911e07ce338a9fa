use std::fmt;

/// A simple slab allocator.
///
/// A `Slab` stores values of type `T` in a contiguous array and returns
/// indices that can be reused after removal.
///
/// Freed indices are reused last-in first-out, so an index that was just
/// removed is the next one handed out.
///
/// Free slots hold `None`, so a stale index never reads another value: it
/// either finds nothing or the value that reused the slot.
///
/// # Examples
///
/// ```rust,ignore
/// let mut slab = Slab::new(4);
/// let index = slab.insert("timer");
/// assert_eq!(slab.remove(index), Some("timer"));
/// ```
pub(crate) struct Slab<T> {
    /// Storage for items, `None` for free slots.
    items: Vec<Option<T>>,
    /// Stack of free indices that can be reused.
    free: Vec<usize>,
}

impl<T> Slab<T> {
    /// Creates a new `Slab` with room for `size` items.
    ///
    /// # Arguments
    ///
    /// * `size` - Number of items to reserve room for. The slab grows past it.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let slab = Slab::<u32>::new(16);
    /// assert_eq!(slab.len(), 0);
    /// ```
    pub(crate) fn new(size: usize) -> Self {
        Self {
            items: Vec::with_capacity(size),
            free: Vec::new(),
        }
    }

    /// Inserts a value into the slab and returns its index.
    ///
    /// If a free slot is available, it is reused. Otherwise, the slab grows.
    ///
    /// # Returns
    ///
    /// The index at which the value was inserted.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let mut slab = Slab::new(1);
    /// let index = slab.insert(42);
    /// ```
    pub(crate) fn insert(&mut self, item: T) -> usize {
        match self.free.pop() {
            Some(index) => {
                self.items[index] = Some(item);
                index
            }
            None => {
                self.items.push(Some(item));
                self.items.len() - 1
            }
        }
    }

    /// Removes and returns the value stored at `index`, if any.
    ///
    /// Removing a free or out-of-range index returns `None` and changes
    /// nothing.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let mut slab = Slab::new(1);
    /// let index = slab.insert(42);
    /// assert_eq!(slab.remove(index), Some(42));
    /// assert_eq!(slab.remove(index), None);
    /// ```
    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        let item = self.items.get_mut(index)?.take()?;
        self.free.push(index);
        Some(item)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)?.as_mut()
    }

    /// Iterates over occupied slots in index order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| item.as_ref().map(|item| (index, item)))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.items
            .iter_mut()
            .enumerate()
            .filter_map(|(index, item)| item.as_mut().map(|item| (index, item)))
    }

    /// Number of occupied slots.
    pub(crate) fn len(&self) -> usize {
        self.items.len() - self.free.len()
    }
}

impl<T: fmt::Debug> fmt::Debug for Slab<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Slab;

    #[test]
    fn removed_index_is_reused() {
        let mut slab = Slab::new(4);
        let a = slab.insert("a");
        let b = slab.insert("b");

        assert_eq!(slab.remove(a), Some("a"));
        assert_eq!(slab.insert("c"), a);
        assert_eq!(slab.get_mut(b), Some(&mut "b"));
        assert_eq!(slab.len(), 2);
    }

    #[test]
    fn double_remove_returns_none() {
        let mut slab = Slab::new(1);
        let index = slab.insert(10);

        assert_eq!(slab.remove(index), Some(10));
        assert_eq!(slab.remove(index), None);
        assert_eq!(slab.remove(42), None);
        assert_eq!(slab.len(), 0);
    }

    #[test]
    fn iter_skips_free_slots() {
        let mut slab = Slab::new(0);
        for value in 0..4 {
            slab.insert(value);
        }
        slab.remove(1);
        slab.remove(2);

        let seen: Vec<_> = slab.iter().map(|(index, value)| (index, *value)).collect();
        assert_eq!(seen, vec![(0, 0), (3, 3)]);
    }
}
