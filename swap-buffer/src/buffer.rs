/// Append-only container for one window's worth of items.
///
/// No internal locking: the [`SwapController`](crate::SwapController) is
/// the only owner and synchronizes all access.
#[derive(Debug)]
pub struct WindowBuffer<T> {
    items: Vec<T>,
}

impl<T> WindowBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Move the contents out, leaving the buffer empty. O(1).
    pub fn take(&mut self) -> Vec<T> {
        std::mem::take(&mut self.items)
    }

    /// Restore a previously taken vector as this buffer's storage,
    /// clearing it first so its capacity is reused across cycles.
    pub fn recycle(&mut self, mut items: Vec<T>) {
        items.clear();
        self.items = items;
    }
}
