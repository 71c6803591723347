use minalloc::{BlockAllocator, LinearAllocator};

use std::alloc::Layout;
use std::ptr::NonNull;
use tracing::info;

type Link<T> = Option<NonNull<Node<T>>>;

struct Node<T> {
    prev: Link<T>,
    next: Link<T>,
    val: T,
}

struct LinkedListIter<'a, T> {
    next: Link<T>,
    _list: &'a LinkedList<T>,
}

impl<'a, T> Iterator for LinkedListIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        self.next.map(|node| {
            // nodes stay live for as long as the list is borrowed
            let node = unsafe { &*node.as_ptr() };
            self.next = node.next;

            &node.val
        })
    }
}

/// A doubly linked list whose nodes live in a block pool, so pushing and
/// popping never touches the global allocator once the pool has warmed up.
struct LinkedList<T> {
    nodes: BlockAllocator<Node<T>, 64>,
    start: Link<T>,
    end: Link<T>,
    len: usize,
}

impl<T> LinkedList<T> {
    fn new() -> Self {
        Self {
            nodes: BlockAllocator::new(),
            start: None,
            end: None,
            len: 0,
        }
    }

    fn iter(&self) -> LinkedListIter<'_, T> {
        LinkedListIter {
            next: self.start,
            _list: self,
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn push_back(&mut self, val: T) {
        let node = self.nodes.allocate(Node {
            prev: self.end,
            next: None,
            val,
        });

        match self.end {
            Some(end) => unsafe { (*end.as_ptr()).next = Some(node) },
            None => self.start = Some(node),
        }

        self.end = Some(node);
        self.len += 1;
    }

    fn push_front(&mut self, val: T) {
        let node = self.nodes.allocate(Node {
            prev: None,
            next: self.start,
            val,
        });

        match self.start {
            Some(start) => unsafe { (*start.as_ptr()).prev = Some(node) },
            None => self.end = Some(node),
        }

        self.start = Some(node);
        self.len += 1;
    }

    fn pop_back(&mut self) -> Option<T> {
        let end = self.end?;

        Some(self.unlink(end))
    }

    fn pop_front(&mut self) -> Option<T> {
        let start = self.start?;

        Some(self.unlink(start))
    }

    fn delete(&mut self, index: usize) -> Option<T> {
        let node = self.node_at(index)?;

        Some(self.unlink(node))
    }

    fn swap(&mut self, index: usize, val: T) -> Option<T> {
        let node = self.node_at(index)?;
        let slot = unsafe { &mut (*node.as_ptr()).val };

        Some(std::mem::replace(slot, val))
    }

    fn at(&self, index: usize) -> Option<&T> {
        self.iter().nth(index)
    }

    fn node_at(&self, index: usize) -> Link<T> {
        let mut node = self.start;

        for _ in 0..index {
            node = unsafe { (*node?.as_ptr()).next };
        }

        node
    }

    fn unlink(&mut self, node: NonNull<Node<T>>) -> T {
        // SAFETY: every linked node is live in `self.nodes`
        let Node { prev, next, val } = unsafe { self.nodes.take(node) };

        match prev {
            Some(prev) => unsafe { (*prev.as_ptr()).next = next },
            None => self.start = next,
        }

        match next {
            Some(next) => unsafe { (*next.as_ptr()).prev = prev },
            None => self.end = prev,
        }

        self.len -= 1;
        val
    }
}

/// Sums the list through a scratch copy carved from a frame arena.
fn frame_sum(list: &LinkedList<u64>, frame: &mut LinearAllocator<'_>) -> Option<u64> {
    let mark = frame.mark();
    let layout = Layout::array::<u64>(list.len()).ok()?;
    let scratch = frame.allocate_layout(layout)?.cast::<u64>();

    for (i, val) in list.iter().enumerate() {
        unsafe { scratch.as_ptr().add(i).write(*val) };
    }

    let values = unsafe { std::slice::from_raw_parts(scratch.as_ptr(), list.len()) };
    let sum = values.iter().sum();

    frame.rewind(mark);
    Some(sum)
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .init();

    let mut scratch = vec![0u8; 1024 * 16];
    let mut frame = LinearAllocator::from_buffer(&mut scratch);
    let mut list = LinkedList::new();

    for round in 0..5u64 {
        for i in 0..200 {
            list.push_back(round * 1000 + i);
        }

        for _ in 0..150 {
            list.pop_front();
        }

        info!(
            round,
            len = list.len(),
            sum = ?frame_sum(&list, &mut frame),
            pool = ?list.nodes.metrics(),
            "frame done"
        );

        frame.reset();
    }
}

// TESTS BELOW
