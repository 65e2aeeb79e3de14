use std::sync::{Mutex, PoisonError};

use std_semaphore::Semaphore;

pub const DEFAULT_CAPACITY: usize = 5;

struct RingBuffer<T, const N: usize> {
    buffer: [Option<T>; N],
    producer: usize,
    consumer: usize,
    len: usize,
    high_water: usize,
    taken: u64,
}

impl<T, const N: usize> RingBuffer<T, N> {
    fn new() -> Self {
        Self {
            buffer: std::array::from_fn(|_| None),
            producer: 0,
            consumer: 0,
            len: 0,
            high_water: 0,
            taken: 0,
        }
    }

    // Callers hold a free-slot permit, so the slot at `producer` is empty.
    fn put(&mut self, value: T) {
        debug_assert!(self.len < N);
        self.buffer[self.producer] = Some(value);
        self.producer = (self.producer + 1) % N;
        self.len += 1;
        self.high_water = self.high_water.max(self.len);
    }

    // Callers hold an item permit, so the slot at `consumer` is filled.
    fn get(&mut self) -> Option<(u64, T)> {
        let value = self.buffer[self.consumer].take()?;
        self.consumer = (self.consumer + 1) % N;
        self.len -= 1;
        let ticket = self.taken;
        self.taken += 1;
        Some((ticket, value))
    }
}

/// Fixed-capacity FIFO shared between producer and consumer threads.
///
/// `slots` counts free positions and `items` counts filled ones; `put` parks
/// on `slots` while the queue is full and `get` parks on `items` while it is
/// empty. The ring buffer itself is only touched under the mutex.
pub struct BoundedQueue<T, const N: usize = DEFAULT_CAPACITY> {
    ring: Mutex<RingBuffer<T, N>>,
    slots: Semaphore,
    items: Semaphore,
}

impl<T, const N: usize> Default for BoundedQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> BoundedQueue<T, N> {
    pub fn new() -> Self {
        assert!(N > 0, "a bounded queue needs a capacity of at least one");
        Self {
            ring: Mutex::new(RingBuffer::new()),
            slots: Semaphore::new(N as isize),
            items: Semaphore::new(0),
        }
    }

    /// Blocks while the queue is full, then appends `value` and wakes one
    /// blocked `get`.
    pub fn put(&self, value: T) {
        self.slots.acquire();
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(value);
        self.items.release();
    }

    /// Blocks while the queue is empty, then removes the head and wakes one
    /// blocked `put`.
    pub fn get(&self) -> T {
        self.get_ticketed().1
    }

    /// Like `get`, but also returns the removal ticket: 0 for the first item
    /// ever taken, then 1, 2, ... The ticket is assigned under the ring lock,
    /// so tickets order removals the same way the queue did.
    pub fn get_ticketed(&self) -> (u64, T) {
        loop {
            self.items.acquire();
            let value = self
                .ring
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get();
            match value {
                Some(value) => {
                    self.slots.release();
                    return value;
                }
                // unreachable while the permit counts match the ring; hand the
                // permit back rather than lose it
                None => self.items.release(),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner).len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Largest length the queue ever reached.
    pub fn high_water(&self) -> usize {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .high_water
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn test_fifo_single_thread() {
        let queue = BoundedQueue::<i32, 5>::new();
        for i in 0..5 {
            queue.put(i);
        }
        assert_eq!(queue.len(), 5);
        for i in 0..5 {
            assert_eq!(queue.get(), i);
        }
        assert!(queue.is_empty());
        assert_eq!(queue.high_water(), 5);
    }

    #[test]
    fn test_wraps_around() {
        let queue = BoundedQueue::<usize, 3>::new();
        for round in 0..10 {
            queue.put(round * 2);
            queue.put(round * 2 + 1);
            assert_eq!(queue.get(), round * 2);
            assert_eq!(queue.get(), round * 2 + 1);
        }
        assert_eq!(queue.high_water(), 2);
    }

    #[test]
    fn test_put_blocks_when_full() {
        let queue = Arc::new(BoundedQueue::<i32, 2>::new());
        queue.put(1);
        queue.put(2);

        let inserted = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = queue.clone();
            let inserted = inserted.clone();
            thread::spawn(move || {
                queue.put(3);
                inserted.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!inserted.load(Ordering::SeqCst));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get(), 1);
        producer.join().unwrap();
        assert!(inserted.load(Ordering::SeqCst));
        assert_eq!(queue.get(), 2);
        assert_eq!(queue.get(), 3);
    }

    #[test]
    fn test_get_blocks_when_empty() {
        let queue = Arc::new(BoundedQueue::<i32>::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.get())
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!consumer.is_finished());

        queue.put(42);
        assert_eq!(consumer.join().unwrap(), 42);
    }

    #[test]
    fn test_bounded_queue() {
        let shared_queue = Arc::new(BoundedQueue::<(usize, usize)>::new());
        let loops = 100;

        let producers: Vec<_> = (0..2)
            .map(|producer| {
                let queue = shared_queue.clone();
                thread::spawn(move || {
                    for i in 0..loops {
                        queue.put((producer, i));
                    }
                })
            })
            .collect();
        let consumer = {
            let queue = shared_queue.clone();
            thread::spawn(move || {
                let mut next = [0usize; 2];
                for _ in 0..loops * 2 {
                    let (producer, i) = queue.get();
                    assert_eq!(i, next[producer], "producer {producer} out of order");
                    next[producer] += 1;
                    assert!(queue.len() <= queue.capacity());
                }
                next
            })
        };

        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(consumer.join().unwrap(), [loops, loops]);
        assert!(shared_queue.is_empty());
        assert!(shared_queue.high_water() <= DEFAULT_CAPACITY);
    }

    #[test]
    fn test_many_consumers_each_item_once() {
        let queue = BoundedQueue::<usize>::new();
        let total = 400;
        let consumers = 4;

        let mut seen: Vec<usize> = thread::scope(|s| {
            let handles: Vec<_> = (0..consumers)
                .map(|_| {
                    s.spawn(|| {
                        (0..total / consumers)
                            .map(|_| queue.get())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            for i in 0..total {
                queue.put(i);
            }
            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect()
        });

        seen.sort_unstable();
        assert_eq!(seen, (0..total).collect::<Vec<_>>());
        assert!(queue.high_water() <= queue.capacity());
    }

    #[test]
    fn test_tickets_follow_removal_order() {
        let queue = BoundedQueue::<char, 2>::new();
        queue.put('a');
        queue.put('b');
        assert_eq!(queue.get_ticketed(), (0, 'a'));
        queue.put('c');
        assert_eq!(queue.get(), 'b');
        assert_eq!(queue.get_ticketed(), (2, 'c'));
    }

    #[test]
    fn test_tickets_unique_across_consumers() {
        let queue = BoundedQueue::<usize>::new();
        let total = 200;

        let mut taken: Vec<(u64, usize)> = thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| (0..total / 4).map(|_| queue.get_ticketed()).collect::<Vec<_>>()))
                .collect();
            for i in 0..total {
                queue.put(i);
            }
            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect()
        });

        // single producer, so sorting by ticket must give back the put order
        taken.sort_unstable_by_key(|(ticket, _)| *ticket);
        let tickets: Vec<_> = taken.iter().map(|(ticket, _)| *ticket).collect();
        let values: Vec<_> = taken.iter().map(|(_, value)| *value).collect();
        assert_eq!(tickets, (0..total as u64).collect::<Vec<_>>());
        assert_eq!(values, (0..total).collect::<Vec<_>>());
    }
}
