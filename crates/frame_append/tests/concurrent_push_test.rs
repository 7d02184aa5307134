//! Integration test for concurrent producers.

#![allow(unsafe_code)]

use frame_append::{AppendBuffer, AppendConfig};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_8_threads_10k_pushes_unique_indices() {
    let num_threads = 8;
    let pushes_per_thread = 10_000;
    let total = num_threads * pushes_per_thread;

    // Tiny primary buffer: almost everything lands in overflow pages.
    let buffer: Arc<AppendBuffer<u64>> = Arc::new(AppendBuffer::with_capacity(16));
    let barrier = Arc::new(Barrier::new(num_threads));
    let (tx, rx) = crossbeam_channel::unbounded::<Vec<usize>>();

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let buffer = Arc::clone(&buffer);
            let barrier = Arc::clone(&barrier);
            let tx = tx.clone();

            thread::spawn(move || {
                barrier.wait();
                let indices: Vec<usize> = (0..pushes_per_thread)
                    .map(|_| buffer.push_new().0)
                    .collect();
                tx.send(indices).unwrap();
            })
        })
        .collect();
    drop(tx);

    for h in handles {
        h.join().unwrap();
    }

    let mut all: Vec<usize> = rx.iter().flatten().collect();
    all.sort_unstable();

    let mut buffer = Arc::try_unwrap(buffer).unwrap();
    assert!(buffer.page_count() > 0);
    buffer.coalesce();

    assert_eq!(buffer.len(), total);
    assert_eq!(buffer.page_count(), 0);
    assert_eq!(all, (0..total).collect::<Vec<_>>());
}

#[test]
fn test_concurrent_values_land_at_their_index() {
    let num_threads = 8;
    let pushes_per_thread = 5_000u64;

    let config = AppendConfig {
        initial_capacity: 100,
        page_bytes: 512,
    };
    let buffer: Arc<AppendBuffer<u64>> = Arc::new(AppendBuffer::from_config(&config).unwrap());

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                (0..pushes_per_thread)
                    .map(|i| {
                        let value = t * 1_000_000 + i;
                        (buffer.push(value), value)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let pushed: Vec<(usize, u64)> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    let mut buffer = Arc::try_unwrap(buffer).unwrap();

    // Readable through the page walk before coalescing...
    {
        let view = buffer.view();
        for &(index, value) in &pushed {
            assert_eq!(view[index], value);
        }
    }

    // ...and from the contiguous slice afterwards.
    let slice = buffer.as_slice();
    assert_eq!(slice.len(), pushed.len());
    for &(index, value) in &pushed {
        assert_eq!(slice[index], value);
    }
}

#[test]
fn test_push_with_from_scoped_threads() {
    let mut buffer: AppendBuffer<[u32; 2]> = AppendBuffer::with_capacity(8);

    thread::scope(|s| {
        for t in 0..4u32 {
            let buffer = &buffer;
            s.spawn(move || {
                for i in 0..1_000u32 {
                    buffer.push_with(|slot| *slot = [t, i]);
                }
            });
        }
    });

    assert_eq!(buffer.len(), 4_000);

    let mut per_thread = [0usize; 4];
    for item in buffer.as_slice() {
        per_thread[item[0] as usize] += 1;
    }
    assert_eq!(per_thread, [1_000; 4]);
}

#[test]
fn test_readers_see_published_elements_while_producing() {
    let buffer: Arc<AppendBuffer<u64>> = Arc::new(AppendBuffer::with_capacity(4));
    let (tx, rx) = crossbeam_channel::unbounded::<(usize, u64)>();

    let producers: Vec<_> = (0..4u64)
        .map(|t| {
            let buffer = Arc::clone(&buffer);
            let tx = tx.clone();
            thread::spawn(move || {
                for i in 0..2_000u64 {
                    let value = (t << 32) | i;
                    let index = buffer.push(value);
                    // The channel send/recv pair orders the write before the read.
                    tx.send((index, value)).unwrap();
                }
            })
        })
        .collect();
    drop(tx);

    let consumer = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || {
            let mut seen = 0usize;
            for (index, value) in rx {
                // SAFETY: the producer finished writing before sending, and
                // nobody writes a slot twice.
                let read = unsafe { *buffer.get_unchecked(index) };
                assert_eq!(read, value);
                seen += 1;
            }
            seen
        })
    };

    for p in producers {
        p.join().unwrap();
    }
    assert_eq!(consumer.join().unwrap(), 8_000);
    assert_eq!(buffer.len(), 8_000);
}

#[test]
fn test_producers_read_back_their_own_index_immediately() {
    let num_threads = 4;
    let pushes_per_thread = 2_000u64;

    for _round in 0..50 {
        // One primary slot: every producer races inside shared pages.
        let buffer: AppendBuffer<u64> = AppendBuffer::with_capacity(1);
        let barrier = Barrier::new(num_threads);

        thread::scope(|s| {
            for t in 0..num_threads as u64 {
                let buffer = &buffer;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    for i in 0..pushes_per_thread {
                        let value = (t << 32) | i;
                        let index = buffer.push(value);
                        // SAFETY: this thread wrote the slot and nobody else
                        // writes it.
                        let read = unsafe { *buffer.get_unchecked(index) };
                        assert_eq!(read, value);
                    }
                });
            }
        });

        assert_eq!(buffer.len(), num_threads * pushes_per_thread as usize);
    }
}

#[test]
fn test_many_frames_reuse_storage() {
    let mut buffer: AppendBuffer<u32> = AppendBuffer::with_capacity(0);

    for frame in 0..5u32 {
        thread::scope(|s| {
            for _ in 0..4 {
                let buffer = &buffer;
                s.spawn(move || {
                    for _ in 0..2_500 {
                        buffer.push(frame);
                    }
                });
            }
        });

        assert_eq!(buffer.len(), 10_000);
        // After the first frame the primary buffer absorbs everything.
        if frame == 0 {
            assert!(buffer.page_count() > 0);
        } else {
            assert_eq!(buffer.page_count(), 0);
        }

        assert!(buffer.as_slice().iter().all(|&v| v == frame));
        buffer.resize(0);
    }

    assert!(buffer.primary_capacity() >= 10_000);
}
