//! Fan-out helpers over the shared compute task pool.
//!
//! Work is chunked over `ComputeTaskPool`, which steals work between threads. Results
//! always come back in input order, so nothing downstream depends on thread timing.

use std::ops::Range;

use bevy::tasks::{ComputeTaskPool, ParallelSlice, ParallelSliceMut, TaskPool};

/// Chunks per thread; clusters vary in size by orders of magnitude
const CHUNKS_PER_THREAD: usize = 4;

pub fn pool() -> &'static TaskPool {
    ComputeTaskPool::get_or_init(TaskPool::default)
}

fn chunk_size(len: usize) -> usize {
    let chunks = pool().thread_num().max(1) * CHUNKS_PER_THREAD;
    len.div_ceil(chunks).max(1)
}

/// Map `f(index, item)` over `items` in parallel, preserving order
pub fn par_map<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send + 'static,
    F: Fn(usize, &T) -> R + Send + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }
    let size = chunk_size(items.len());
    items
        .par_chunk_map(pool(), size, |chunk_index, chunk| {
            let offset = chunk_index * size;
            chunk
                .iter()
                .enumerate()
                .map(|(i, item)| f(offset + i, item))
                .collect::<Vec<_>>()
        })
        .into_iter()
        .flatten()
        .collect()
}

/// Map `f(index, item)` over mutable items in parallel, preserving order
pub fn par_map_mut<T, R, F>(mut items: &mut [T], f: F) -> Vec<R>
where
    T: Send,
    R: Send + 'static,
    F: Fn(usize, &mut T) -> R + Send + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }
    let size = chunk_size(items.len());
    items
        .par_chunk_map_mut(pool(), size, |chunk_index, chunk| {
            let offset = chunk_index * size;
            chunk
                .iter_mut()
                .enumerate()
                .map(|(i, item)| f(offset + i, item))
                .collect::<Vec<_>>()
        })
        .into_iter()
        .flatten()
        .collect()
}

/// Run `f(index, item)` on every item in parallel
pub fn par_for_each_mut<T, F>(items: &mut [T], f: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Send + Sync,
{
    par_map_mut(items, f);
}

/// Split `slice` into the given ascending, non-overlapping ranges
pub fn split_disjoint_mut<'a, T>(mut slice: &'a mut [T], ranges: &[Range<usize>]) -> Vec<&'a mut [T]> {
    let mut consumed = 0;
    let mut parts = Vec::with_capacity(ranges.len());
    for range in ranges {
        debug_assert!(range.start >= consumed && range.end >= range.start);
        let rest = std::mem::take(&mut slice);
        let (_, rest) = rest.split_at_mut(range.start - consumed);
        let (part, rest) = rest.split_at_mut(range.len());
        parts.push(part);
        slice = rest;
        consumed = range.end;
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_par_map_preserves_order() {
        let items: Vec<usize> = (0..1000).collect();
        let out = par_map(&items, |i, &x| (i, x * 2));
        for (k, (i, doubled)) in out.into_iter().enumerate() {
            assert_eq!(i, k);
            assert_eq!(doubled, 2 * k);
        }
    }

    #[test]
    fn test_par_for_each_mut_visits_every_item() {
        let mut items = vec![0usize; 257];
        par_for_each_mut(&mut items, |i, x| *x = i + 1);
        assert!(items.iter().enumerate().all(|(i, &x)| x == i + 1));
    }

    #[test]
    fn test_par_map_mut_returns_in_order() {
        let mut items: Vec<usize> = (0..100).collect();
        let out = par_map_mut(&mut items, |i, x| {
            *x += 1;
            i
        });
        assert_eq!(out, (0..100).collect::<Vec<_>>());
        assert_eq!(items[99], 100);
    }

    #[test]
    fn test_split_disjoint_mut() {
        let mut data: Vec<i32> = (0..10).collect();
        let parts = split_disjoint_mut(&mut data, &[1..3, 3..3, 5..9]);
        assert_eq!(parts.len(), 3);
        assert_eq!(&*parts[0], &[1, 2]);
        assert!(parts[1].is_empty());
        assert_eq!(&*parts[2], &[5, 6, 7, 8]);
    }
}
