//! Bounded-concurrency fan-out
//!
//! A pool of `min(n, len)` scoped workers pulls items off a shared monotonic
//! cursor, which caps both thread count and peak memory compared to spawning
//! one task per item behind a semaphore.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

/// Map items to results with at most `concurrency` handlers in flight.
///
/// Dispatch order is sequential; completion order is not. `results[i]` is
/// always `handler(&items[i], i)`. The first handler error stops further
/// dispatch (in-flight handlers run to completion) and fails the whole call.
pub fn map_with_concurrency<T, R, E, F>(
    items: &[T],
    concurrency: usize,
    handler: F,
) -> Result<Vec<R>, E>
where
    T: Sync,
    R: Send,
    E: Send,
    F: Fn(&T, usize) -> Result<R, E> + Sync,
{
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let cursor = AtomicUsize::new(0);
    let failed = AtomicBool::new(false);
    let results: Mutex<Vec<Option<R>>> = Mutex::new((0..items.len()).map(|_| None).collect());
    let first_error: Mutex<Option<E>> = Mutex::new(None);

    let worker_count = concurrency.max(1).min(items.len());

    thread::scope(|scope| {
        for _ in 0..worker_count {
            scope.spawn(|| loop {
                if failed.load(Ordering::SeqCst) {
                    return;
                }
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                if index >= items.len() {
                    return;
                }
                match handler(&items[index], index) {
                    Ok(result) => {
                        results.lock().unwrap()[index] = Some(result);
                    }
                    Err(e) => {
                        failed.store(true, Ordering::SeqCst);
                        let mut slot = first_error.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                        return;
                    }
                }
            });
        }
    });

    if let Some(e) = first_error.into_inner().unwrap() {
        return Err(e);
    }

    // Every slot was filled: no worker failed, and the cursor visited every index.
    Ok(results
        .into_inner()
        .unwrap()
        .into_iter()
        .map(|slot| slot.expect("worker published every result"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_results_align_with_input_order() {
        // Later items finish first; output order must still match input order.
        let items: Vec<u64> = (0..10).collect();
        let results: Vec<u64> = map_with_concurrency(&items, 3, |item, _index| {
            thread::sleep(Duration::from_millis((10 - item) * 10));
            Ok::<u64, ()>(*item)
        })
        .unwrap();
        assert_eq!(results, (0..10).collect::<Vec<u64>>());
    }

    #[test]
    fn test_index_matches_item_position() {
        let items = vec!["a", "b", "c", "d"];
        let results: Vec<String> =
            map_with_concurrency(&items, 2, |item, index| Ok::<String, ()>(format!("{index}:{item}")))
                .unwrap();
        assert_eq!(results, ["0:a", "1:b", "2:c", "3:d"]);
    }

    #[test]
    fn test_empty_input_spawns_nothing() {
        let items: Vec<u32> = Vec::new();
        let results = map_with_concurrency(&items, 4, |item, _| Ok::<u32, ()>(*item)).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_concurrency_is_bounded() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let items: Vec<u32> = (0..20).collect();

        map_with_concurrency(&items, 3, |_, _| {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok::<(), ()>(())
        })
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_first_error_fails_the_call() {
        let items: Vec<u32> = (0..10).collect();
        let ran = AtomicUsize::new(0);

        let result = map_with_concurrency(&items, 1, |item, _| {
            ran.fetch_add(1, Ordering::SeqCst);
            if *item == 3 {
                Err(format!("item {} failed", item))
            } else {
                Ok(*item)
            }
        });

        assert_eq!(result.unwrap_err(), "item 3 failed");
        // Serial dispatch stops once the failure is recorded.
        assert_eq!(ran.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_single_worker_for_single_item() {
        let items = vec![41];
        let results = map_with_concurrency(&items, 8, |item, _| Ok::<u32, ()>(item + 1)).unwrap();
        assert_eq!(results, [42]);
    }
}
