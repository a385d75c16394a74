use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

// Results come back in job-index order regardless of completion order.
pub fn run_indexed<T, F>(workers: usize, jobs: usize, work: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    if jobs == 0 {
        return Vec::new();
    }
    let workers = workers.clamp(1, jobs);
    let cursor = AtomicUsize::new(0);
    let results: Mutex<Vec<(usize, T)>> = Mutex::new(Vec::with_capacity(jobs));
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                if index >= jobs {
                    break;
                }
                let value = work(index);
                results
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .push((index, value));
            });
        }
    });
    let mut indexed = results.into_inner().unwrap_or_else(|p| p.into_inner());
    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, value)| value).collect()
}
