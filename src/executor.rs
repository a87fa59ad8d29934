use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Run `worker` over `items` with at most `limit` operations in flight,
/// returning outputs in input order regardless of completion order.
///
/// `min(limit, items.len())` workers each repeatedly claim the next
/// unclaimed index from a shared counter until none remain. Used to cap
/// read/funding fan-out against a shared endpoint; the main tester fan-out
/// deliberately does not go through here.
pub async fn bounded_map<T, R, F, Fut>(items: Vec<T>, limit: usize, worker: F) -> Vec<R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(usize, T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = R> + Send,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let items = Arc::new(items);
    let next = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(usize, R)>();

    let workers = limit.max(1).min(total);
    for _ in 0..workers {
        let items = items.clone();
        let next = next.clone();
        let worker = worker.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                let idx = next.fetch_add(1, Ordering::SeqCst);
                if idx >= items.len() {
                    break;
                }
                let out = worker(idx, items[idx].clone()).await;
                if tx.send((idx, out)).is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    let mut slots: Vec<Option<R>> = Vec::with_capacity(total);
    slots.resize_with(total, || None);
    while let Some((idx, out)) = rx.recv().await {
        slots[idx] = Some(out);
    }

    slots
        .into_iter()
        .map(|s| s.expect("worker task dropped a claimed index"))
        .collect()
}
