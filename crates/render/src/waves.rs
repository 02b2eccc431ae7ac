//! Fixed-width concurrent waves.
//!
//! Runs at most `width` futures at once: a wave is started, awaited in
//! full, then the next wave starts. Results keep input order.

use std::future::Future;

use futures::future::join_all;

pub async fn run_in_waves<T, R, F, Fut>(items: Vec<T>, width: usize, mut f: F) -> Vec<R>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R>,
{
    let width = width.max(1);
    let mut results = Vec::with_capacity(items.len());
    let mut items = items.into_iter().peekable();

    while items.peek().is_some() {
        let wave: Vec<Fut> = items.by_ref().take(width).map(&mut f).collect();
        results.extend(join_all(wave).await);
    }
    results
}

/// Number of waves `len` items need at `width`.
pub fn wave_count(len: usize, width: usize) -> usize {
    len.div_ceil(width.max(1))
}
