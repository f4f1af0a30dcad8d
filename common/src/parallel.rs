//! Bounded parallel reads.
//!
//! Block readers hold whole windows in memory, so the number of windows in
//! flight is capped rather than left to rayon's work stealing.

use rayon::prelude::*;

/// Runs `f` over `items` in parallel, at most `max_in_flight` at a time,
/// and hands each finished chunk of results to `sink` in input order before
/// starting the next chunk.
///
/// Lets a single consumer fold results as they arrive while the producers
/// stay bounded. Stops at the first chunk containing an error.
///
/// # Panics
///
/// Panics if `max_in_flight` is 0.
pub fn try_par_for_each_chunk<T, R, E, F, S>(
    items: &[T],
    max_in_flight: usize,
    f: F,
    mut sink: S,
) -> Result<(), E>
where
    T: Sync,
    R: Send,
    E: Send,
    F: Fn(&T) -> Result<R, E> + Sync,
    S: FnMut(Vec<R>) -> Result<(), E>,
{
    assert!(max_in_flight > 0, "max_in_flight must be > 0");

    for chunk in items.chunks(max_in_flight) {
        let results: Result<Vec<R>, E> = chunk.par_iter().map(&f).collect();
        sink(results?)?;
    }
    Ok(())
}
