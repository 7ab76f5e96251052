//! Incremental parse caches.
//!
//! Each adapter owns two of these: one for session metadata, one for
//! message lists. A cache entry remembers the `(size, mtime)` stamp it was
//! built from and the byte offset it consumed, so an appended-to file costs
//! one tail parse instead of a full re-read. [`refresh`] is the single
//! place that decides between serving, resuming, and re-parsing.

mod store;

use std::path::Path;

pub use store::{CacheLookup, SessionCache, ValidationStamp};

use crate::sources::SourceError;

/// Serve `path` from `cache`, resuming or re-parsing as needed.
///
/// `full` parses the whole file; `incremental` extends a copy of the cached
/// value from a byte offset. Both return the value plus the offset consumed.
/// Any incremental failure falls back to a full parse; parse I/O always
/// happens with no cache lock held.
///
/// # Errors
///
/// Returns an error only when the full parse itself fails.
pub fn refresh<T, F, I>(
    cache: &SessionCache<T>,
    path: &Path,
    stamp: ValidationStamp,
    full: F,
    incremental: I,
) -> Result<T, SourceError>
where
    T: Clone,
    F: FnOnce(&Path) -> Result<(T, u64), SourceError>,
    I: FnOnce(&Path, T, u64) -> Result<(T, u64), SourceError>,
{
    match cache.lookup(path, stamp) {
        CacheLookup::Hit(value) => Ok(value),
        CacheLookup::Resumable { value, offset } => match incremental(path, value, offset) {
            Ok((value, new_offset)) => {
                cache.insert(path, value.clone(), stamp, new_offset);
                Ok(value)
            }
            Err(e) => {
                tracing::debug!(
                    path = %path.display(),
                    error = %e,
                    "Incremental parse failed, falling back to full parse"
                );
                reparse(cache, path, stamp, full)
            }
        },
        CacheLookup::Missing => reparse(cache, path, stamp, full),
    }
}

fn reparse<T, F>(
    cache: &SessionCache<T>,
    path: &Path,
    stamp: ValidationStamp,
    full: F,
) -> Result<T, SourceError>
where
    T: Clone,
    F: FnOnce(&Path) -> Result<(T, u64), SourceError>,
{
    let (value, offset) = full(path)?;
    cache.insert(path, value.clone(), stamp, offset);
    Ok(value)
}
