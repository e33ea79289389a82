//! Prefix scans with early termination.
//!
//! Backends expose enumeration as a lazy stream of names. [`collect_names`]
//! drains that stream under a [`CallContext`], stops as soon as the limit is
//! reached and drops the stream on every exit path, which releases whatever
//! cursor the backend holds.

use futures::{Stream, TryStreamExt};

use crate::{CallContext, StoreError};

/// Result of a [`KeyStore::list`](crate::KeyStore::list) call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyListing {
    /// Matching names, in the order the backend yielded them.
    pub names: Vec<String>,
    /// The last name in `names`, or an empty string when `names` is empty.
    ///
    /// Callers paginate a prefix scan by deriving the next prefix from this
    /// value. The store does not resume scans on its own.
    pub last_name: String,
}

impl KeyListing {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn push(&mut self, name: String) {
        self.last_name.clone_from(&name);
        self.names.push(name);
    }
}

/// Drain `names` into a [`KeyListing`], taking at most `limit` entries.
///
/// A `limit` of `0` takes everything. Each advance of the stream runs under
/// `ctx`, so a cancelled or expired context aborts the scan mid-way.
pub(crate) async fn collect_names<S>(
    ctx: &CallContext,
    names: S,
    limit: usize,
) -> Result<KeyListing, StoreError>
where
    S: Stream<Item = Result<String, StoreError>> + Send,
{
    let mut names = std::pin::pin!(names);
    let mut listing = KeyListing::default();

    while let Some(name) = ctx.run(names.try_next()).await? {
        listing.push(name);
        if limit > 0 && listing.len() >= limit {
            break;
        }
    }

    Ok(listing)
}
