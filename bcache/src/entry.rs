//! Cache value records and the ordering rule that drives convergence.

use serde::{Deserialize, Serialize};

/// A single cached value together with its expiration and tombstone times.
///
/// Both `expired` and `deleted` are absolute nanoseconds since the Unix
/// epoch. `expired == 0` means "never expires"; `deleted == 0` means "not
/// deleted". `deleted` is a tombstone marker, not a future-effective
/// timestamp: as soon as it is non-zero the record is invisible to readers,
/// while the record itself stays in storage (so the tombstone can keep
/// propagating) until evicted or overwritten. Its numeric value is used only
/// by the ordering rule below, to decide whether an incoming delete is newer
/// than what's currently stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Entry {
    pub value: String,
    #[serde(default)]
    pub expired: i64,
    #[serde(default)]
    pub deleted: i64,
}

impl Entry {
    pub fn new(value: impl Into<String>, expired: i64, deleted: i64) -> Self {
        Self {
            value: value.into(),
            expired,
            deleted,
        }
    }

    /// Whether this entry is visible to a reader at time `now` (nanoseconds).
    /// A tombstoned entry (`deleted != 0`) is invisible immediately, not
    /// just once `now` reaches `deleted` — `deleted`'s numeric value only
    /// feeds the ordering rule below.
    pub fn is_visible(&self, now: i64) -> bool {
        let not_expired = self.expired == 0 || now < self.expired;
        let not_deleted = self.deleted == 0;
        not_expired && not_deleted
    }

    /// The ordering rule from spec: does `incoming` win over `current`
    /// (which may be absent)?
    ///
    /// Accept iff the key is absent, or `incoming.expired` is strictly
    /// greater, or `expired` ties and `incoming.deleted` is strictly
    /// greater. Ties on both fields reject the incoming entry
    /// (first-writer-wins by transport order).
    pub fn accepts(current: Option<&Entry>, incoming: &Entry) -> bool {
        match current {
            None => true,
            Some(cur) => {
                cur.expired < incoming.expired
                    || (cur.expired == incoming.expired && cur.deleted < incoming.deleted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_key_always_accepted() {
        let incoming = Entry::new("v", 10, 0);
        assert!(Entry::accepts(None, &incoming));
    }

    #[test]
    fn higher_expired_wins() {
        let cur = Entry::new("v1", 10, 0);
        let incoming = Entry::new("v2", 20, 0);
        assert!(Entry::accepts(Some(&cur), &incoming));
    }

    #[test]
    fn lower_expired_rejected() {
        let cur = Entry::new("v1", 20, 0);
        let incoming = Entry::new("v2", 10, 0);
        assert!(!Entry::accepts(Some(&cur), &incoming));
    }

    #[test]
    fn tie_on_expired_higher_deleted_wins() {
        let cur = Entry::new("v1", 10, 0);
        let incoming = Entry::new("v1", 10, 500);
        assert!(Entry::accepts(Some(&cur), &incoming));
    }

    #[test]
    fn exact_tie_rejected() {
        let cur = Entry::new("v1", 10, 0);
        let incoming = Entry::new("v2", 10, 0);
        assert!(!Entry::accepts(Some(&cur), &incoming));
    }

    #[test]
    fn visibility_respects_expiry_and_tombstone() {
        let live = Entry::new("v", 0, 0);
        assert!(live.is_visible(1_000));

        let expired = Entry::new("v", 100, 0);
        assert!(!expired.is_visible(200));
        assert!(expired.is_visible(50));

        let tombstoned = Entry::new("v", 0, 100);
        assert!(!tombstoned.is_visible(200));
        assert!(!tombstoned.is_visible(50));
    }
}
