use std::ops::Range;

/// Exact record of which pages one instance has locked.
///
/// This is a local misuse detector, not part of the cross-process protocol: it panics on
/// double-lock and on unlocking pages that are not locked. A disabled set accepts every
/// call and records nothing.
///
/// Invariants (when enabled):
/// - Ranges are stored in ascending order.
/// - No ranges overlap or touch (adjacent ranges are merged).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PageLockSet {
    ranges: Option<Vec<Range<usize>>>,
}

impl PageLockSet {
    pub fn new(enabled: bool) -> Self {
        Self {
            ranges: enabled.then(Vec::new),
        }
    }

    pub fn disabled() -> Self {
        Self { ranges: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.ranges.is_some()
    }

    /// Number of locked pages, or `None` if tracking is disabled.
    pub fn page_count(&self) -> Option<usize> {
        self.ranges
            .as_ref()
            .map(|ranges| ranges.iter().map(|r| r.len()).sum())
    }

    pub fn contains(&self, page: usize) -> bool {
        self.ranges
            .as_ref()
            .is_some_and(|ranges| ranges.iter().any(|r| r.contains(&page)))
    }

    /// Records `pages` as locked.
    ///
    /// # Panics
    ///
    /// Panics if any page in `pages` is already locked.
    pub fn lock(&mut self, pages: Range<usize>) {
        let Some(ranges) = self.ranges.as_mut() else {
            return;
        };
        if pages.is_empty() {
            return;
        }
        if let Some(held) = ranges
            .iter()
            .find(|r| r.start < pages.end && pages.start < r.end)
        {
            panic!("pages {pages:?} overlap already locked pages {held:?}");
        }

        let mut new = pages;
        let mut out = Vec::with_capacity(ranges.len() + 1);
        let mut inserted = false;
        for r in ranges.drain(..) {
            if r.end < new.start {
                out.push(r);
            } else if new.end < r.start {
                if !inserted {
                    out.push(new.clone());
                    inserted = true;
                }
                out.push(r);
            } else {
                // Adjacent.
                new = new.start.min(r.start)..new.end.max(r.end);
            }
        }
        if !inserted {
            out.push(new);
        }
        *ranges = out;
    }

    /// Records `pages` as unlocked.
    ///
    /// # Panics
    ///
    /// Panics unless every page in `pages` is currently locked.
    pub fn unlock(&mut self, pages: Range<usize>) {
        let Some(ranges) = self.ranges.as_mut() else {
            return;
        };
        if pages.is_empty() {
            return;
        }
        if !ranges
            .iter()
            .any(|r| r.start <= pages.start && pages.end <= r.end)
        {
            panic!("pages {pages:?} are not locked");
        }

        let mut out = Vec::with_capacity(ranges.len() + 1);
        for r in ranges.drain(..) {
            if r.end <= pages.start || r.start >= pages.end {
                out.push(r);
                continue;
            }
            if r.start < pages.start {
                out.push(r.start..pages.start);
            }
            if r.end > pages.end {
                out.push(pages.end..r.end);
            }
        }
        *ranges = out;
    }

    pub fn clear(&mut self) {
        if let Some(ranges) = self.ranges.as_mut() {
            ranges.clear();
        }
    }
}
