use std::collections::BTreeMap;

use crate::requests::Request;

/// Items and requests produced by a depth bounded crawl, grouped by the
/// depth of the response they were produced from.
///
/// Depths are 1-based; the seed response is level 1. A level is recorded as
/// soon as anything is added for it, even if the added list is empty.
#[derive(Debug)]
pub struct DepthLedger<I> {
    items: BTreeMap<usize, Vec<I>>,
    requests: BTreeMap<usize, Vec<Request>>,
}

impl<I> Default for DepthLedger<I> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            requests: BTreeMap::new(),
        }
    }
}

impl<I> DepthLedger<I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_items(&mut self, depth: usize, items: impl IntoIterator<Item = I>) {
        self.items.entry(depth).or_default().extend(items);
    }

    pub fn add_requests(&mut self, depth: usize, requests: impl IntoIterator<Item = Request>) {
        self.requests.entry(depth).or_default().extend(requests);
    }

    /// The deepest level anything was recorded for, 0 for an empty ledger
    pub fn max_depth(&self) -> usize {
        let items = self.items.keys().next_back().copied().unwrap_or(0);
        let requests = self.requests.keys().next_back().copied().unwrap_or(0);
        items.max(requests)
    }

    pub fn items_at(&self, depth: usize) -> &[I] {
        self.items.get(&depth).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn requests_at(&self, depth: usize) -> &[Request] {
        self.requests
            .get(&depth)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All items in level order
    pub fn all_items(&self) -> impl Iterator<Item = &I> {
        self.items.values().flatten()
    }

    /// Requests recorded at the deepest request level, which were never
    /// crawled
    pub fn frontier(&self) -> &[Request] {
        self.requests
            .values()
            .next_back()
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.requests.is_empty()
    }

    /// Converts every item, keeping levels and requests
    pub fn try_map_items<J, E>(
        self,
        mut f: impl FnMut(I) -> Result<J, E>,
    ) -> Result<DepthLedger<J>, E> {
        let mut items = BTreeMap::new();
        for (depth, level) in self.items {
            let level = level.into_iter().map(&mut f).collect::<Result<Vec<_>, E>>()?;
            items.insert(depth, level);
        }
        Ok(DepthLedger {
            items,
            requests: self.requests,
        })
    }
}
