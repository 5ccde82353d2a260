//! Stable in-memory sorting with chained keys.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    fn apply(self, ord: Ordering) -> Ordering {
        match self {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }
}

/// Sort by a single key. Stable.
pub fn sort_by_key<T, K: Ord>(items: &mut [T], key: impl Fn(&T) -> K, direction: SortDirection) {
    items.sort_by(|a, b| direction.apply(key(a).cmp(&key(b))));
}

type Comparator<'a, T> = Box<dyn Fn(&T, &T) -> Ordering + Send + Sync + 'a>;

/// Multi-key sort specification.
///
/// ```
/// use roster_engine::{SortDirection, Sorter};
///
/// let mut rows = vec![("b", 2), ("a", 2), ("c", 1)];
/// Sorter::by(|r: &(&str, i32)| r.1, SortDirection::Desc)
///     .then_by(|r| r.0, SortDirection::Asc)
///     .sort(&mut rows);
/// assert_eq!(rows, vec![("a", 2), ("b", 2), ("c", 1)]);
/// ```
pub struct Sorter<'a, T> {
    keys: Vec<Comparator<'a, T>>,
}

impl<'a, T> Sorter<'a, T> {
    pub fn by<K: Ord>(key: impl Fn(&T) -> K + Send + Sync + 'a, direction: SortDirection) -> Self {
        Self { keys: Vec::new() }.then_by(key, direction)
    }

    pub fn then_by<K: Ord>(
        mut self,
        key: impl Fn(&T) -> K + Send + Sync + 'a,
        direction: SortDirection,
    ) -> Self {
        self.keys
            .push(Box::new(move |a, b| direction.apply(key(a).cmp(&key(b)))));
        self
    }

    pub fn compare(&self, a: &T, b: &T) -> Ordering {
        self.keys
            .iter()
            .map(|cmp| cmp(a, b))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }

    pub fn sort(&self, items: &mut [T]) {
        items.sort_by(|a, b| self.compare(a, b));
    }
}
