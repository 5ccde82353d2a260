//! Page arithmetic and page containers.
//!
//! Page numbers are 1-based. A request past the last page reports the last
//! page number back; the slice itself is then empty.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: usize = 30;

/// A page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub page_number: usize,
    pub page_size: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page_number: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(page_number: usize, page_size: usize) -> Self {
        Self {
            page_number,
            page_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::invalid_argument("page size must be positive"));
        }
        Ok(())
    }

    /// Records to skip before this page.
    pub fn skip(&self) -> usize {
        skip(self.page_number, self.page_size)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Requested page number, clamped to the last page.
    pub page_number: usize,
    /// Total records across all pages.
    pub total: usize,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page_number: self.page_number,
            total: self.total,
        }
    }

    pub fn total_pages(&self, page_size: usize) -> usize {
        total_pages(self.total, page_size)
    }
}

pub fn total_pages(total: usize, page_size: usize) -> usize {
    if total == 0 || page_size == 0 {
        0
    } else {
        total.div_ceil(page_size)
    }
}

/// The page number to report for a request: `index` unless it lies past
/// the last page, in which case the last page (0 when empty).
pub fn page_number(index: usize, page_size: usize, total: usize) -> usize {
    let pages = total_pages(total, page_size);
    if index > pages {
        pages
    } else {
        index
    }
}

/// Index below 1 is treated as 1.
pub fn skip(index: usize, page_size: usize) -> usize {
    (index.max(1) - 1).saturating_mul(page_size)
}

/// Slice an already-ordered list into a page.
pub fn paginate<T>(items: Vec<T>, request: PageRequest) -> Result<Page<T>> {
    request.validate()?;
    let total = items.len();
    let items = items
        .into_iter()
        .skip(request.skip())
        .take(request.page_size)
        .collect();

    Ok(Page {
        items,
        page_number: page_number(request.page_number, request.page_size, total),
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_number_clamps_to_last_page() {
        assert_eq!(page_number(1, 10, 95), 1);
        assert_eq!(page_number(10, 10, 95), 10);
        assert_eq!(page_number(11, 10, 95), 10);
        assert_eq!(page_number(3, 10, 0), 0);
    }

    #[test]
    fn skip_treats_zero_as_first_page() {
        assert_eq!(skip(0, 25), 0);
        assert_eq!(skip(1, 25), 0);
        assert_eq!(skip(3, 25), 50);
    }

    #[test]
    fn paginate_slices() {
        let page = paginate((1..=7).collect::<Vec<_>>(), PageRequest::new(2, 3)).unwrap();
        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.page_number, 2);
        assert_eq!(page.total, 7);
        assert_eq!(page.total_pages(3), 3);

        let last = paginate((1..=7).collect::<Vec<_>>(), PageRequest::new(3, 3)).unwrap();
        assert_eq!(last.items, vec![7]);
    }

    #[test]
    fn paginate_past_end() {
        let page = paginate(vec!["a", "b"], PageRequest::new(5, 10)).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.page_number, 1);
        assert_eq!(page.total, 2);
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let err = paginate(vec![1], PageRequest::new(1, 0)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn map_keeps_counts() {
        let page = paginate(vec![1, 2, 3], PageRequest::default())
            .unwrap()
            .map(|n| n * 10);
        assert_eq!(page.items, vec![10, 20, 30]);
        assert_eq!(page.total, 3);
    }
}
