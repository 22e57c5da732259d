//! Page windows, and the next/previous page descriptors of a listing.

use std::cmp;
use serde_json::Value;
use crate::config::QueryConfig;

/// The default page number when none (or an invalid one) is requested.
pub const DEFAULT_PAGE: u64 = 1;

/// A requested page window. Both numbers are at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageSpec {
    /// The 1-based page number.
    pub page: u64,
    /// The maximal number of documents on a page.
    pub limit: u64,
}

/// A page descriptor in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRef {
    /// The 1-based page number.
    pub page: u64,
    /// The page size.
    pub limit: u64,
}

/// Descriptors of the neighboring pages, if they exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pagination {
    /// The following page, present iff there are documents after this page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<PageRef>,
    /// The preceding page, present iff this is not the first page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<PageRef>,
}

impl PageSpec {
    /// Creates a page window, raising zeros to 1.
    pub fn new(page: u64, limit: u64) -> Self {
        PageSpec {
            page: cmp::max(page, 1),
            limit: cmp::max(limit, 1),
        }
    }

    /// Parses the raw `page` and `limit` parameters leniently: a leading
    /// run of decimal digits is taken (`"3abc"` is page 3), and anything
    /// absent, non-numeric, zero or negative falls back to the default.
    /// The limit is clamped to the configured maximum, if any.
    ///
    /// ```
    /// # #[macro_use]
    /// # extern crate serde_json;
    /// # extern crate resourcery;
    /// #
    /// # use resourcery::config::QueryConfig;
    /// # use resourcery::query::PageSpec;
    /// #
    /// # fn main() {
    /// let config = QueryConfig::default();
    /// let spec = PageSpec::parse(Some(&json!("2")), Some(&json!("5x")), &config);
    /// assert_eq!(spec, PageSpec::new(2, 5));
    ///
    /// let spec = PageSpec::parse(Some(&json!("-1")), Some(&json!("abc")), &config);
    /// assert_eq!(spec, PageSpec::new(1, config.default_limit));
    /// # }
    /// ```
    pub fn parse(page: Option<&Value>, limit: Option<&Value>, config: &QueryConfig) -> Self {
        let page = page.and_then(lenient_positive).unwrap_or(DEFAULT_PAGE);
        let limit = limit.and_then(lenient_positive).unwrap_or(config.default_limit);
        let limit = config.max_limit.map_or(limit, |max| cmp::min(limit, max));

        Self::new(page, limit)
    }

    /// The number of documents preceding this page.
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }

    /// Computes the neighboring page descriptors given the total number of
    /// documents matching the filter.
    ///
    /// ```
    /// # use resourcery::query::{ PageSpec, PageRef };
    /// let pagination = PageSpec::new(2, 5).paginate(12);
    /// assert_eq!(pagination.prev, Some(PageRef { page: 1, limit: 5 }));
    /// assert_eq!(pagination.next, Some(PageRef { page: 3, limit: 5 }));
    ///
    /// let pagination = PageSpec::new(3, 5).paginate(12);
    /// assert_eq!(pagination.next, None);
    /// ```
    pub fn paginate(&self, total: u64) -> Pagination {
        let offset = self.offset();
        let end = offset.saturating_add(self.limit);

        Pagination {
            next: if end < total {
                Some(PageRef { page: self.page + 1, limit: self.limit })
            } else {
                None
            },
            prev: if offset > 0 {
                Some(PageRef { page: self.page - 1, limit: self.limit })
            } else {
                None
            },
        }
    }
}

impl Default for PageSpec {
    fn default() -> Self {
        PageSpec::new(DEFAULT_PAGE, QueryConfig::default().default_limit)
    }
}

/// The strictly positive integer at the front of a raw value.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn lenient_positive(value: &Value) -> Option<u64> {
    let n = match *value {
        Value::Number(ref n) => n.as_u64().or_else(|| {
            n.as_f64().filter(|x| *x >= 1.0 && x.is_finite()).map(|x| x as u64)
        }),
        Value::String(ref s) => leading_digits(s),
        _ => None,
    };

    n.filter(|&n| n > 0)
}

/// Parses the decimal digits after optional leading whitespace and an
/// optional `+` sign; saturates instead of overflowing.
fn leading_digits(s: &str) -> Option<u64> {
    let s = s.trim_start();
    let s = if s.starts_with('+') { &s[1..] } else { s };
    let digits = s.bytes().take_while(u8::is_ascii_digit);
    let mut seen = false;
    let mut n: u64 = 0;

    for d in digits {
        seen = true;
        n = n.saturating_mul(10).saturating_add(u64::from(d - b'0'));
    }

    if seen { Some(n) } else { None }
}
