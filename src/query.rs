use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use log::debug;
use reqwest::Url;

use crate::api::*;

pub const LIMIT_OPTIONS: [u32; 4] = [10, 20, 50, 100];
pub const DEFAULT_LIMIT: u32 = 50;
/// Wire format of the `start` / `end` parameters.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M";

const PAGE_PARAM: &str = "page";
const LIMIT_PARAM: &str = "limit";
const STATUS_PARAM: &str = "status";
const SEARCH_PARAM: &str = "search";
const POPULER_PARAM: &str = "is_populer";
const START_PARAM: &str = "start";
const END_PARAM: &str = "end";

/// Filter and pagination state of an admin table. `parse` and
/// `to_query_string` are inverse of each other for every normalized value,
/// so the query string can be bookmarked and shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    pub status: Option<TransactionStatus>,
    pub search: Option<String>,
    pub is_populer: Option<bool>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}
impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_LIMIT,
            status: None,
            search: None,
            is_populer: None,
            start: None,
            end: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageNav {
    First,
    Prev,
    Next,
    Last,
    Goto(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageItem {
    Page(u32),
    Ellipsis,
}
impl Display for PageItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Page(page) => write!(f, "{}", page),
            Self::Ellipsis => write!(f, "…"),
        }
    }
}

pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, DATE_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
pub fn format_datetime(datetime: &NaiveDateTime) -> String {
    datetime.format(DATE_FORMAT).to_string()
}

fn normalize_limit(limit: u32) -> u32 {
    if LIMIT_OPTIONS.contains(&limit) {
        limit
    } else {
        DEFAULT_LIMIT
    }
}

pub fn total_pages(total: u64, limit: u32) -> u32 {
    let limit = u64::from(normalize_limit(limit));
    u32::try_from(total.div_ceil(limit)).unwrap_or(u32::MAX).max(1)
}

/// Page strip with ellipsis: every page up to seven pages, otherwise the
/// first, the last and the neighbours of the current one.
pub fn visible_pages(current: u32, total_pages: u32) -> Vec<PageItem> {
    if total_pages <= 7 {
        return (1..=total_pages).map(PageItem::Page).collect();
    }
    let current = current.clamp(1, total_pages);
    let mut pages = vec![PageItem::Page(1)];
    let start = current.saturating_sub(1).max(2);
    let end = current.saturating_add(1).min(total_pages - 1);
    if start > 2 {
        pages.push(PageItem::Ellipsis);
    }
    pages.extend((start..=end).map(PageItem::Page));
    if end < total_pages - 1 {
        pages.push(PageItem::Ellipsis);
    }
    pages.push(PageItem::Page(total_pages));
    pages
}

impl ListQuery {
    /// Lenient decoding: unknown keys are ignored and invalid values fall
    /// back to their defaults.
    pub fn parse(query: &str) -> Self {
        let mut list = Self::default();
        let Ok(mut url) = Url::parse("http://localhost/") else {
            return list;
        };
        url.set_query(Some(query.trim_start_matches('?')));
        for (key, value) in url.query_pairs() {
            let value = value.trim();
            match &*key {
                PAGE_PARAM => list.page = value.parse().ok().filter(|p| *p > 0).unwrap_or(1),
                LIMIT_PARAM => list.limit = normalize_limit(value.parse().unwrap_or(0)),
                STATUS_PARAM => {
                    list.status = match value {
                        "" | "all" => None,
                        status => status
                            .parse()
                            .map_err(|e| debug!("Ignoring status filter: {:#}", e))
                            .ok(),
                    }
                }
                SEARCH_PARAM => list.search = Some(value.to_string()).filter(|s| !s.is_empty()),
                POPULER_PARAM => list.is_populer = value.parse().ok(),
                START_PARAM => list.start = parse_datetime(value),
                END_PARAM => list.end = parse_datetime(value),
                _ => {}
            }
        }
        list
    }
    pub fn to_query_string(&self) -> String {
        let Ok(mut url) = Url::parse("http://localhost/") else {
            return String::new();
        };
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair(PAGE_PARAM, &self.page.to_string());
            pairs.append_pair(LIMIT_PARAM, &self.limit.to_string());
            if let Some(status) = self.status {
                pairs.append_pair(STATUS_PARAM, &status.to_string());
            }
            if let Some(search) = &self.search {
                pairs.append_pair(SEARCH_PARAM, search);
            }
            if let Some(is_populer) = self.is_populer {
                pairs.append_pair(POPULER_PARAM, &is_populer.to_string());
            }
            if let Some(start) = &self.start {
                pairs.append_pair(START_PARAM, &format_datetime(start));
            }
            if let Some(end) = &self.end {
                pairs.append_pair(END_PARAM, &format_datetime(end));
            }
        }
        url.query().unwrap_or_default().to_string()
    }
    /// Changing the page size always goes back to the first page.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = normalize_limit(limit);
        self.page = 1;
        self
    }
    pub fn with_status(mut self, status: Option<TransactionStatus>) -> Self {
        self.status = status;
        self
    }
    pub fn with_range(mut self, start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        self.start = start;
        self.end = end;
        self
    }
    pub fn navigate(mut self, nav: PageNav, total: u64) -> Self {
        let last = total_pages(total, self.limit);
        let page = match nav {
            PageNav::First => 1,
            PageNav::Prev => self.page.saturating_sub(1),
            PageNav::Next => self.page.saturating_add(1),
            PageNav::Last => last,
            PageNav::Goto(page) => page,
        };
        self.page = page.clamp(1, last);
        self
    }
    pub fn product_request(&self) -> ProductListRequest {
        ProductListRequest {
            page: Some(self.page),
            limit: Some(self.limit),
            search: self.search.clone(),
            is_populer: self.is_populer,
        }
    }
    /// Date bounds go to the server; pages are never narrowed locally.
    pub fn transaction_request(&self) -> TransactionListRequest {
        TransactionListRequest {
            page: Some(self.page),
            limit: Some(self.limit),
            status: self.status,
            start: self.start.as_ref().map(format_datetime),
            end: self.end.as_ref().map(format_datetime),
        }
    }
    pub fn user_request(&self) -> UserListRequest {
        UserListRequest {
            page: Some(self.page),
            limit: Some(self.limit),
        }
    }
}
impl FromStr for ListQuery {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}
impl Display for ListQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_query_string())
    }
}
