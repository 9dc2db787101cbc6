use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_SHOW: &str = "all";

/// Listing sort order requested from the upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Sort {
    Default,
    Hot,
    #[default]
    New,
    Top,
    Rising,
    Controversial,
}

const SORT_NAMES: &[(Sort, &str)] = &[
    (Sort::Default, "default"),
    (Sort::Hot, "hot"),
    (Sort::New, "new"),
    (Sort::Top, "top"),
    (Sort::Rising, "rising"),
    (Sort::Controversial, "controversial"),
];

impl Sort {
    pub fn as_str(&self) -> &'static str {
        SORT_NAMES
            .iter()
            .find(|(sort, _)| sort == self)
            .map(|(_, name)| *name)
            .unwrap_or("default")
    }

    /// Path segment for the listing URL; `Default` uses the bare feed path.
    pub fn path_segment(&self) -> Option<&'static str> {
        match self {
            Sort::Default => None,
            other => Some(other.as_str()),
        }
    }
}

impl FromStr for Sort {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        SORT_NAMES
            .iter()
            .find(|(_, name)| *name == normalized)
            .map(|(sort, _)| *sort)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "sort".to_string(),
                value: value.to_string(),
            })
    }
}

impl TryFrom<String> for Sort {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Sort> for String {
    fn from(sort: Sort) -> Self {
        sort.as_str().to_string()
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a feed keeps being polled once its pagination is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MonitorType {
    /// Walk the listing once.
    #[default]
    None,
    /// Keep polling, ignoring items created before the loop started.
    SinceStart,
    /// Keep polling everything.
    Continuous,
}

const MONITOR_NAMES: &[(MonitorType, &str)] = &[
    (MonitorType::None, "none"),
    (MonitorType::SinceStart, "since_start"),
    (MonitorType::Continuous, "continuous"),
    // Names used by older configuration files.
    (MonitorType::SinceStart, "afterstartonly"),
    (MonitorType::Continuous, "all"),
];

impl MonitorType {
    pub fn as_str(&self) -> &'static str {
        MONITOR_NAMES
            .iter()
            .find(|(monitor, _)| monitor == self)
            .map(|(_, name)| *name)
            .unwrap_or("none")
    }
}

impl FromStr for MonitorType {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        MONITOR_NAMES
            .iter()
            .find(|(_, name)| *name == normalized)
            .map(|(monitor, _)| *monitor)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "monitor_type".to_string(),
                value: value.to_string(),
            })
    }
}

impl TryFrom<String> for MonitorType {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MonitorType> for String {
    fn from(monitor: MonitorType) -> Self {
        monitor.as_str().to_string()
    }
}

impl fmt::Display for MonitorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfiguration {
    pub name: String,
    #[serde(default)]
    pub sort: Sort,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub monitor_type: MonitorType,
    #[serde(default = "default_show")]
    pub show: String,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_show() -> String {
    DEFAULT_SHOW.to_string()
}

impl FeedConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sort: Sort::default(),
            page_size: DEFAULT_PAGE_SIZE,
            monitor_type: MonitorType::None,
            show: default_show(),
        }
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_monitor_type(mut self, monitor_type: MonitorType) -> Self {
        self.monitor_type = monitor_type;
        self
    }

    pub fn should_monitor(&self) -> bool {
        matches!(
            self.monitor_type,
            MonitorType::SinceStart | MonitorType::Continuous
        )
    }

    /// Listing path for this feed, e.g. `/r/gaming/new.json`.
    pub fn listing_path(&self) -> String {
        let path = match self.sort.path_segment() {
            Some(segment) => format!("/r/{}/{}.json", self.name, segment),
            None => format!("/r/{}.json", self.name),
        };
        path.to_lowercase()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "feeds.name".to_string(),
            });
        }
        if self.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("feeds.{}.page_size", self.name),
                value: self.page_size.to_string(),
            });
        }
        Ok(())
    }
}

/// A post observed on a feed. Identity is `id`; everything else may change
/// between fetches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub feed: String,
    #[serde(default)]
    pub author_id: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub ups: i64,
    #[serde(default)]
    pub downs: i64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub upvote_ratio: f64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub total_awards: i64,
}

impl Item {
    pub fn new(id: impl Into<String>, feed: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            feed: feed.into(),
            author_id: String::new(),
            author: String::new(),
            ups: 0,
            downs: 0,
            score: 0,
            num_comments: 0,
            created_utc: 0.0,
            upvote_ratio: 0.0,
            title: String::new(),
            body: String::new(),
            total_awards: 0,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_ups(mut self, ups: i64) -> Self {
        self.ups = ups;
        self.score = ups - self.downs;
        self
    }

    /// True when `feed` is absent or empty, or names this item's feed.
    pub fn in_feed(&self, feed: Option<&str>) -> bool {
        match feed {
            Some(feed) if !feed.is_empty() => self.feed.eq_ignore_ascii_case(feed),
            _ => true,
        }
    }

    /// Items nobody has voted on yet carry no meaningful ratio.
    pub fn is_rated(&self) -> bool {
        !(self.score == 0 && self.downs == 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub posts: Vec<Item>,
}

impl Author {
    pub fn post_count(&self) -> usize {
        self.posts.len()
    }
}

/// Upstream request budget as advertised by the last response.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QuotaState {
    pub remaining: f64,
    pub used: u32,
    pub reset_seconds: u64,
}

/// One normalized page of an upstream listing.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub items: Vec<Item>,
    pub after: Option<String>,
    pub quota: QuotaState,
}

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGINATION_SIZE: u32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(DEFAULT_PAGE).max(1),
            page_size: page_size.unwrap_or(DEFAULT_PAGINATION_SIZE).max(1),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.page_size as usize
    }

    pub fn limit(&self) -> usize {
        self.page_size.max(1) as usize
    }

    /// Slice `items` to this page.
    pub fn apply<T: Clone>(&self, items: &[T]) -> Vec<T> {
        items
            .iter()
            .skip(self.offset())
            .take(self.limit())
            .cloned()
            .collect()
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_wire_names() {
        assert_eq!("new".parse::<Sort>().unwrap(), Sort::New);
        assert_eq!("TOP".parse::<Sort>().unwrap(), Sort::Top);
        assert!("sideways".parse::<Sort>().is_err());
        assert_eq!(String::from(Sort::Controversial), "controversial");
    }

    #[test]
    fn test_monitor_type_aliases() {
        assert_eq!(
            "AfterStartOnly".parse::<MonitorType>().unwrap(),
            MonitorType::SinceStart
        );
        assert_eq!("All".parse::<MonitorType>().unwrap(), MonitorType::Continuous);
        assert_eq!(MonitorType::SinceStart.as_str(), "since_start");
    }

    #[test]
    fn test_listing_path() {
        let feed = FeedConfiguration::new("Gaming").with_sort(Sort::New);
        assert_eq!(feed.listing_path(), "/r/gaming/new.json");

        let feed = FeedConfiguration::new("rust").with_sort(Sort::Default);
        assert_eq!(feed.listing_path(), "/r/rust.json");
    }

    #[test]
    fn test_feed_validation() {
        assert!(FeedConfiguration::new("").validate().is_err());
        assert!(FeedConfiguration::new("rust")
            .with_page_size(0)
            .validate()
            .is_err());
        assert!(FeedConfiguration::new("rust").validate().is_ok());
    }

    #[test]
    fn test_should_monitor() {
        let feed = FeedConfiguration::new("rust");
        assert!(!feed.should_monitor());
        assert!(feed
            .clone()
            .with_monitor_type(MonitorType::Continuous)
            .should_monitor());
        assert!(feed
            .with_monitor_type(MonitorType::SinceStart)
            .should_monitor());
    }

    #[test]
    fn test_pagination_clamps_and_slices() {
        let pagination = Pagination::new(Some(0), Some(0));
        assert_eq!(pagination.page, 1);
        assert_eq!(pagination.page_size, 1);

        let items: Vec<u32> = (0..10).collect();
        assert_eq!(Pagination::new(Some(2), Some(4)).apply(&items), vec![4, 5, 6, 7]);
        assert_eq!(Pagination::new(Some(3), Some(4)).apply(&items), vec![8, 9]);
        assert!(Pagination::new(Some(4), Some(4)).apply(&items).is_empty());
    }

    #[test]
    fn test_rated_items() {
        let item = Item::new("t3_a", "rust");
        assert!(!item.is_rated());
        assert!(item.with_ups(3).is_rated());
    }
}
