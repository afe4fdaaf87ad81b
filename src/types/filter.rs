//! Subscription filters (NIP-01).

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::nostr::{Event, Kind};

/// A subscription predicate. An event matches when every *specified*
/// criterion is satisfied; within one set, any member may match.
///
/// Built incrementally:
///
/// ```
/// use unicity_nostr_sdk::Filter;
///
/// let filter = Filter::new().kind(1).author("ab".repeat(32)).limit(10);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub ids: Option<Vec<String>>,
    pub authors: Option<Vec<String>>,
    pub kinds: Option<Vec<Kind>>,
    /// Single-letter tag criteria, keyed by tag name (without the `#`).
    pub tags: BTreeMap<String, Vec<String>>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.ids.get_or_insert_with(Vec::new).push(id.into());
        self
    }

    pub fn ids<I: IntoIterator<Item = S>, S: Into<String>>(mut self, ids: I) -> Self {
        self.ids
            .get_or_insert_with(Vec::new)
            .extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.authors.get_or_insert_with(Vec::new).push(author.into());
        self
    }

    pub fn authors<I: IntoIterator<Item = S>, S: Into<String>>(mut self, authors: I) -> Self {
        self.authors
            .get_or_insert_with(Vec::new)
            .extend(authors.into_iter().map(Into::into));
        self
    }

    pub fn kind(mut self, kind: Kind) -> Self {
        self.kinds.get_or_insert_with(Vec::new).push(kind);
        self
    }

    pub fn kinds<I: IntoIterator<Item = Kind>>(mut self, kinds: I) -> Self {
        self.kinds.get_or_insert_with(Vec::new).extend(kinds);
        self
    }

    /// Add a tag-value criterion, e.g. `tag("p", [pubkey_hex])`.
    pub fn tag<I: IntoIterator<Item = S>, S: Into<String>>(mut self, name: &str, values: I) -> Self {
        self.tags
            .entry(name.to_string())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether the event satisfies every specified criterion.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids {
            let id_hex = event.id().to_hex();
            if !ids.iter().any(|i| *i == id_hex) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            let author_hex = event.pubkey().to_hex();
            if !authors.iter().any(|a| *a == author_hex) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }
        for (name, values) in &self.tags {
            let event_values = event.tag_values(name);
            if !values.iter().any(|v| event_values.contains(&v.as_str())) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at() < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.created_at() > until {
                return false;
            }
        }
        true
    }

    /// Serialize to the wire form, omitting absent and empty sets.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(ids) = self.ids.as_ref().filter(|v| !v.is_empty()) {
            map.serialize_entry("ids", ids)?;
        }
        if let Some(authors) = self.authors.as_ref().filter(|v| !v.is_empty()) {
            map.serialize_entry("authors", authors)?;
        }
        if let Some(kinds) = self.kinds.as_ref().filter(|v| !v.is_empty()) {
            map.serialize_entry("kinds", kinds)?;
        }
        for (name, values) in &self.tags {
            if !values.is_empty() {
                map.serialize_entry(&format!("#{name}"), values)?;
            }
        }
        if let Some(since) = self.since {
            map.serialize_entry("since", &since)?;
        }
        if let Some(until) = self.until {
            map.serialize_entry("until", &until)?;
        }
        if let Some(limit) = self.limit {
            map.serialize_entry("limit", &limit)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let obj = value
            .as_object()
            .ok_or_else(|| D::Error::custom("filter is not a JSON object"))?;

        let mut filter = Filter::new();
        for (key, value) in obj {
            match key.as_str() {
                "ids" => {
                    filter.ids = Some(
                        serde_json::from_value(value.clone()).map_err(D::Error::custom)?,
                    )
                }
                "authors" => {
                    filter.authors = Some(
                        serde_json::from_value(value.clone()).map_err(D::Error::custom)?,
                    )
                }
                "kinds" => {
                    filter.kinds = Some(
                        serde_json::from_value(value.clone()).map_err(D::Error::custom)?,
                    )
                }
                "since" => {
                    filter.since =
                        Some(value.as_u64().ok_or_else(|| D::Error::custom("since"))?)
                }
                "until" => {
                    filter.until =
                        Some(value.as_u64().ok_or_else(|| D::Error::custom("until"))?)
                }
                "limit" => {
                    filter.limit =
                        Some(value.as_u64().ok_or_else(|| D::Error::custom("limit"))?)
                }
                // Any "#x" key is an additional tag criterion, including
                // ones this crate has no special knowledge of.
                key if key.starts_with('#') && key.len() > 1 => {
                    let values: Vec<String> =
                        serde_json::from_value(value.clone()).map_err(D::Error::custom)?;
                    filter.tags.insert(key[1..].to_string(), values);
                }
                _ => {}
            }
        }
        Ok(filter)
    }
}
