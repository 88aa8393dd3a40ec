//! The `[general]` table: how directory listings are filtered and sorted by default.

use crate::core::{EntryFilter, SortKey, SortSpec};

use log::warn;
use serde::Deserialize;

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct General {
    show_hidden: bool,
    dirs_first: bool,
    case_insensitive: bool,
    sort: String,
    descending: bool,
}

impl Default for General {
    fn default() -> Self {
        General {
            show_hidden: false,
            dirs_first: true,
            case_insensitive: true,
            sort: "name".to_string(),
            descending: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalGeneral {
    show_hidden: bool,
    case_insensitive: bool,
    sort: SortSpec,
}

impl From<General> for InternalGeneral {
    fn from(g: General) -> Self {
        let key = SortKey::parse(&g.sort).unwrap_or_else(|| {
            warn!("unknown sort key '{}', sorting by name", g.sort);
            SortKey::Name
        });
        Self {
            show_hidden: g.show_hidden,
            case_insensitive: g.case_insensitive,
            sort: SortSpec {
                key,
                descending: g.descending,
                dirs_first: g.dirs_first,
                case_insensitive: g.case_insensitive,
            },
        }
    }
}

impl InternalGeneral {
    #[inline]
    pub fn show_hidden(&self) -> bool {
        self.show_hidden
    }

    #[inline]
    pub fn case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    #[inline]
    pub fn sort(&self) -> SortSpec {
        self.sort
    }

    /// The filter a fresh directory model starts with.
    pub fn entry_filter(&self) -> EntryFilter {
        EntryFilter::new(self.show_hidden, self.case_insensitive)
    }
}
