use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::error::{DirectoryError, DirectoryResult};
use crate::place::{NewPlace, PlacePatch};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Pending => "pending",
            ListingStatus::Accepted => "accepted",
            ListingStatus::Rejected => "rejected",
        }
    }

    /// Statuses in which the owner may still edit or withdraw the listing.
    pub fn owner_mutable(&self) -> bool {
        matches!(self, ListingStatus::Pending | ListingStatus::Rejected)
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingStatus {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ListingStatus::Pending),
            "accepted" => Ok(ListingStatus::Accepted),
            "rejected" => Ok(ListingStatus::Rejected),
            other => Err(DirectoryError::validation(
                "status",
                format!("unknown listing status {other}"),
            )),
        }
    }
}

/// The place a listing proposes: an edit of an existing record or a brand new
/// one. Kept private to the listing until it is accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ListingPlace {
    Existing {
        #[serde(rename = "placeId")]
        place_id: String,
        #[serde(default)]
        changes: PlacePatch,
    },
    Inline { place: NewPlace },
}

impl ListingPlace {
    pub fn existing(place_id: impl Into<String>) -> Self {
        ListingPlace::Existing {
            place_id: place_id.into(),
            changes: PlacePatch::default(),
        }
    }

    pub fn inline(place: NewPlace) -> Self {
        ListingPlace::Inline { place }
    }

    pub fn referenced_place(&self) -> Option<&str> {
        match self {
            ListingPlace::Existing { place_id, .. } => Some(place_id),
            ListingPlace::Inline { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub place: ListingPlace,
    pub place_id: Option<String>,
    pub created_place: bool,
    pub status: ListingStatus,
    pub admin_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let place_json: String = row.get("place_json")?;
        let place = serde_json::from_str(&place_json).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })?;
        let status: String = row.get("status")?;
        let status = status.parse::<ListingStatus>().map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })?;
        let created_at: NaiveDateTime = row.get("created_at")?;
        let updated_at: NaiveDateTime = row.get("updated_at")?;
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            place,
            place_id: row.get("place_id")?,
            created_place: row.get::<_, i64>("created_place")? != 0,
            status,
            admin_note: row.get("admin_note")?,
            created_at: Utc.from_utc_datetime(&created_at),
            updated_at: Utc.from_utc_datetime(&updated_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingSubmission {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub place: ListingPlace,
}

impl ListingSubmission {
    pub fn new(title: impl Into<String>, place: ListingPlace) -> Self {
        Self {
            title: title.into(),
            description: None,
            place,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Field replacements for an existing listing; `None` keeps the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListingUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub place: Option<ListingPlace>,
}

impl ListingUpdate {
    pub fn is_empty(&self) -> bool {
        self == &ListingUpdate::default()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingMetrics {
    pub pending: usize,
    pub accepted: usize,
    pub rejected: usize,
}

impl ListingMetrics {
    pub fn total(&self) -> usize {
        self.pending + self.accepted + self.rejected
    }

    pub(crate) fn record(&mut self, status: ListingStatus, count: usize) {
        match status {
            ListingStatus::Pending => self.pending += count,
            ListingStatus::Accepted => self.accepted += count,
            ListingStatus::Rejected => self.rejected += count,
        }
    }
}

pub(crate) fn validate_title(title: &str) -> DirectoryResult<()> {
    if title.trim().is_empty() {
        return Err(DirectoryError::validation("title", "must not be blank"));
    }
    Ok(())
}
