//! Core data types.

use crate::ids::RecordId;
use crate::metadata::{self, Metadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A stored object as seen by listing or `stat`.
///
/// `metadata` is attached to the object record, not embedded in the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub path: String,
    #[serde(default)]
    pub content_kind: Option<String>,
    pub byte_size: u64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ArtifactSummary {
    pub fn new(path: impl Into<String>, content_kind: Option<&str>, byte_size: u64) -> Self {
        Self {
            path: path.into(),
            content_kind: content_kind.map(str::to_string),
            byte_size,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// True if the declared content kind is an `image/*` kind.
    pub fn is_image(&self) -> bool {
        self.content_kind
            .as_deref()
            .map(|kind| kind.trim().to_ascii_lowercase().starts_with("image/"))
            .unwrap_or(false)
    }

    pub fn state(&self) -> ProcessingState {
        metadata::derive_state(&self.metadata)
    }

    pub fn owner(&self) -> Option<Owner> {
        Owner::from_metadata(&self.metadata)
    }
}

/// Inbox-write notification, delivered at least once.
///
/// Carries a metadata snapshot taken when the notification was produced; the
/// pipeline always re-reads fresh metadata before acting on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxNotification {
    pub path: String,
    #[serde(default)]
    pub content_kind: Option<String>,
    pub byte_size: u64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl From<InboxNotification> for ArtifactSummary {
    fn from(n: InboxNotification) -> Self {
        Self {
            path: n.path,
            content_kind: n.content_kind,
            byte_size: n.byte_size,
            metadata: n.metadata,
        }
    }
}

impl From<&ArtifactSummary> for InboxNotification {
    fn from(a: &ArtifactSummary) -> Self {
        Self {
            path: a.path.clone(),
            content_kind: a.content_kind.clone(),
            byte_size: a.byte_size,
            metadata: a.metadata.clone(),
        }
    }
}

/// Progress of an artifact through the pipeline. Ordered; never moves backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingState {
    New,
    Relocated,
    Analyzed,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::New => "NEW",
            ProcessingState::Relocated => "RELOCATED",
            ProcessingState::Analyzed => "ANALYZED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingState::Analyzed)
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn is_public(&self) -> bool {
        matches!(self, Visibility::Public)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(format!("unknown visibility '{}'", other)),
        }
    }
}

/// Owner identity and visibility carried in artifact metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub visibility: Visibility,
}

impl Owner {
    /// Reads `uid` and `public` from metadata. `None` when `uid` is absent or blank.
    pub fn from_metadata(meta: &Metadata) -> Option<Self> {
        let id = meta.get(metadata::UID)?.trim();
        if id.is_empty() {
            return None;
        }
        let visibility = if metadata::flag(meta, metadata::PUBLIC) {
            Visibility::Public
        } else {
            Visibility::Private
        };
        Some(Self {
            id: id.to_string(),
            visibility,
        })
    }

    pub fn is_public(&self) -> bool {
        self.visibility.is_public()
    }

    /// The metadata entries that describe this owner.
    pub fn to_metadata(&self) -> Metadata {
        let mut m = Metadata::new();
        m.insert(metadata::UID.to_string(), self.id.clone());
        m.insert(
            metadata::PUBLIC.to_string(),
            metadata::bool_value(self.is_public()).to_string(),
        );
        m
    }
}

/// Closed vocabulary returned by categorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "People")]
    People,
    #[serde(rename = "Pets")]
    Pets,
    #[serde(rename = "Places & Travel")]
    PlacesAndTravel,
    #[serde(rename = "Food & Drink")]
    FoodAndDrink,
    #[serde(rename = "Events & Activities")]
    EventsAndActivities,
    #[serde(rename = "Art & Design")]
    ArtAndDesign,
    #[serde(rename = "Screenshots & Recordings")]
    ScreenshotsAndRecordings,
    #[serde(rename = "Documents & Text")]
    DocumentsAndText,
    #[serde(rename = "Other")]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a known category")]
pub struct CategoryParseError(pub String);

impl Category {
    pub const ALL: [Category; 9] = [
        Category::People,
        Category::Pets,
        Category::PlacesAndTravel,
        Category::FoodAndDrink,
        Category::EventsAndActivities,
        Category::ArtAndDesign,
        Category::ScreenshotsAndRecordings,
        Category::DocumentsAndText,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::People => "People",
            Category::Pets => "Pets",
            Category::PlacesAndTravel => "Places & Travel",
            Category::FoodAndDrink => "Food & Drink",
            Category::EventsAndActivities => "Events & Activities",
            Category::ArtAndDesign => "Art & Design",
            Category::ScreenshotsAndRecordings => "Screenshots & Recordings",
            Category::DocumentsAndText => "Documents & Text",
            Category::Other => "Other",
        }
    }

    /// Vocabulary joined for prompts: `People, Pets, ...`.
    pub fn vocabulary() -> String {
        Self::ALL
            .iter()
            .map(Category::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = CategoryParseError;

    /// Case-insensitive; tolerates surrounding whitespace, quotes, and a trailing period.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = s
            .trim()
            .trim_matches(|c| c == '"' || c == '\'' || c == '`')
            .trim_end_matches('.')
            .trim();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(cleaned))
            .ok_or_else(|| CategoryParseError(s.to_string()))
    }
}

/// Analysis result as produced by the pipeline, before the store assigns
/// `record_id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAnalysisRecord {
    pub image_url: String,
    pub file_path: String,
    pub tags: Vec<String>,
    pub category: Category,
    pub owner_id: String,
    pub visibility: Visibility,
}

/// Persisted, immutable analysis record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub record_id: RecordId,
    pub namespace: String,
    pub image_url: String,
    pub file_path: String,
    pub tags: Vec<String>,
    pub category: Category,
    pub owner_id: String,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
}

/// Cross-reference written for public artifacts; points at the owner's record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicReference {
    pub owner_id: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPublicReference {
    pub record_id: RecordId,
    pub owner_id: String,
    pub namespace: String,
    pub created_at: DateTime<Utc>,
}
