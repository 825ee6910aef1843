//! Credential-free collaborators for local runs.

use super::{AnnotationClient, CategorizerClient, ServiceCredentials, ServiceError};
use async_trait::async_trait;
use lightbox_protocol::Category;

/// Returns the same configured labels for every image.
#[derive(Debug, Clone, Default)]
pub struct StaticAnnotator {
    labels: Vec<String>,
}

impl StaticAnnotator {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }
}

#[async_trait]
impl AnnotationClient for StaticAnnotator {
    async fn detect_labels(
        &self,
        _image: &[u8],
        _creds: &ServiceCredentials,
    ) -> Result<Vec<String>, ServiceError> {
        Ok(self.labels.clone())
    }
}

const KEYWORDS: &[(Category, &[&str])] = &[
    (
        Category::Pets,
        &["dog", "cat", "pet", "puppy", "kitten", "bird", "hamster", "rabbit", "parrot"],
    ),
    (
        Category::People,
        &["person", "people", "face", "smile", "man", "woman", "child", "selfie", "crowd", "portrait"],
    ),
    (
        Category::FoodAndDrink,
        &["food", "dish", "drink", "meal", "cuisine", "coffee", "wine", "fruit", "dessert", "recipe"],
    ),
    (
        Category::EventsAndActivities,
        &["party", "wedding", "concert", "sport", "sports", "festival", "event", "birthday", "celebration"],
    ),
    (
        Category::PlacesAndTravel,
        &["beach", "mountain", "city", "landscape", "sky", "travel", "building", "architecture", "landmark", "lake", "forest"],
    ),
    (
        Category::ArtAndDesign,
        &["art", "painting", "drawing", "illustration", "design", "sculpture", "graphics"],
    ),
    (
        Category::ScreenshotsAndRecordings,
        &["screenshot", "screen", "software", "website", "web page", "display device", "multimedia"],
    ),
    (
        Category::DocumentsAndText,
        &["text", "document", "font", "paper", "handwriting", "receipt", "letter"],
    ),
];

/// Deterministic keyword table. Labels are checked in service order; the
/// first label that matches any keyword decides the category.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordCategorizer;

impl KeywordCategorizer {
    pub fn categorize(labels: &[String]) -> Category {
        labels
            .iter()
            .find_map(|label| match_label(label))
            .unwrap_or(Category::Other)
    }
}

fn match_label(label: &str) -> Option<Category> {
    let label = label.trim().to_lowercase();
    let words: Vec<&str> = label
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    KEYWORDS.iter().find_map(|(category, keywords)| {
        let hit = keywords.iter().any(|kw| {
            if kw.contains(' ') {
                label.contains(kw)
            } else {
                words.contains(kw)
            }
        });
        hit.then_some(*category)
    })
}

#[async_trait]
impl CategorizerClient for KeywordCategorizer {
    async fn classify(
        &self,
        labels: &[String],
        _creds: &ServiceCredentials,
    ) -> Result<Category, ServiceError> {
        Ok(Self::categorize(labels))
    }
}
