//! CMS pages. Content is stored and served verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::validation::{is_valid_slug, length_between, ValidationErrors};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Page {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub content: String,
    pub meta_description: Option<String>,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public view of a published page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicPage {
    pub slug: String,
    pub title: String,
    pub content: String,
    pub meta_description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<Page> for PublicPage {
    fn from(p: Page) -> Self {
        Self {
            slug: p.slug,
            title: p.title,
            content: p.content,
            meta_description: p.meta_description,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePageRequest {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub meta_description: Option<String>,
    #[serde(default)]
    pub published: bool,
}

impl CreatePageRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        errors.check(is_valid_slug(&self.slug), "slug", "must be lowercase words separated by hyphens");
        errors.check(length_between(&self.title, 1, 200), "title", "must be 1-200 characters");
        if let Some(meta) = &self.meta_description {
            errors.check(meta.chars().count() <= 300, "meta_description", "must be at most 300 characters");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePageRequest {
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub meta_description: Option<String>,
    #[serde(default)]
    pub published: Option<bool>,
}

impl UpdatePageRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if let Some(slug) = &self.slug {
            errors.check(is_valid_slug(slug), "slug", "must be lowercase words separated by hyphens");
        }
        if let Some(title) = &self.title {
            errors.check(length_between(title, 1, 200), "title", "must be 1-200 characters");
        }
        if let Some(meta) = &self.meta_description {
            errors.check(meta.chars().count() <= 300, "meta_description", "must be at most 300 characters");
        }
        errors.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_bad_slug_and_title() {
        let req = CreatePageRequest {
            slug: "About Us".into(),
            title: "".into(),
            content: String::new(),
            meta_description: Some("x".repeat(301)),
            published: true,
        };
        let fields: Vec<_> = req.validate().unwrap_err().into_inner().into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["slug", "title", "meta_description"]);
    }

    #[test]
    fn partial_update_only_checks_present_fields() {
        let req = UpdatePageRequest {
            content: Some("<p>new</p>".into()),
            ..Default::default()
        };
        assert!(req.validate().is_ok());
    }
}
