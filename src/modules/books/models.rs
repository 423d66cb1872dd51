use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

/// Reading state of a book. Nothing outside these three is ever stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookStatus {
    Reading,
    Completed,
    Wishlist,
}

impl BookStatus {
    pub const ALL: [BookStatus; 3] = [
        BookStatus::Reading,
        BookStatus::Completed,
        BookStatus::Wishlist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Reading => "reading",
            BookStatus::Completed => "completed",
            BookStatus::Wishlist => "wishlist",
        }
    }
}

impl fmt::Display for BookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status '{0}'; expected reading, completed or wishlist")]
pub struct UnknownStatus(pub String);

impl FromStr for BookStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reading" => Ok(BookStatus::Reading),
            "completed" => Ok(BookStatus::Completed),
            "wishlist" => Ok(BookStatus::Wishlist),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Status filter for listing; `all` disables filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Only(BookStatus),
}

impl StatusFilter {
    /// Absent and `all` both mean no filter.
    pub fn parse(raw: Option<&str>) -> Result<Self, UnknownStatus> {
        match raw.map(str::trim) {
            None | Some("") | Some("all") => Ok(StatusFilter::All),
            Some(other) => other.parse().map(StatusFilter::Only),
        }
    }

    pub fn matches(&self, status: BookStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(wanted) => *wanted == status,
        }
    }

    /// Query-string value, `None` when no filter applies.
    pub fn as_query(&self) -> Option<&'static str> {
        match self {
            StatusFilter::All => None,
            StatusFilter::Only(status) => Some(status.as_str()),
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusFilter::All => f.write_str("all"),
            StatusFilter::Only(status) => status.fmt(f),
        }
    }
}

/// A tracked book, owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub status: BookStatus,
    pub user_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Validated user-editable fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookInput {
    pub title: String,
    pub author: String,
    pub status: BookStatus,
}

/// Body of create and full-update requests, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Body of the status-only update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusRequest {
    #[serde(default)]
    pub status: Option<String>,
}

/// Query string of the list endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
}

/// One rejected field, rendered into the error `details`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub error: String,
}

impl FieldError {
    fn new(field: &'static str, error: impl Into<String>) -> Self {
        Self {
            field,
            error: error.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({ "field": self.field, "error": self.error })
    }
}

fn required_text(
    field: &'static str,
    value: Option<String>,
    errors: &mut Vec<FieldError>,
) -> String {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => v,
        _ => {
            errors.push(FieldError::new(field, "required"));
            String::new()
        }
    }
}

fn required_status(value: Option<&str>, errors: &mut Vec<FieldError>) -> Option<BookStatus> {
    match value {
        None => {
            errors.push(FieldError::new("status", "required"));
            None
        }
        Some(raw) => match raw.parse() {
            Ok(status) => Some(status),
            Err(e) => {
                errors.push(FieldError::new("status", e.to_string()));
                None
            }
        },
    }
}

impl BookRequest {
    pub fn validate(self) -> Result<BookInput, Vec<FieldError>> {
        let mut errors = Vec::new();
        let title = required_text("title", self.title, &mut errors);
        let author = required_text("author", self.author, &mut errors);
        let status = required_status(self.status.as_deref(), &mut errors);

        match status {
            Some(status) if errors.is_empty() => Ok(BookInput {
                title,
                author,
                status,
            }),
            _ => Err(errors),
        }
    }
}

impl StatusRequest {
    pub fn validate(self) -> Result<BookStatus, Vec<FieldError>> {
        let mut errors = Vec::new();
        required_status(self.status.as_deref(), &mut errors).ok_or(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(title: &str, author: &str, status: &str) -> BookRequest {
        BookRequest {
            title: Some(title.to_string()),
            author: Some(author.to_string()),
            status: Some(status.to_string()),
        }
    }

    #[test]
    fn valid_request_trims_fields() {
        let input = request("  Dune ", "Herbert", "wishlist").validate().unwrap();
        assert_eq!(input.title, "Dune");
        assert_eq!(input.author, "Herbert");
        assert_eq!(input.status, BookStatus::Wishlist);
    }

    #[test]
    fn blank_fields_and_bad_status_are_all_reported() {
        let errors = request(" ", "", "abandoned").validate().unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["title", "author", "status"]);
    }

    #[test]
    fn missing_status_is_required() {
        let errors = BookRequest {
            title: Some("Dune".into()),
            author: Some("Herbert".into()),
            status: None,
        }
        .validate()
        .unwrap_err();
        assert_eq!(errors, vec![FieldError::new("status", "required")]);
    }

    #[test]
    fn status_is_case_sensitive() {
        assert!("Reading".parse::<BookStatus>().is_err());
        assert_eq!("completed".parse::<BookStatus>(), Ok(BookStatus::Completed));
    }

    #[test]
    fn filter_parsing() {
        assert_eq!(StatusFilter::parse(None), Ok(StatusFilter::All));
        assert_eq!(StatusFilter::parse(Some("all")), Ok(StatusFilter::All));
        assert_eq!(StatusFilter::parse(Some("")), Ok(StatusFilter::All));
        assert_eq!(
            StatusFilter::parse(Some("completed")),
            Ok(StatusFilter::Only(BookStatus::Completed))
        );
        assert!(StatusFilter::parse(Some("done")).is_err());
        assert_eq!(StatusFilter::All.as_query(), None);
        assert_eq!(
            StatusFilter::Only(BookStatus::Reading).as_query(),
            Some("reading")
        );
    }

    #[test]
    fn book_decodes_backend_row() {
        let row = serde_json::json!({
            "id": "0b8e3a6e-7f43-4a0c-9a0e-1f7d2c1b9a11",
            "title": "Dune",
            "author": "Herbert",
            "status": "reading",
            "user_id": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
            "created_at": "2024-05-01T12:34:56.789012+00:00"
        });

        let book: Book = serde_json::from_value(row).unwrap();
        assert_eq!(book.status, BookStatus::Reading);
        assert_eq!(book.created_at.year(), 2024);
    }
}
