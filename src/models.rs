use std::collections::HashSet;
use std::fmt;

use bytes::Bytes;
use serde::Deserialize;

use crate::error::{Result, WattbookError};

/// One entry of a story's part listing, in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRef {
    pub id: u64,
    pub title: String,
}

/// Story-level metadata. Immutable once fetched.
#[derive(Debug, Clone)]
pub struct Story {
    pub id: u64,
    pub title: String,
    pub author: String,
    pub description: String,
    pub tags: Vec<String>,
    pub cover_url: Option<String>,
    /// Parts in the order returned by the upstream listing. Never re-sorted.
    pub parts: Vec<PartRef>,
}

impl Story {
    pub fn chapter_ids(&self) -> Vec<u64> {
        self.parts.iter().map(|part| part.id).collect()
    }
}

/// One downloaded chapter. `content` is raw upstream HTML until the
/// transformer normalizes it; `images` lists the absolute image urls found in
/// the content, in order of first appearance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub id: u64,
    pub title: String,
    pub content: String,
    pub images: Vec<String>,
}

/// A downloaded binary resource embedded in the output document.
#[derive(Clone)]
pub struct EmbeddedResource {
    pub url: String,
    /// Path inside the container, unique per document (e.g. `images/img-001.jpg`).
    pub local_name: String,
    pub media_type: String,
    pub data: Bytes,
}

impl fmt::Debug for EmbeddedResource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EmbeddedResource")
            .field("url", &self.url)
            .field("local_name", &self.local_name)
            .field("media_type", &self.media_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// An authenticated cookie set for one pipeline run. Read-only after
/// creation; never reused across runs. Cookie values stay out of `Debug`
/// output and logs.
#[derive(Clone, Default)]
pub struct Session {
    cookies: Vec<(String, String)>,
}

impl Session {
    /// Parse a `Cookie`-header style string (`name=value; name2=value2`).
    pub(crate) fn from_cookie_header(header: &str) -> Self {
        let cookies = header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                if name.is_empty() {
                    return None;
                }
                Some((name.to_string(), value.to_string()))
            })
            .collect();
        Session { cookies }
    }

    /// Render the cookies as a `Cookie` request header value.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn names(&self) -> HashSet<&str> {
        self.cookies.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Values are credentials, keep them out of logs.
        write!(f, "Session({} cookies)", self.cookies.len())
    }
}

// Serde models for the field-restricted metadata endpoint. Validated into
// the domain types above rather than trusted as-is.

#[derive(Deserialize, Debug, Default)]
pub(crate) struct StoryResponse {
    pub title: Option<String>,
    pub description: Option<String>,
    pub cover: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub user: Option<UserResponse>,
    #[serde(default)]
    pub parts: Vec<PartResponse>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct UserResponse {
    pub name: Option<String>,
    pub username: Option<String>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct PartResponse {
    pub id: u64,
    #[serde(default)]
    pub title: String,
}

impl StoryResponse {
    /// Validate the field-restricted upstream payload into a [`Story`].
    ///
    /// A response without a title is how the provider reports an unknown
    /// story id, hence `NotFound` rather than a parse error.
    pub(crate) fn into_story(self, story_id: u64) -> Result<Story> {
        let title = match self.title {
            Some(title) if !title.trim().is_empty() => title,
            _ => {
                return Err(WattbookError::NotFound(format!(
                    "story {} has no title in the upstream response",
                    story_id
                )))
            }
        };

        let author = self
            .user
            .and_then(|user| {
                user.name
                    .filter(|name| !name.trim().is_empty())
                    .or(user.username)
            })
            .unwrap_or_default();

        let parts: Vec<PartRef> = self
            .parts
            .into_iter()
            .map(|part| PartRef {
                id: part.id,
                title: part.title,
            })
            .collect();

        let mut seen = HashSet::new();
        if let Some(duplicate) = parts.iter().find(|part| !seen.insert(part.id)) {
            return Err(WattbookError::Upstream(format!(
                "story {} lists part {} more than once",
                story_id, duplicate.id
            )));
        }

        Ok(Story {
            id: story_id,
            title,
            author,
            description: self.description.unwrap_or_default(),
            tags: self.tags,
            cover_url: self.cover.filter(|url| !url.is_empty()),
            parts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn story_response_with_parts_preserves_listing_order() {
        let raw: StoryResponse =
            serde_json::from_str(r#"{"title": "Test", "parts": [{"id": 1}, {"id": 2}]}"#)
                .expect("valid json");
        let story = raw.into_story(123).expect("valid story");
        assert_eq!(story.id, 123);
        assert_eq!(story.title, "Test");
        assert_eq!(story.chapter_ids(), vec![1, 2]);
        assert!(story.cover_url.is_none());
    }

    #[test]
    fn story_response_without_title_is_not_found() {
        let raw: StoryResponse =
            serde_json::from_str(r#"{"description": "ghost story"}"#).expect("valid json");
        let err = raw.into_story(404).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn story_response_with_duplicate_parts_is_rejected() {
        let raw: StoryResponse =
            serde_json::from_str(r#"{"title": "Test", "parts": [{"id": 7}, {"id": 7}]}"#)
                .expect("valid json");
        let err = raw.into_story(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
    }

    #[test]
    fn author_falls_back_to_username() {
        let raw: StoryResponse = serde_json::from_str(
            r#"{"title": "Test", "user": {"name": "", "username": "writer42"}}"#,
        )
        .expect("valid json");
        let story = raw.into_story(1).expect("valid story");
        assert_eq!(story.author, "writer42");
    }

    #[test]
    fn session_round_trips_cookie_header() {
        let session = Session::from_cookie_header("token=abc123; wp_id=xyz");
        assert_eq!(session.cookie_header(), "token=abc123; wp_id=xyz");
        assert!(session.names().contains("token"));
        assert!(session.names().contains("wp_id"));
    }

    #[test]
    fn session_debug_redacts_cookie_values() {
        let session = Session::from_cookie_header("token=supersecret");
        let debug = format!("{:?}", session);
        assert!(!debug.contains("supersecret"));
    }
}
