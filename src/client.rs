use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use log::{debug, info};
use reqwest::{
    cookie::{CookieStore, Jar},
    header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, COOKIE, USER_AGENT},
    Client, RequestBuilder, Url,
};
use serde::Deserialize;

use crate::{
    error::{Result, WattbookError},
    models::{Chapter, PartRef, Session, Story, StoryResponse},
    transform,
};

const BASE_URL: &str = "https://www.wattpad.com";

/// Every fetch carries an explicit timeout; expiry surfaces as an upstream error.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on concurrent chapter/image downloads per pipeline run.
pub const CONCURRENT_REQUESTS: usize = 10;

/// Explicit field selection for the story metadata endpoint. Validated after
/// deserialization, see [`StoryResponse`].
const STORY_FIELDS: &str = "id,title,description,cover,tags,user(name,username),parts(id,title)";

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json,text/html,application/xhtml+xml,*/*;q=0.8"),
    );
    headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/90.0.4430.212 Safari/537.36"));
    headers
}

/// HTTP client for the Wattpad API. Holds no cookie store of its own; an
/// authenticated [`Session`] is passed explicitly to each call so pipeline
/// runs stay isolated.
pub struct WattpadClient {
    client: Client,
    base_url: Url,
}

impl WattpadClient {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .default_headers(default_headers())
                .timeout(REQUEST_TIMEOUT)
                .build()
                .context("failed to build the http client")?,
            base_url: Url::parse(BASE_URL).context("invalid base url")?,
        })
    }

    fn make_url(&self, endpoint: &str) -> Result<Url> {
        Ok(self
            .base_url
            .join(endpoint)
            .with_context(|| format!("invalid endpoint: {}", endpoint))?)
    }

    fn get(&self, url: Url, session: Option<&Session>) -> RequestBuilder {
        let mut request = self.client.get(url);
        if let Some(session) = session {
            if !session.is_empty() {
                request = request.header(COOKIE, session.cookie_header());
            }
        }
        request
    }

    /// Exchange credentials for a session cookie set by emulating the login
    /// form flow: seed pre-auth cookies, submit the form, then probe the jar
    /// for a cookie that was not there before. The provider names the
    /// session cookie, we only require that one appeared.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Session> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(WattbookError::AuthenticationFailed(
                "username and password must both be non-empty".to_string(),
            ));
        }

        info!("Logging into Wattpad");

        // The handshake needs a mutable jar; keep it local to this call so
        // nothing leaks into later requests or other runs.
        let jar = Arc::new(Jar::default());
        let login_client = Client::builder()
            .default_headers(default_headers())
            .cookie_provider(jar.clone())
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build the login client")?;

        let response = login_client.get(self.make_url("login")?).send().await?;
        if !response.status().is_success() {
            return Err(WattbookError::Upstream(format!(
                "login page returned {}",
                response.status()
            )));
        }
        let pre_auth = session_from_jar(&jar, &self.base_url);

        let mut form = HashMap::new();
        form.insert("username", username);
        form.insert("password", password);
        let response = login_client
            .post(self.make_url("auth/login")?)
            .query(&[("nextUrl", "/home")])
            .form(&form)
            .send()
            .await?;

        if response.status().is_client_error() {
            return Err(WattbookError::AuthenticationFailed(
                "the provider rejected the username and/or password".to_string(),
            ));
        }
        if response.status().is_server_error() {
            return Err(WattbookError::Upstream(format!(
                "login endpoint returned {}",
                response.status()
            )));
        }

        let session = session_from_jar(&jar, &self.base_url);
        let pre_auth_names = pre_auth.names();
        let granted = session
            .names()
            .into_iter()
            .filter(|name| !pre_auth_names.contains(name))
            .count();
        if granted == 0 {
            // No new cookie means the form bounced back to the login page.
            return Err(WattbookError::AuthenticationFailed(
                "no session cookie was granted; check the username and password".to_string(),
            ));
        }
        debug!("Login granted {} new cookie(s)", granted);

        Ok(session)
    }

    /// Fetch the field-restricted story metadata, including the ordered part
    /// listing.
    pub async fn fetch_story(&self, story_id: u64, session: Option<&Session>) -> Result<Story> {
        debug!("Fetching metadata for story {}", story_id);
        let url = self.make_url(&format!("api/v3/stories/{}", story_id))?;
        let response = self
            .get(url, session)
            .query(&[("fields", STORY_FIELDS)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(WattbookError::Upstream(format!(
                "story metadata request returned {}",
                response.status()
            )));
        }

        let raw = response
            .json::<StoryResponse>()
            .await
            .map_err(|err| WattbookError::Upstream(format!("malformed story metadata: {}", err)))?;

        raw.into_story(story_id)
    }

    /// Fetch the raw HTML of one part. Empty content is valid.
    pub async fn fetch_chapter(&self, part: &PartRef, session: Option<&Session>) -> Result<Chapter> {
        debug!("Fetching part {}", part.id);
        let url = self.make_url("apiv2/")?;
        let part_id = part.id.to_string();
        let response = self
            .get(url, session)
            .query(&[("m", "storytext"), ("id", part_id.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(WattbookError::Upstream(format!(
                "part {} returned {}",
                part.id,
                response.status()
            )));
        }

        let content = response.text().await?;
        // Collect from the sanitized view: an image inside a subtree the
        // transformer drops must not be fetched or embedded.
        let images = transform::referenced_image_urls(&content);
        Ok(Chapter {
            id: part.id,
            title: part.title.clone(),
            content,
            images,
        })
    }

    /// Download one image resource, returning its bytes and media type.
    pub async fn fetch_image(
        &self,
        url: &str,
        session: Option<&Session>,
    ) -> Result<(Bytes, String)> {
        debug!("Fetching image {}", url);
        let url: Url = url
            .parse()
            .map_err(|_| WattbookError::Upstream(format!("invalid image url: {}", url)))?;
        let response = self.get(url.clone(), session).send().await?;

        if !response.status().is_success() {
            return Err(WattbookError::Upstream(format!(
                "image {} returned {}",
                url,
                response.status()
            )));
        }

        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
            .or_else(|| {
                mime_guess::from_path(url.path())
                    .first()
                    .map(|mime| mime.essence_str().to_string())
            })
            .unwrap_or_default();

        if !media_type.starts_with("image/") {
            return Err(WattbookError::Upstream(format!(
                "{} is not an image (content type {:?})",
                url, media_type
            )));
        }

        let data = response.bytes().await?;
        Ok((data, media_type))
    }

    /// Auxiliary lookup: resolve the canonical story id embedded in a part's
    /// share page. The scan depends on the upstream page markup, so this is
    /// best-effort, upstream-error-only, and nothing in the main pipeline
    /// depends on it.
    pub async fn resolve_story_id(&self, part_id: u64) -> Result<String> {
        #[derive(Deserialize)]
        struct PartUrl {
            url: String,
        }

        let url = self.make_url(&format!("api/v3/story_parts/{}", part_id))?;
        let response = self
            .get(url, None)
            .query(&[("fields", "url")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(WattbookError::Upstream(format!(
                "part url request returned {}",
                response.status()
            )));
        }
        let part = response
            .json::<PartUrl>()
            .await
            .map_err(|err| WattbookError::Upstream(format!("malformed part response: {}", err)))?;

        let share_url: Url = part
            .url
            .parse()
            .map_err(|_| WattbookError::Upstream(format!("invalid part url: {}", part.url)))?;
        let page = self.get(share_url, None).send().await?;
        if !page.status().is_success() {
            return Err(WattbookError::Upstream(format!(
                "part page returned {}",
                page.status()
            )));
        }
        let body = page.text().await?;

        extract_story_id(&body).ok_or_else(|| {
            WattbookError::Upstream("could not locate a story link in the part page".to_string())
        })
    }
}

/// Scan a page body for an embedded `wattpad.com/story/{id}` link and return
/// the numeric id.
fn extract_story_id(body: &str) -> Option<String> {
    const MARKER: &str = ":\"https://www.wattpad.com/story/";
    let start = body.find(MARKER)? + MARKER.len();
    let id: String = body[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

fn session_from_jar(jar: &Jar, url: &Url) -> Session {
    match jar.cookies(url) {
        Some(header) => Session::from_cookie_header(header.to_str().unwrap_or_default()),
        None => Session::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn extracts_story_id_from_page_body() {
        let body = r#"...,"url":"https://www.wattpad.com/story/123456-my-story",..."#;
        assert_eq!(extract_story_id(body), Some("123456".to_string()));
    }

    #[test]
    fn story_id_scan_fails_on_unrelated_markup() {
        assert_eq!(extract_story_id("<html><body>nothing here</body></html>"), None);
        assert_eq!(extract_story_id(r#":"https://www.wattpad.com/story/none"#), None);
    }

    #[tokio::test]
    async fn empty_credentials_are_rejected_before_any_request() {
        let client = WattpadClient::new().expect("client");
        let err = client.authenticate("u", "").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        let err = client.authenticate("", "secret").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }
}
