//! One pipeline run: authenticate (optional), fetch metadata, fan out over
//! chapters, fetch images and cover, transform, assemble, serialize.
//!
//! Fetch stages run with bounded concurrency; completion order never leaks
//! into the output because results are index-tagged and re-sorted. The run
//! is one future: dropping it aborts in-flight requests and produces no
//! document.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;

use bytes::Bytes;
use futures::{stream, StreamExt, TryStreamExt};
use log::{debug, info};

use crate::{
    client::{WattpadClient, CONCURRENT_REQUESTS},
    epub::EpubBuilder,
    error::Result,
    models::{Chapter, EmbeddedResource, Story},
    transform,
};

/// A username/password pair. One pair authenticates at most one run.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Credentials(<redacted>)")
    }
}

/// A finished run: the fetched story metadata plus the serialized container.
#[derive(Debug)]
pub struct PipelineOutput {
    pub story: Story,
    pub epub: Bytes,
}

impl PipelineOutput {
    /// Download filename the front end puts into Content-Disposition.
    pub fn filename(&self, embed_images: bool) -> String {
        let slug = sanitize_filename::sanitize(self.story.title.replace(' ', "_"));
        if embed_images {
            format!("{}_{}_images.epub", slug, self.story.id)
        } else {
            format!("{}_{}.epub", slug, self.story.id)
        }
    }
}

/// Entry point used by the HTTP front end: one story id in, one EPUB byte
/// stream (media type `application/epub+zip`) out.
pub async fn run_pipeline(
    client: &WattpadClient,
    story_id: u64,
    embed_images: bool,
    credentials: Option<&Credentials>,
) -> Result<Bytes> {
    Ok(download_story(client, story_id, embed_images, credentials)
        .await?
        .epub)
}

/// Like [`run_pipeline`], but also returns the story metadata so callers can
/// derive filenames and log lines from it.
pub async fn download_story(
    client: &WattpadClient,
    story_id: u64,
    embed_images: bool,
    credentials: Option<&Credentials>,
) -> Result<PipelineOutput> {
    let session = match credentials {
        Some(credentials) => Some(
            client
                .authenticate(&credentials.username, &credentials.password)
                .await?,
        ),
        None => None,
    };
    let session = session.as_ref();

    let story = client.fetch_story(story_id, session).await?;
    info!(
        "\"{}\" by {}: {} chapters",
        story.title,
        story.author,
        story.parts.len()
    );

    let chapters = fetch_ordered(story.parts.clone(), CONCURRENT_REQUESTS, |part| async move {
        client.fetch_chapter(&part, session).await
    })
    .await?;

    let mut resources = Vec::new();
    let mut resource_map = HashMap::new();
    if embed_images {
        let urls = unique_image_urls(&chapters);
        if !urls.is_empty() {
            info!("Downloading {} images", urls.len());
        }
        let fetched = fetch_ordered(urls, CONCURRENT_REQUESTS, |url| async move {
            let (data, media_type) = client.fetch_image(&url, session).await?;
            Ok((url, data, media_type))
        })
        .await?;
        for (idx, (url, data, media_type)) in fetched.into_iter().enumerate() {
            let local_name = format!("images/img-{:03}.{}", idx + 1, extension_for(&media_type));
            resource_map.insert(url.clone(), local_name.clone());
            resources.push(EmbeddedResource {
                url,
                local_name,
                media_type,
                data,
            });
        }
    }

    let cover = match &story.cover_url {
        Some(url) => {
            debug!("Downloading cover");
            let (data, media_type) = client.fetch_image(url, session).await?;
            Some(EmbeddedResource {
                url: url.clone(),
                local_name: format!("images/cover.{}", extension_for(&media_type)),
                media_type,
                data,
            })
        }
        None => None,
    };

    let chapters: Vec<Chapter> = chapters
        .iter()
        .map(|chapter| transform::transform(chapter, embed_images, &resource_map))
        .collect();

    info!("Assembling EPUB");
    let mut epub = EpubBuilder::new(&story)?;
    epub.cover(cover.as_ref())?
        .chapters(&chapters)?
        .images(&resources)?;
    let bytes = epub.serialize()?;

    Ok(PipelineOutput { story, epub: bytes })
}

/// Run `fetch` over `inputs` with bounded concurrency and return the results
/// in input order, regardless of completion order. The first failure aborts
/// everything still in flight.
pub(crate) async fn fetch_ordered<I, T, F, Fut>(
    inputs: Vec<I>,
    concurrency: usize,
    fetch: F,
) -> Result<Vec<T>>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut indexed: Vec<(usize, T)> = stream::iter(inputs.into_iter().enumerate())
        .map(|(idx, input)| {
            let fut = fetch(input);
            async move { fut.await.map(|value| (idx, value)) }
        })
        .buffer_unordered(concurrency)
        .try_collect()
        .await?;
    indexed.sort_by_key(|(idx, _)| *idx);
    Ok(indexed.into_iter().map(|(_, value)| value).collect())
}

/// Image urls referenced across the spine, deduplicated, in first-reference
/// order. One fetch per distinct url per document.
fn unique_image_urls(chapters: &[Chapter]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for chapter in chapters {
        for url in &chapter.images {
            if seen.insert(url.as_str()) {
                urls.push(url.clone());
            }
        }
    }
    urls
}

fn extension_for(media_type: &str) -> &str {
    match media_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        _ => mime_guess::get_mime_extensions_str(media_type)
            .and_then(|extensions| extensions.first())
            .copied()
            .unwrap_or("bin"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WattbookError;
    use std::time::Duration;

    #[tokio::test]
    async fn fan_out_preserves_input_order_despite_latencies() {
        // Later inputs finish first; the output must still follow input order.
        let delays: Vec<(usize, u64)> = vec![40, 1, 25, 5, 15].into_iter().enumerate().collect();
        let results = fetch_ordered(delays, 5, |(idx, delay)| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(idx)
        })
        .await
        .expect("all fetches succeed");
        assert_eq!(results, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn fan_out_aborts_on_first_failure() {
        let inputs = vec![1u64, 2, 3];
        let result = fetch_ordered(inputs, 2, |id| async move {
            if id == 2 {
                Err(WattbookError::Upstream("part 2 timed out".to_string()))
            } else {
                Ok(id)
            }
        })
        .await;
        assert!(matches!(result, Err(WattbookError::Upstream(_))));
    }

    #[test]
    fn image_urls_are_deduplicated_across_chapters() {
        let shared = "https://img.example/shared.jpg".to_string();
        let chapters = vec![
            Chapter {
                id: 1,
                title: "One".to_string(),
                content: String::new(),
                images: vec![shared.clone(), "https://img.example/a.png".to_string()],
            },
            Chapter {
                id: 2,
                title: "Two".to_string(),
                content: String::new(),
                images: vec![shared.clone()],
            },
        ];
        assert_eq!(
            unique_image_urls(&chapters),
            vec![shared, "https://img.example/a.png".to_string()]
        );
    }

    #[test]
    fn extensions_follow_the_media_type() {
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("image/webp"), "webp");
    }

    #[test]
    fn filenames_derive_from_title_and_id() {
        let output = PipelineOutput {
            story: Story {
                id: 123,
                title: "My Great Story".to_string(),
                author: "someone".to_string(),
                description: String::new(),
                tags: Vec::new(),
                cover_url: None,
                parts: Vec::new(),
            },
            epub: Bytes::new(),
        };
        assert_eq!(output.filename(false), "My_Great_Story_123.epub");
        assert_eq!(output.filename(true), "My_Great_Story_123_images.epub");
    }
}
