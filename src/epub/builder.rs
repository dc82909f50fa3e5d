use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Context;
use askama::Template;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::{debug, info};

use crate::{
    error::{Result, WattbookError},
    models::{Chapter, EmbeddedResource, Story},
    templates::{ChapterXhtml, ContainerXml, ContentOpf, ManifestItem, NavPoint, Toc},
};

use super::zip::ZipArchive;

const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";
const LANGUAGE: &str = "en";

lazy_static! {
    static ref OEBPS: PathBuf = PathBuf::from("OEBPS");
}

/// Owns the output document structure: metadata, cover, ordered chapter
/// resources, manifest, spine and table of contents. Chapters must be
/// supplied in the story's part order; the builder refuses anything else.
pub struct EpubBuilder<'a> {
    zip: ZipArchive,
    story: &'a Story,
    modified: DateTime<Utc>,
    covers: Vec<ManifestItem>,
    chapters: Vec<ManifestItem>,
    navpoints: Vec<NavPoint>,
    images: Vec<ManifestItem>,
}

impl<'a> EpubBuilder<'a> {
    pub fn new(story: &'a Story) -> Result<Self> {
        let mut epub = EpubBuilder {
            zip: ZipArchive::new()?,
            story,
            modified: Utc::now(),
            covers: Default::default(),
            chapters: Default::default(),
            navpoints: Default::default(),
            images: Default::default(),
        };

        epub.zip.write_file(
            "META-INF/container.xml",
            ContainerXml
                .render()
                .context("failed to render container.xml")?
                .as_bytes(),
        )?;

        Ok(epub)
    }

    /// Pin the document's `dc:date`. Defaults to now; the only
    /// time-varying field of an otherwise deterministic serialization.
    pub fn modified(&mut self, at: DateTime<Utc>) -> &mut Self {
        self.modified = at;
        self
    }

    /// Embed the designated cover resource, if any.
    pub fn cover(&mut self, cover: Option<&EmbeddedResource>) -> Result<&mut Self> {
        if let Some(resource) = cover {
            debug!("Embedding cover {}", resource.local_name);
            self.zip
                .write_file(OEBPS.join(&resource.local_name), resource.data.as_ref())?;
            self.covers.push(ManifestItem {
                id: "cover-image".to_string(),
                href: resource.local_name.clone(),
                media_type: resource.media_type.clone(),
            });
        }
        Ok(self)
    }

    /// Insert chapters into the spine in the exact order supplied, after
    /// checking that order against the story's part listing.
    pub fn chapters(&mut self, chapters: &[Chapter]) -> Result<&mut Self> {
        let expected = self.story.chapter_ids();
        let supplied: Vec<u64> = chapters.iter().map(|chapter| chapter.id).collect();
        if supplied != expected {
            return Err(WattbookError::IncompleteInput(format!(
                "chapter sequence {:?} does not match the story's part listing {:?}",
                supplied, expected
            )));
        }

        for (idx, chapter) in chapters.iter().enumerate() {
            let ordinal = idx + 1;
            let href = format!("chapter-{:03}.xhtml", ordinal);
            let label = if chapter.title.trim().is_empty() {
                format!("Chapter {}", ordinal)
            } else {
                chapter.title.clone()
            };

            let xhtml = ChapterXhtml {
                title: &label,
                body: &chapter.content,
            };
            self.zip.write_file(
                OEBPS.join(&href),
                xhtml
                    .render()
                    .context("failed to render chapter xhtml")?
                    .as_bytes(),
            )?;

            self.chapters.push(ManifestItem {
                id: format!("chapter-{:03}", ordinal),
                href: href.clone(),
                media_type: XHTML_MEDIA_TYPE.to_string(),
            });
            self.navpoints.push(NavPoint {
                order: ordinal,
                label,
                href,
            });
        }

        info!("Added {} chapters to the spine", self.chapters.len());
        Ok(self)
    }

    /// Embed image resources referenced by the chapters. Local names must be
    /// unique within the document.
    pub fn images(&mut self, resources: &[EmbeddedResource]) -> Result<&mut Self> {
        let mut seen: HashSet<&str> = self.covers.iter().map(|item| item.href.as_str()).collect();
        for resource in resources {
            if !seen.insert(&resource.local_name) {
                return Err(WattbookError::IncompleteInput(format!(
                    "duplicate resource name in manifest: {}",
                    resource.local_name
                )));
            }
            self.zip
                .write_file(OEBPS.join(&resource.local_name), resource.data.as_ref())?;
            let id = PathBuf::from(&resource.local_name)
                .file_stem()
                .and_then(|stem| stem.to_str().map(str::to_string))
                .ok_or_else(|| {
                    WattbookError::IncompleteInput(format!(
                        "resource name has no stem: {}",
                        resource.local_name
                    ))
                })?;
            self.images.push(ManifestItem {
                id,
                href: resource.local_name.clone(),
                media_type: resource.media_type.clone(),
            });
        }
        Ok(self)
    }

    /// Produce the final container bytes. All-or-nothing; any failure here
    /// leaves no usable document behind.
    pub fn serialize(mut self) -> Result<bytes::Bytes> {
        self.render_opf()?;
        self.render_toc()?;
        self.zip.finish()
    }

    /// Render content.opf (metadata + manifest + spine).
    fn render_opf(&mut self) -> Result<()> {
        let identifier = format!("wattpad:{}", self.story.id);
        let modified = self.modified.format("%Y-%m-%d").to_string();
        let content_opf = ContentOpf {
            identifier: &identifier,
            title: &self.story.title,
            author: &self.story.author,
            description: &self.story.description,
            language: LANGUAGE,
            modified: &modified,
            subjects: &self.story.tags,
            covers: &self.covers,
            chapters: &self.chapters,
            images: &self.images,
        };

        self.zip.write_file(
            OEBPS.join("content.opf"),
            content_opf
                .render()
                .context("failed to render content.opf")?
                .as_bytes(),
        )
    }

    /// Render the flat toc.ncx, one entry per chapter.
    fn render_toc(&mut self) -> Result<()> {
        let uid = format!("wattpad:{}", self.story.id);
        self.zip.write_file(
            OEBPS.join("toc.ncx"),
            Toc {
                uid: &uid,
                title: &self.story.title,
                author: &self.story.author,
                navpoints: &self.navpoints,
            }
            .render()
            .context("failed to render toc.ncx")?
            .as_bytes(),
        )
    }
}
