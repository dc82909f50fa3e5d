use askama::Template; // bring trait in scope

/// One `<item>` of the package manifest.
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
}

/// One flat entry of the navigation map.
pub struct NavPoint {
    pub order: usize,
    pub label: String,
    pub href: String,
}

#[derive(Template)]
#[template(path = "container.xml", escape = "html")]
pub struct ContainerXml;

#[derive(Template)]
#[template(path = "chapter.xhtml", escape = "html")]
pub struct ChapterXhtml<'a> {
    pub title: &'a str,
    pub body: &'a str,
}

#[derive(Template)]
#[template(path = "content.opf", escape = "html")]
pub struct ContentOpf<'a> {
    pub identifier: &'a str,
    pub title: &'a str,
    pub author: &'a str,
    pub description: &'a str,
    pub language: &'a str,
    pub modified: &'a str,
    pub subjects: &'a [String],
    /// Zero or one designated cover resource.
    pub covers: &'a [ManifestItem],
    pub chapters: &'a [ManifestItem],
    pub images: &'a [ManifestItem],
}

#[derive(Template)]
#[template(path = "toc.ncx", escape = "html")]
pub struct Toc<'a> {
    pub uid: &'a str,
    pub title: &'a str,
    pub author: &'a str,
    pub navpoints: &'a [NavPoint],
}
