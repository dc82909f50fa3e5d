//! Pure normalization of upstream chapter markup into the XHTML subset the
//! container embeds. No network access; deterministic and idempotent.

use std::collections::{HashMap, HashSet};

use ego_tree::NodeRef;
use lazy_static::lazy_static;
use scraper::{Html, Node, Selector};

use crate::models::Chapter;

lazy_static! {
    static ref IMG_SELECTOR: Selector = Selector::parse("img").unwrap();
    // Tags kept verbatim (attributes stripped, except a[href] and img[src|alt]).
    static ref KEPT_TAGS: HashSet<&'static str> = [
        "p", "b", "strong", "i", "em", "u", "s", "a", "blockquote", "h1", "h2", "h3", "h4",
        "h5", "h6", "ul", "ol", "li", "pre", "code", "sub", "sup",
    ]
    .into_iter()
    .collect();
    // Tags removed together with their content.
    static ref DROPPED_TAGS: HashSet<&'static str> = [
        "script", "style", "iframe", "object", "embed", "form", "button", "input", "video",
        "audio", "svg", "noscript", "head", "title",
    ]
    .into_iter()
    .collect();
}

/// Absolute image urls referenced by `html`, deduplicated, in order of first
/// appearance. Container-local references are not included.
pub fn collect_image_urls(html: &str) -> Vec<String> {
    let fragment = Html::parse_fragment(html);
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for element in fragment.select(&IMG_SELECTOR) {
        if let Some(src) = element.value().attr("src") {
            if (src.starts_with("http://") || src.starts_with("https://"))
                && seen.insert(src.to_string())
            {
                urls.push(src.to_string());
            }
        }
    }
    urls
}

/// Normalize a chapter.
///
/// Strips upstream-specific attributes and unsupported tags. When
/// `embed_images` is true, every image src found in `resources` is rewritten
/// to the resource's container-local name; urls without a resource, and all
/// urls when embedding is off, stay external. The returned chapter's
/// `images` lists the external urls still present after rewriting, so
/// re-running the transform on its own output is a no-op.
pub fn transform(chapter: &Chapter, embed_images: bool, resources: &HashMap<String, String>) -> Chapter {
    let rewrite_src = |src: &str| -> String {
        if embed_images {
            resources
                .get(src)
                .cloned()
                .unwrap_or_else(|| src.to_string())
        } else {
            src.to_string()
        }
    };
    let content = sanitize(&chapter.content, &rewrite_src);
    let images = collect_image_urls(&content);
    Chapter {
        id: chapter.id,
        title: chapter.title.clone(),
        content,
        images,
    }
}

/// Image urls a chapter still references once sanitized. Runs the sanitize
/// pass without rewriting, then collects from its output, so images inside
/// dropped subtrees never get fetched or embedded.
pub fn referenced_image_urls(html: &str) -> Vec<String> {
    collect_image_urls(&sanitize(html, &|src: &str| src.to_string()))
}

/// Reduce arbitrary HTML to the supported subset, applying `rewrite_src` to
/// every image source.
pub fn sanitize<F: Fn(&str) -> String>(html: &str, rewrite_src: &F) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len());
    for child in fragment.root_element().children() {
        emit_node(child, &mut out, rewrite_src);
    }
    out
}

fn emit_node<F: Fn(&str) -> String>(node: NodeRef<'_, Node>, out: &mut String, rewrite_src: &F) {
    match node.value() {
        Node::Text(text) => push_escaped_text(out, text),
        Node::Element(element) => {
            let name = element.name();
            if DROPPED_TAGS.contains(name) {
                return;
            }
            match name {
                "br" => out.push_str("<br/>"),
                "hr" => out.push_str("<hr/>"),
                "img" => {
                    if let Some(src) = element.attr("src") {
                        let src = rewrite_src(src);
                        out.push_str("<img src=\"");
                        push_escaped_attr(out, &src);
                        out.push('"');
                        if let Some(alt) = element.attr("alt") {
                            out.push_str(" alt=\"");
                            push_escaped_attr(out, alt);
                            out.push('"');
                        }
                        out.push_str("/>");
                    }
                }
                _ if KEPT_TAGS.contains(name) => {
                    out.push('<');
                    out.push_str(name);
                    if name == "a" {
                        if let Some(href) = element.attr("href") {
                            out.push_str(" href=\"");
                            push_escaped_attr(out, href);
                            out.push('"');
                        }
                    }
                    out.push('>');
                    for child in node.children() {
                        emit_node(child, out, rewrite_src);
                    }
                    out.push_str("</");
                    out.push_str(name);
                    out.push('>');
                }
                // Unknown wrappers contribute their children only.
                _ => {
                    for child in node.children() {
                        emit_node(child, out, rewrite_src);
                    }
                }
            }
        }
        _ => {
            for child in node.children() {
                emit_node(child, out, rewrite_src);
            }
        }
    }
}

fn push_escaped_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn push_escaped_attr(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(content: &str) -> Chapter {
        Chapter {
            id: 1,
            title: "Part One".to_string(),
            content: content.to_string(),
            images: referenced_image_urls(content),
        }
    }

    fn no_resources() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn strips_upstream_attributes_and_unknown_wrappers() {
        let result = transform(
            &chapter(r#"<div class="panel"><p data-p-id="abc">Hi <b>there</b></p></div>"#),
            false,
            &no_resources(),
        );
        assert_eq!(result.content, "<p>Hi <b>there</b></p>");
    }

    #[test]
    fn drops_scripts_with_their_content() {
        let result = transform(
            &chapter("<p>before</p><script>alert(1)</script><p>after</p>"),
            false,
            &no_resources(),
        );
        assert_eq!(result.content, "<p>before</p><p>after</p>");
    }

    #[test]
    fn collects_image_urls_in_first_appearance_order() {
        let urls = collect_image_urls(
            r#"<p><img src="https://img.example/b.png"/></p>
               <p><img src="https://img.example/a.jpg"/><img src="https://img.example/b.png"/></p>
               <p><img src="images/img-001.jpg"/></p>"#,
        );
        assert_eq!(
            urls,
            vec![
                "https://img.example/b.png".to_string(),
                "https://img.example/a.jpg".to_string(),
            ]
        );
    }

    #[test]
    fn rewrites_embedded_image_sources_from_resource_map() {
        let mut resources = HashMap::new();
        resources.insert(
            "https://img.example/a.jpg".to_string(),
            "images/img-001.jpg".to_string(),
        );
        let result = transform(
            &chapter(r#"<p><img src="https://img.example/a.jpg" alt="a"/></p>"#),
            true,
            &resources,
        );
        assert_eq!(
            result.content,
            r#"<p><img src="images/img-001.jpg" alt="a"/></p>"#
        );
        assert!(result.images.is_empty());
    }

    #[test]
    fn leaves_external_urls_when_embedding_is_off() {
        let result = transform(
            &chapter(r#"<p><img src="https://img.example/a.jpg"/></p>"#),
            false,
            &no_resources(),
        );
        assert_eq!(
            result.content,
            r#"<p><img src="https://img.example/a.jpg"/></p>"#
        );
        assert_eq!(result.images, vec!["https://img.example/a.jpg".to_string()]);
    }

    #[test]
    fn images_inside_dropped_subtrees_are_never_referenced() {
        let content = r#"<p>text</p><form><img src="https://img.example/x.png"/></form>"#;
        // Nothing to fetch: the only image sits in a subtree the sanitizer drops.
        assert!(referenced_image_urls(content).is_empty());

        let mut resources = HashMap::new();
        resources.insert(
            "https://img.example/x.png".to_string(),
            "images/img-001.png".to_string(),
        );
        let result = transform(&chapter(content), true, &resources);
        assert_eq!(result.content, "<p>text</p>");
        assert!(result.images.is_empty());
    }

    #[test]
    fn transform_is_idempotent() {
        let mut resources = HashMap::new();
        resources.insert(
            "https://img.example/a.jpg".to_string(),
            "images/img-001.jpg".to_string(),
        );
        let original = chapter(
            r#"<p data-p-id="1">Fish &amp; Chips <i>forever</i></p>
               <p><img src="https://img.example/a.jpg"/></p>"#,
        );
        for embed in [false, true] {
            let once = transform(&original, embed, &resources);
            let twice = transform(&once, embed, &resources);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn empty_content_is_valid_and_stays_empty() {
        let result = transform(&chapter(""), true, &no_resources());
        assert_eq!(result.content, "");
        assert!(result.images.is_empty());
    }

    #[test]
    fn escapes_text_entities_stably() {
        let once = sanitize("<p>a &lt; b &amp; c</p>", &|s: &str| s.to_string());
        assert_eq!(once, "<p>a &lt; b &amp; c</p>");
        let twice = sanitize(&once, &|s: &str| s.to_string());
        assert_eq!(once, twice);
    }
}
