use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use scraper::{Html, Selector};

use crate::error::PageError;

static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static H1_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static H2_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2").unwrap());
static H3_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h3").unwrap());
static H4_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h4").unwrap());
static CODE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("code").unwrap());
static CONTENT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p, h1, h2, h3, h4, h5, h6, tr, th, td, code").unwrap());

/// Structured text of one rendered page. Every string is whitespace-normalized
/// and non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageDocument {
    pub title: String,
    pub h1: Vec<String>,
    pub h2: Vec<String>,
    pub h3: Vec<String>,
    pub h4: Vec<String>,
    pub code: Vec<String>,
    /// Paragraphs, headings, table rows/cells and code, in document order.
    pub content: Vec<String>,
}

/// Extract a `PageDocument` from rendered markup.
pub fn extract(markup: &str) -> Result<PageDocument, PageError> {
    let document = Html::parse_document(markup);

    let title = document
        .select(&TITLE_SEL)
        .next()
        .map(|el| normalize_text(&el.text().collect::<String>()))
        .ok_or(PageError::MissingTitle)?;

    Ok(PageDocument {
        title,
        h1: collect(&document, &H1_SEL),
        h2: collect(&document, &H2_SEL),
        h3: collect(&document, &H3_SEL),
        h4: collect(&document, &H4_SEL),
        code: collect(&document, &CODE_SEL),
        content: collect(&document, &CONTENT_SEL),
    })
}

fn collect(document: &Html, selector: &Selector) -> Vec<String> {
    document
        .select(selector)
        .map(|el| normalize_text(&el.text().collect::<String>()))
        .filter(|text| !text.is_empty())
        .collect()
}

/// Collapse whitespace runs to a single space and trim both ends.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Map a sitemap path onto the rendered file: `<root>/<path>/index.html`, or
/// the file itself when the path already names an `.html` page.
pub fn page_file(build_root: &Path, path: &str) -> Result<PathBuf, PageError> {
    let mut file = build_root.to_path_buf();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." || segment.contains('\\') {
            return Err(PageError::UnsafePath(path.to_string()));
        }
        file.push(segment);
    }

    let names_html_file = !path.ends_with('/')
        && file.extension().is_some_and(|ext| ext == "html")
        && file != build_root;
    if !names_html_file {
        file.push("index.html");
    }
    Ok(file)
}

/// Read the markup of the page at `path` under `build_root`.
pub async fn load(build_root: &Path, path: &str) -> Result<String, PageError> {
    let file = page_file(build_root, path)?;
    let bytes = tokio::fs::read(&file)
        .await
        .map_err(|source| PageError::Read {
            path: file.clone(),
            source,
        })?;
    String::from_utf8(bytes).map_err(|_| PageError::Encoding(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> String {
        format!("<!DOCTYPE html><html><head><title>Docs</title></head><body>{body}</body></html>")
    }

    #[test]
    fn normalizes_heading_whitespace() {
        let doc = extract(&page("<h1>  Hello   World  </h1>")).unwrap();
        assert_eq!(doc.h1, vec!["Hello World"]);
        assert_eq!(doc.content, vec!["Hello World"]);
    }

    #[test]
    fn normalize_text_collapses_newlines_and_tabs() {
        assert_eq!(normalize_text("\n\t a \n\n b\t"), "a b");
        assert_eq!(normalize_text(" \n "), "");
    }

    #[test]
    fn collects_each_level_in_document_order() {
        let doc = extract(&page(
            "<h2>Second</h2><h1>First</h1><h3>Third</h3><h4>Fourth</h4><h5>Fifth</h5>\
             <p>Para <em>with</em> emphasis</p><pre><code>let x = 1;\n  x + 1</code></pre>",
        ))
        .unwrap();
        assert_eq!(doc.title, "Docs");
        assert_eq!(doc.h1, vec!["First"]);
        assert_eq!(doc.h2, vec!["Second"]);
        assert_eq!(doc.h3, vec!["Third"]);
        assert_eq!(doc.h4, vec!["Fourth"]);
        assert_eq!(doc.code, vec!["let x = 1; x + 1"]);
        assert_eq!(
            doc.content,
            vec![
                "Second",
                "First",
                "Third",
                "Fourth",
                "Fifth",
                "Para with emphasis",
                "let x = 1; x + 1",
            ]
        );
    }

    #[test]
    fn table_rows_and_cells_both_contribute() {
        let doc = extract(&page(
            "<table><tr><th>Name</th><th>Type</th></tr><tr><td>id</td><td> </td></tr></table>",
        ))
        .unwrap();
        assert_eq!(doc.content, vec!["NameType", "Name", "Type", "id", "id"]);
    }

    #[test]
    fn drops_empty_elements() {
        let doc = extract(&page("<p>   </p><h1></h1><code>\n</code><div>loose text</div>")).unwrap();
        assert!(doc.h1.is_empty());
        assert!(doc.code.is_empty());
        assert!(doc.content.is_empty());
    }

    #[test]
    fn title_is_mandatory() {
        let err = extract("<html><body><h1>No title</h1></body></html>").unwrap_err();
        assert!(matches!(err, PageError::MissingTitle));
    }

    #[test]
    fn title_is_normalized() {
        let doc = extract("<html><head><title>\n  Getting   started \n</title></head></html>").unwrap();
        assert_eq!(doc.title, "Getting started");
    }

    #[test]
    fn extraction_is_deterministic() {
        let markup = page("<h1>A</h1><p>b</p><table><tr><td>c</td></tr></table>");
        assert_eq!(extract(&markup).unwrap(), extract(&markup).unwrap());
    }

    #[test]
    fn page_file_follows_index_convention() {
        let root = Path::new("/site/build");
        assert_eq!(
            page_file(root, "/docs/intro").unwrap(),
            PathBuf::from("/site/build/docs/intro/index.html")
        );
        assert_eq!(
            page_file(root, "/docs/intro/").unwrap(),
            PathBuf::from("/site/build/docs/intro/index.html")
        );
        assert_eq!(page_file(root, "/").unwrap(), PathBuf::from("/site/build/index.html"));
        assert_eq!(
            page_file(root, "/404.html").unwrap(),
            PathBuf::from("/site/build/404.html")
        );
    }

    #[test]
    fn page_file_rejects_traversal() {
        let err = page_file(Path::new("/site/build"), "/docs/../../etc").unwrap_err();
        assert!(matches!(err, PageError::UnsafePath(_)));
    }

    #[tokio::test]
    async fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(dir.path(), "/docs/old-page").await.unwrap_err();
        match err {
            PageError::Read { path, .. } => {
                assert_eq!(path, dir.path().join("docs/old-page/index.html"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn load_rejects_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), [0xff, 0xfe, 0x00]).unwrap();
        let err = load(dir.path(), "/").await.unwrap_err();
        assert!(matches!(err, PageError::Encoding(_)));
    }
}
