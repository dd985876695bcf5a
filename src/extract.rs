//! Content extractor: pulls the task link, the excerpt and the
//! second-system view URL out of a notification body.
//!
//! "Which occurrence" is never hardcoded here: every search takes a skip
//! count from [`RulesConfig`] and resolves it through [`pick`].

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node};

use crate::config::{ExcerptStrategy, RulesConfig};
use crate::html::{
    LINKS, ROWS, STYLED_CELLS, clean_element, element_text, nth_table, pick, style_contains,
};

static BARE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("static regex is valid"));

/// A hyperlink found in the body: visible text and target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedLink {
    pub text: String,
    pub url: String,
}

/// What the primary path extracted. A missing link means nothing is relayed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionResult {
    /// Cleaned text, still entity-escaped (see [`clean_element`]).
    pub excerpt: Option<String>,
    pub link: Option<TrackedLink>,
}

/// Run the primary-path extraction (link + excerpt).
pub fn extract_primary(rules: &RulesConfig, doc: &Html) -> ExtractionResult {
    ExtractionResult {
        link: extract_link(doc, &rules.link_origin, rules.link_skip),
        excerpt: extract_excerpt(doc, &rules.excerpt, rules.excerpt_skip),
    }
}

/// Find links pointing under `origin` and pick one after `skip` boilerplate links.
///
/// Links without visible text (image-only anchors such as logos) are not
/// counted. The returned text is trimmed; the URL is entity-decoded.
pub fn extract_link(doc: &Html, origin: &str, skip: usize) -> Option<TrackedLink> {
    let links = doc.select(&LINKS).filter_map(|a| {
        let url = a.value().attr("href")?.trim();
        if !url.starts_with(origin) {
            return None;
        }
        let text = element_text(a);
        if text.is_empty() {
            return None;
        }
        Some(TrackedLink {
            text,
            url: url.to_string(),
        })
    });
    pick(links, skip)
}

/// Pick an excerpt block after `skip` boilerplate blocks and clean it.
///
/// The text keeps `&`, `<` and `>` escaped. Returns `None` when no block
/// exists or the cleaned text is empty.
pub fn extract_excerpt(doc: &Html, strategy: &ExcerptStrategy, skip: usize) -> Option<String> {
    let block = match strategy {
        ExcerptStrategy::Rows => pick(doc.select(&ROWS), skip),
        ExcerptStrategy::StyledCells { signature } => pick(
            doc.select(&STYLED_CELLS)
                .filter(|td| style_contains(*td, signature)),
            skip,
        ),
    }?;
    let text = clean_element(block);
    (!text.is_empty()).then_some(text)
}

/// Find the URL following `label` inside the table after `table_skip` tables.
///
/// The URL is either the `href` of the first link after the label or a bare
/// `http(s)://` URL in the text after it, whichever comes first.
pub fn extract_secondary_url(doc: &Html, table_skip: usize, label: &str) -> Option<String> {
    let table = nth_table(doc, table_skip)?;
    url_after_label(table, label)
}

fn url_after_label(scope: ElementRef<'_>, label: &str) -> Option<String> {
    // Text seen so far; the label may be split across several text nodes.
    let mut seen = String::new();
    let mut after_label = false;

    for node in scope.descendants() {
        match node.value() {
            Node::Text(text) if after_label => {
                if let Some(url) = bare_url(text) {
                    return Some(url);
                }
            }
            Node::Text(text) => {
                seen.push_str(text);
                if let Some(pos) = seen.find(label) {
                    after_label = true;
                    if let Some(url) = bare_url(&seen[pos + label.len()..]) {
                        return Some(url);
                    }
                }
            }
            Node::Element(el) if after_label && el.name() == "a" => {
                if let Some(href) = el.attr("href").map(str::trim).filter(|h| !h.is_empty()) {
                    return Some(href.to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn bare_url(text: &str) -> Option<String> {
    BARE_URL.find(text).map(|m| {
        m.as_str()
            .trim_end_matches(['.', ',', ';', ':', ')', '!', '?'])
            .to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "https://tracker.example/";

    fn doc(html: &str) -> Html {
        Html::parse_document(html)
    }

    // ── Link extraction ─────────────────────────────────────────────

    #[test]
    fn no_matching_links() {
        let d = doc(r#"<a href="https://other.example/1">Other</a>"#);
        assert_eq!(extract_link(&d, ORIGIN, 1), None);
    }

    #[test]
    fn single_link_is_used_verbatim() {
        let d = doc(r#"<p>See <a href="https://tracker.example/issue/PRJ-7">  PRJ-7 Broken build </a></p>"#);
        assert_eq!(
            extract_link(&d, ORIGIN, 1),
            Some(TrackedLink {
                text: "PRJ-7 Broken build".into(),
                url: "https://tracker.example/issue/PRJ-7".into(),
            })
        );
    }

    #[test]
    fn second_of_several_links_is_selected() {
        let d = doc(
            r#"<a href="https://tracker.example/X">Task #1</a>
               <a href="https://elsewhere.example/Z">Unrelated</a>
               <a href="https://tracker.example/Y">Task #2</a>
               <a href="https://tracker.example/W">Task #3</a>"#,
        );
        assert_eq!(
            extract_link(&d, ORIGIN, 1),
            Some(TrackedLink {
                text: "Task #2".into(),
                url: "https://tracker.example/Y".into(),
            })
        );
    }

    #[test]
    fn skip_count_is_configurable() {
        let d = doc(
            r#"<a href="https://tracker.example/X">Task #1</a>
               <a href="https://tracker.example/Y">Task #2</a>"#,
        );
        assert_eq!(extract_link(&d, ORIGIN, 0).unwrap().text, "Task #1");
    }

    #[test]
    fn image_only_links_are_not_counted() {
        let d = doc(
            r#"<a href="https://tracker.example/"><img src="logo.png"></a>
               <a href="https://tracker.example/issue/A-1">A-1</a>"#,
        );
        assert_eq!(extract_link(&d, ORIGIN, 1).unwrap().url, "https://tracker.example/issue/A-1");
    }

    #[test]
    fn link_url_entities_are_decoded() {
        let d = doc(r#"<a href="https://tracker.example/issue?id=1&amp;tab=2">x</a>"#);
        assert_eq!(
            extract_link(&d, ORIGIN, 1).unwrap().url,
            "https://tracker.example/issue?id=1&tab=2"
        );
    }

    #[test]
    fn nested_markup_in_link_text() {
        let d = doc(r#"<a href="https://tracker.example/T"><b>PRJ-9</b> Login fails</a>"#);
        assert_eq!(extract_link(&d, ORIGIN, 1).unwrap().text, "PRJ-9 Login fails");
    }

    // ── Excerpt extraction ──────────────────────────────────────────

    const STYLE: &str = "padding: 12px 16px;background: rgb(240, 240, 240)";

    fn styled() -> ExcerptStrategy {
        ExcerptStrategy::StyledCells {
            signature: STYLE.into(),
        }
    }

    #[test]
    fn styled_cell_excerpt_picks_second_match() {
        let d = doc(&format!(
            r#"<table>
                <tr><td style="{STYLE}">Header cell</td></tr>
                <tr><td style="color: red">not styled</td></tr>
                <tr><td style="{STYLE}"><img src="a.png"> Ivan: <a href="https://tracker.example/u/ivan">@petr</a> please
                    check</td></tr>
            </table>"#
        ));
        assert_eq!(
            extract_excerpt(&d, &styled(), 1),
            Some("Ivan: @petr please check".into())
        );
    }

    #[test]
    fn styled_cell_excerpt_single_match() {
        let d = doc(&format!(r#"<table><tr><td style="{STYLE}">Only one</td></tr></table>"#));
        assert_eq!(extract_excerpt(&d, &styled(), 1), Some("Only one".into()));
    }

    #[test]
    fn row_excerpt_strategy() {
        let d = doc(
            "<table><tr><td>Logo</td></tr><tr><td>State:</td><td>Fixed</td></tr></table>",
        );
        assert_eq!(
            extract_excerpt(&d, &ExcerptStrategy::Rows, 1),
            Some("State: Fixed".into())
        );
    }

    #[test]
    fn no_blocks_means_no_excerpt() {
        let d = doc("<p>plain</p>");
        assert_eq!(extract_excerpt(&d, &ExcerptStrategy::Rows, 1), None);
        assert_eq!(extract_excerpt(&d, &styled(), 1), None);
    }

    #[test]
    fn empty_block_means_no_excerpt() {
        let d = doc(&format!(
            r#"<table><tr><td style="{STYLE}">x</td></tr><tr><td style="{STYLE}"><img src="a.png"> </td></tr></table>"#
        ));
        assert_eq!(extract_excerpt(&d, &styled(), 1), None);
    }

    #[test]
    fn excerpt_stays_escaped() {
        let d = doc(
            "<table><tr><td>x</td></tr><tr><td>Use &lt;br&gt; tags, AT&amp;amp;T</td></tr></table>",
        );
        let excerpt = extract_excerpt(&d, &ExcerptStrategy::Rows, 1).unwrap();
        assert_eq!(excerpt, "Use &lt;br&gt; tags, AT&amp;amp;T");
        assert_eq!(crate::html::clean_fragment(&excerpt), excerpt);
    }

    // ── Secondary URL ───────────────────────────────────────────────

    fn crm(second_table: &str) -> Html {
        doc(&format!(
            "<table><tr><td>Bitrix24</td></tr></table><table><tr><td>{second_table}</td></tr></table>"
        ))
    }

    #[test]
    fn secondary_url_from_link_after_label() {
        let d = crm(r#"Борисевич. Просмотр: <a href="https://crm.example/view/42">here</a>"#);
        assert_eq!(
            extract_secondary_url(&d, 1, "Просмотр:"),
            Some("https://crm.example/view/42".into())
        );
    }

    #[test]
    fn secondary_url_bare_text() {
        let d = crm("Просмотр: https://crm.example/view/7.");
        assert_eq!(
            extract_secondary_url(&d, 1, "Просмотр:"),
            Some("https://crm.example/view/7".into())
        );
    }

    #[test]
    fn secondary_url_decodes_entities() {
        let d = crm(r#"Просмотр: <a href="https://crm.example/view?id=42&amp;lang=ru">here</a>"#);
        assert_eq!(
            extract_secondary_url(&d, 1, "Просмотр:"),
            Some("https://crm.example/view?id=42&lang=ru".into())
        );
    }

    #[test]
    fn secondary_url_ignores_links_before_label() {
        let d = crm(
            r#"<a href="https://crm.example/profile">Борисевич</a> Просмотр: <a href="https://crm.example/view/9">open</a>"#,
        );
        assert_eq!(
            extract_secondary_url(&d, 1, "Просмотр:"),
            Some("https://crm.example/view/9".into())
        );
    }

    #[test]
    fn secondary_label_split_across_nodes() {
        let d = crm(r#"<b>Просм</b>отр: <a href="https://crm.example/view/3">open</a>"#);
        assert_eq!(
            extract_secondary_url(&d, 1, "Просмотр:"),
            Some("https://crm.example/view/3".into())
        );
    }

    #[test]
    fn secondary_url_only_looks_in_inspected_table() {
        let d = doc(
            r#"<table><tr><td>Просмотр: <a href="https://crm.example/view/1">x</a></td></tr></table>
               <table><tr><td>nothing here</td></tr></table>"#,
        );
        assert_eq!(extract_secondary_url(&d, 1, "Просмотр:"), None);
    }

    #[test]
    fn secondary_url_missing_table() {
        let d = doc("<table><tr><td>Просмотр: https://crm.example/view/1</td></tr></table>");
        assert_eq!(extract_secondary_url(&d, 1, "Просмотр:"), None);
    }

    // ── Combined ────────────────────────────────────────────────────

    #[test]
    fn primary_extraction_combines_link_and_excerpt() {
        let rules = RulesConfig::new(vec!["*".into()], ORIGIN).with_excerpt(ExcerptStrategy::Rows);
        let d = doc(
            r#"<table>
                <tr><td><a href="https://tracker.example/">YouTrack</a></td></tr>
                <tr><td>Comment: <a href="https://tracker.example/issue/P-1">P-1 Crash</a></td></tr>
            </table>"#,
        );
        let result = extract_primary(&rules, &d);
        assert_eq!(result.link.unwrap().text, "P-1 Crash");
        assert_eq!(result.excerpt.as_deref(), Some("Comment: P-1 Crash"));
    }
}
