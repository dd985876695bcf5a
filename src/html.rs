//! Structured HTML helpers shared by the classifier and the extractor.
//!
//! All queries go through `scraper`'s tree; nothing here pattern-matches
//! raw markup, so nested or unbalanced tags cannot split a block.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Node, Selector};

pub(crate) static TABLES: LazyLock<Selector> = LazyLock::new(|| selector("table"));
pub(crate) static ROWS: LazyLock<Selector> = LazyLock::new(|| selector("tr"));
pub(crate) static STYLED_CELLS: LazyLock<Selector> = LazyLock::new(|| selector("td[style]"));
pub(crate) static LINKS: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid CSS")
}

/// Elements that visually separate text; a space is inserted around them.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "blockquote", "br", "dd", "div", "dl", "dt", "footer", "h1", "h2", "h3",
    "h4", "h5", "h6", "header", "hr", "li", "ol", "p", "pre", "section", "table", "tbody", "td",
    "tfoot", "th", "thead", "tr", "ul",
];

/// Elements whose content never reaches the excerpt.
const SKIPPED_ELEMENTS: &[&str] = &["img", "script", "style", "head", "title"];

/// Skip `skip` leading boilerplate matches and return the next one.
///
/// When fewer matches exist, falls back to the last available one, so with
/// `skip = 1` two or more matches yield the second and a single match yields
/// itself. An empty sequence yields `None`.
pub fn pick<I: IntoIterator>(items: I, skip: usize) -> Option<I::Item> {
    items.into_iter().take(skip.saturating_add(1)).last()
}

/// The table after `skip` leading tables, or `None` if there are not that many.
///
/// Unlike [`pick`] there is no fallback: rules keyed on "the second table"
/// must not fire on a body with a single table.
pub fn nth_table(doc: &Html, skip: usize) -> Option<ElementRef<'_>> {
    doc.select(&TABLES).nth(skip)
}

/// Visible text of an element: images dropped, links reduced to their text,
/// tags stripped, whitespace collapsed.
pub fn element_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    push_text(el, &mut out);
    collapse_whitespace(&out)
}

fn push_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                let name = child_el.value().name();
                if SKIPPED_ELEMENTS.contains(&name) {
                    continue;
                }
                let block = BLOCK_ELEMENTS.contains(&name);
                if block {
                    out.push(' ');
                }
                push_text(child_el, out);
                if block {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

/// Parse an HTML fragment and return its cleaned visible text, escaped.
///
/// See [`clean_element`]. Cleaning an already-cleaned string returns it unchanged.
pub fn clean_fragment(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    clean_element(fragment.root_element())
}

/// Visible text of an element with `&`, `<` and `>` re-escaped.
///
/// The result is safe to embed in HTML-mode messages as-is, and parsing it
/// again decodes exactly what was escaped, so cleaning is a fixed point.
pub fn clean_element(el: ElementRef<'_>) -> String {
    escape_text(&element_text(el))
}

/// Escape the characters that would otherwise be read back as markup.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Collapse every whitespace run to a single space and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether an element's inline `style` contains `signature`, ignoring
/// whitespace and ASCII case.
pub fn style_contains(el: ElementRef<'_>, signature: &str) -> bool {
    let Some(style) = el.value().attr("style") else {
        return false;
    };
    normalize_style(style).contains(&normalize_style(signature))
}

fn normalize_style(style: &str) -> String {
    style
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
