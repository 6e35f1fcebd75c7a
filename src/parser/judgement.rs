//! Judgement page → [`Record`].
//!
//! The body lives in `div.judgments`. Each child is walked with label
//! inheritance: a node is labeled by its `title` attribute, else its `id`,
//! else the label of its nearest labeled ancestor (`"text"` at the root).

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use super::text_without;
use crate::record::{Record, TextFragment};

static CONTAINER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.judgments").unwrap());
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2.doc_title").unwrap());

const ROOT_LABEL: &str = "text";
const UNTITLED: &str = "Untitled Judgement";
const CONTAINER_TAGS: &[&str] = &["p", "div", "span", "pre", "blockquote"];
const SKIPPED_TAGS: &[&str] = &["script", "style"];

/// Parse a judgement page. Never fails: a page without the judgement
/// container yields a record with no title and no texts.
pub fn extract(html: &str, url: &str) -> Record {
    let document = Html::parse_document(html);
    let mut record = Record::empty(url);

    let Some(container) = document.select(&CONTAINER).next() else {
        return record;
    };

    let title: String = container.select(&TITLE).flat_map(|h| h.text()).collect();
    let title = title.trim().to_string();
    record.title = if title.is_empty() {
        UNTITLED.to_string()
    } else {
        title
    };

    for child in container.children().filter_map(ElementRef::wrap) {
        if SKIPPED_TAGS.contains(&child.value().name()) || is_removed(child) {
            continue;
        }
        if !visible_text(child).trim().is_empty() {
            walk(child, ROOT_LABEL, &mut record.texts);
        }
    }

    record
}

/// Header blocks that are not part of the judgement text.
fn is_removed(el: ElementRef) -> bool {
    let value = el.value();
    value.name() == "h3" || (value.name() == "div" && value.classes().any(|c| c == "covers"))
}

fn visible_text(el: ElementRef) -> String {
    text_without(el, &is_removed)
}

fn label_of<'a>(el: ElementRef<'a>, inherited: &'a str) -> &'a str {
    let value = el.value();
    value
        .attr("title")
        .filter(|t| !t.is_empty())
        .or_else(|| value.attr("id").filter(|i| !i.is_empty()))
        .unwrap_or(inherited)
}

fn walk(el: ElementRef, inherited: &str, out: &mut Vec<TextFragment>) {
    let label = label_of(el, inherited);

    let direct: String = el
        .children()
        .filter_map(|n| n.value().as_text().map(|t| &**t))
        .collect();
    let direct = direct.trim();
    if !direct.is_empty() {
        out.push(TextFragment {
            kind: label.to_string(),
            content: direct.to_string(),
        });
    }

    for child in el.children().filter_map(ElementRef::wrap) {
        let tag = child.value().name();
        if SKIPPED_TAGS.contains(&tag) || is_removed(child) {
            continue;
        }
        let text = visible_text(child);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        if CONTAINER_TAGS.contains(&tag) {
            walk(child, label, out);
        } else {
            out.push(TextFragment {
                kind: label.to_string(),
                content: text.to_string(),
            });
        }
    }
}
