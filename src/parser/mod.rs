pub mod judgement;
pub mod listing;

use scraper::ElementRef;

/// Concatenated text of an element, skipping subtrees rejected by `skip`.
pub(crate) fn text_without(el: ElementRef, skip: &dyn Fn(ElementRef) -> bool) -> String {
    let mut out = String::new();
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child_el) = ElementRef::wrap(child) {
            if !skip(child_el) {
                out.push_str(&text_without(child_el, skip));
            }
        }
    }
    out
}
