//! Generic helpers over parsed reference pages built on `scraper`.
//!
//! Reference pages are flat: an `h2.api` heading is followed by sibling nodes up to the
//! next heading of the same tag and class. Every section reader here is bounded that way.

use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};

/// Finds the first element matching `headings` whose collapsed text matches `label`.
pub fn find_heading<'a>(
    document: &'a Html,
    headings: &Selector,
    label: &Regex,
) -> Option<ElementRef<'a>> {
    document
        .select(headings)
        .find(|heading| label.is_match(&element_text(heading)))
}

/// Collects every piece of text between `heading` and the next heading of its kind.
///
/// Bare text nodes are trimmed, element text is whitespace-collapsed, and non-empty
/// parts are joined with single spaces.
pub fn section_text(heading: ElementRef<'_>) -> String {
    let mut parts: Vec<String> = Vec::new();
    for node in heading.next_siblings() {
        if let Some(element) = ElementRef::wrap(node) {
            if is_boundary(&element, &heading) {
                break;
            }
            let text = element_text(&element);
            if !text.is_empty() {
                parts.push(text);
            }
        } else if let Node::Text(text) = node.value() {
            let text = collapse_whitespace(text);
            if !text.is_empty() {
                parts.push(text);
            }
        }
    }
    parts.join(" ")
}

/// Returns the first `table` inside the section that `heading` opens.
pub fn section_table<'a>(heading: ElementRef<'a>, tables: &Selector) -> Option<ElementRef<'a>> {
    for node in heading.next_siblings() {
        let Some(element) = ElementRef::wrap(node) else {
            continue;
        };
        if is_boundary(&element, &heading) {
            return None;
        }
        if element.value().name() == "table" {
            return Some(element);
        }
        if let Some(nested) = element.select(tables).next() {
            return Some(nested);
        }
    }
    None
}

/// Serializes table body rows as comma-joined cell texts.
///
/// The first row is treated as the header and skipped. Each remaining row contributes
/// its first `columns` cells; rows with fewer cells, or whose first cell appears in
/// `skip_first_cell`, are dropped.
pub fn table_rows(
    table: ElementRef<'_>,
    rows: &Selector,
    cells: &Selector,
    columns: usize,
    skip_first_cell: &[&str],
) -> Vec<String> {
    let mut extracted = Vec::new();
    for row in table.select(rows).skip(1) {
        let values: Vec<String> = row.select(cells).map(|cell| element_text(&cell)).collect();
        if values.len() < columns.max(1) {
            tracing::debug!(cells = values.len(), columns, "skipping short table row");
            continue;
        }
        if skip_first_cell.contains(&values[0].as_str()) {
            continue;
        }
        extracted.push(values[..columns].join(","));
    }
    extracted
}

/// Flattens a code container, keeping text from styling wrappers and turning `<br>`
/// into newlines. The result is trimmed.
pub fn code_text(container: ElementRef<'_>) -> String {
    let mut code = String::new();
    for node in container.descendants() {
        match node.value() {
            Node::Text(text) => code.push_str(text),
            Node::Element(element) if element.name() == "br" => code.push('\n'),
            _ => {}
        }
    }
    code.trim().to_string()
}

/// First `pre` following `anchor` in document order, bounded to `anchor`'s siblings.
pub fn next_pre<'a>(anchor: ElementRef<'a>, pres: &Selector) -> Option<ElementRef<'a>> {
    if let Some(inner) = anchor.select(pres).next() {
        return Some(inner);
    }
    anchor.next_siblings().filter_map(ElementRef::wrap).find_map(|element| {
        if element.value().name() == "pre" {
            Some(element)
        } else {
            element.select(pres).next()
        }
    })
}

/// Whitespace-collapsed text of an element.
pub fn element_text(element: &ElementRef<'_>) -> String {
    let raw: String = element.text().collect();
    collapse_whitespace(&raw)
}

/// Collapses whitespace runs into single spaces and trims the ends.
pub fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim_end().to_string()
}

fn is_boundary(element: &ElementRef<'_>, heading: &ElementRef<'_>) -> bool {
    let candidate = element.value();
    let heading = heading.value();
    candidate.name() == heading.name()
        && heading
            .classes()
            .all(|class| candidate.classes().any(|other| other == class))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(css: &str) -> Selector {
        Selector::parse(css).unwrap()
    }

    fn heading_regex(label: &str) -> Regex {
        Regex::new(&format!(r"(?i)^\s*{label}\s*$")).unwrap()
    }

    #[test]
    fn section_text_stops_at_next_heading() {
        let html = Html::parse_document(
            r#"<body>
              <h2 class="api">  Description </h2>
              Leading text
              <p>Returns   the <b>active</b> sketch.</p>
              <h3>Not a boundary</h3>
              <h2 class="api">Syntax</h2>
              <p>ignored</p>
            </body>"#,
        );
        let heading =
            find_heading(&html, &selector("h2.api"), &heading_regex("Description")).unwrap();
        assert_eq!(
            section_text(heading),
            "Leading text Returns the active sketch. Not a boundary"
        );
    }

    #[test]
    fn table_rows_skip_header_and_boilerplate() {
        let html = Html::parse_document(
            r#"<body>
              <h2 class="api">Properties</h2>
              <table>
                <tr><th>Name</th><th>Description</th></tr>
                <tr><td>name</td><td>The name.</td></tr>
                <tr><td>isValid</td><td>Validity.</td></tr>
                <tr><td>parent</td><td>The   parent.</td></tr>
              </table>
            </body>"#,
        );
        let heading =
            find_heading(&html, &selector("h2.api"), &heading_regex("Properties")).unwrap();
        let table = section_table(heading, &selector("table")).unwrap();
        let rows = table_rows(
            table,
            &selector("tr"),
            &selector("td"),
            2,
            &["classType", "isValid", "objectType"],
        );
        assert_eq!(rows, vec!["name,The name.", "parent,The parent."]);
    }

    #[test]
    fn section_table_is_bounded_by_section() {
        let html = Html::parse_document(
            r#"<body>
              <h2 class="api">Methods</h2>
              <p>None.</p>
              <h2 class="api">Properties</h2>
              <table><tr><th>h</th></tr></table>
            </body>"#,
        );
        let heading = find_heading(&html, &selector("h2.api"), &heading_regex("Methods")).unwrap();
        assert!(section_table(heading, &selector("table")).is_none());
    }

    #[test]
    fn code_text_unwraps_spans_and_breaks() {
        let html = Html::parse_fragment(
            r#"<pre id="code"><span class="kw">def</span> run():<br/>    <em>pass</em>  </pre>"#,
        );
        let pre = html.select(&selector("pre")).next().unwrap();
        assert_eq!(code_text(pre), "def run():\n    pass");
    }
}
