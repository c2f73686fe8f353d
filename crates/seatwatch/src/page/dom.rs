//! Read-only view of a parsed page.
//!
//! There is no browser engine behind a session, so `HtmlDom` lays the
//! document out as rows of rendered text: block elements and `<br>` start
//! a new row, table cells on one row are tab separated. Each row is one
//! `line_height` tall, which gives every element a vertical extent that
//! scrolling and visibility checks can work with.

use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

/// Handle to an element of a [`DomView`], valid for that view only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub usize);

/// Vertical extent of an element in document coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub top: f64,
    pub bottom: f64,
}

/// What the page scripts are allowed to see of a document.
pub trait DomView {
    /// Elements matching a CSS selector, in document order.
    fn query_all(&self, selector: &str) -> Vec<ElementId>;

    /// Rendered text of an element.
    fn text_of(&self, element: ElementId) -> String;

    /// Where the element sits in the document.
    fn visible_rect(&self, element: ElementId) -> Rect;

    /// Rendered text of the whole page, one row per line.
    fn page_text(&self) -> String;
}

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "caption", "center", "dd", "details",
    "div", "dl", "dt", "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3",
    "h4", "h5", "h6", "header", "hr", "html", "li", "main", "nav", "ol", "option", "p", "pre",
    "section", "select", "summary", "table", "tbody", "tfoot", "thead", "tr", "ul",
];
const CELL_TAGS: &[&str] = &["td", "th"];
const SKIPPED_TAGS: &[&str] = &["head", "noscript", "script", "style", "template", "title"];

/// Accumulates rendered rows.
#[derive(Default)]
struct TextLayout {
    lines: Vec<String>,
    current: String,
    text_pushes: usize,
}

impl TextLayout {
    /// Index of the row currently being written.
    fn row(&self) -> usize {
        self.lines.len()
    }

    fn has_pending(&self) -> bool {
        !self.current.trim().is_empty()
    }

    fn break_line(&mut self) {
        if self.has_pending() {
            self.lines.push(self.current.trim().to_string());
        }
        self.current.clear();
    }

    fn push_text(&mut self, text: &str) {
        let mut last_space = self.current.is_empty() || self.current.ends_with(char::is_whitespace);
        let mut pushed = false;
        for ch in text.chars() {
            if ch.is_whitespace() {
                if !last_space {
                    self.current.push(' ');
                    last_space = true;
                }
            } else {
                self.current.push(ch);
                last_space = false;
                pushed = true;
            }
        }
        if pushed {
            self.text_pushes += 1;
        }
    }

    fn push_cell_separator(&mut self) {
        if self.has_pending() {
            let trimmed = self.current.trim_end().len();
            self.current.truncate(trimmed);
            self.current.push('\t');
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.break_line();
        self.lines
    }
}

/// Elements seen during a render, with the rows their text landed on.
#[derive(Default)]
struct Recorder<'a> {
    elements: Vec<ElementRef<'a>>,
    spans: Vec<Option<(usize, usize)>>,
}

/// Walks an element, writing its text into `layout`.
fn render<'a>(
    element: ElementRef<'a>,
    layout: &mut TextLayout,
    mut recorder: Option<&mut Recorder<'a>>,
) {
    let slot = recorder.as_deref_mut().map(|r| {
        r.elements.push(element);
        r.spans.push(None);
        r.elements.len() - 1
    });

    let name = element.value().name();
    if SKIPPED_TAGS.contains(&name) {
        return;
    }

    let is_block = BLOCK_TAGS.contains(&name);
    if is_block || name == "br" {
        layout.break_line();
    }
    if CELL_TAGS.contains(&name) {
        layout.push_cell_separator();
    }

    let start_row = layout.row();
    let pushes_before = layout.text_pushes;

    for child in element.children() {
        match child.value() {
            Node::Text(text) => layout.push_text(text),
            Node::Element(_) => {
                if let Some(child_element) = ElementRef::wrap(child) {
                    render(child_element, layout, recorder.as_deref_mut());
                }
            }
            _ => {}
        }
    }

    if layout.text_pushes > pushes_before {
        let end_row = if layout.has_pending() {
            layout.row()
        } else {
            layout.row().saturating_sub(1).max(start_row)
        };
        if let (Some(r), Some(slot)) = (recorder, slot) {
            r.spans[slot] = Some((start_row, end_row));
        }
    }

    if is_block {
        layout.break_line();
    }
}

/// Renders an element's subtree to text, rows joined by newlines.
pub fn render_text(element: ElementRef<'_>) -> String {
    let mut layout = TextLayout::default();
    render(element, &mut layout, None);
    layout.finish().join("\n")
}

/// [`DomView`] over a document parsed by `scraper`.
pub struct HtmlDom<'a> {
    elements: Vec<ElementRef<'a>>,
    rects: Vec<Rect>,
    lines: Vec<String>,
    line_height: f64,
}

impl<'a> HtmlDom<'a> {
    pub fn new(html: &'a Html, line_height: f64) -> Self {
        let mut recorder = Recorder::default();
        let mut layout = TextLayout::default();
        render(html.root_element(), &mut layout, Some(&mut recorder));

        let lines = layout.finish();
        let rects = recorder
            .spans
            .iter()
            .map(|span| match span {
                Some((start, end)) => Rect {
                    top: *start as f64 * line_height,
                    bottom: (*end + 1) as f64 * line_height,
                },
                None => Rect::default(),
            })
            .collect();

        Self {
            elements: recorder.elements,
            rects,
            lines,
            line_height,
        }
    }

    /// Total rendered height of the document.
    pub fn content_height(&self) -> f64 {
        self.lines.len() as f64 * self.line_height
    }

    pub fn element(&self, id: ElementId) -> Option<ElementRef<'a>> {
        self.elements.get(id.0).copied()
    }
}

impl DomView for HtmlDom<'_> {
    fn query_all(&self, selector: &str) -> Vec<ElementId> {
        let selector = match Selector::parse(selector) {
            Ok(selector) => selector,
            Err(e) => {
                debug!("Ignoring unparseable selector '{}': {:?}", selector, e);
                return Vec::new();
            }
        };

        self.elements
            .iter()
            .enumerate()
            .filter(|(_, element)| selector.matches(element))
            .map(|(index, _)| ElementId(index))
            .collect()
    }

    fn text_of(&self, element: ElementId) -> String {
        self.element(element).map(render_text).unwrap_or_default()
    }

    fn visible_rect(&self, element: ElementId) -> Rect {
        self.rects.get(element.0).copied().unwrap_or_default()
    }

    fn page_text(&self) -> String {
        self.lines.join("\n")
    }
}
