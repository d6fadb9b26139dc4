/// Minimal document model
///
/// Elements live in an arena owned by the `Document` and are addressed by
/// `ElementId`. Only what the image pipeline touches is modelled:
/// attributes, classes, inline style, layout geometry and bubbling events.
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::selector::Selector;

/// Document shared between the pipeline and its load tasks
pub type SharedDocument = Arc<Mutex<Document>>;

/// Handle to an element in a `Document`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementId(usize);

impl ElementId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Axis-aligned box in document coordinates (CSS pixels)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Overlap of two boxes; `None` when they do not touch at all
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right < left || bottom < top {
            return None;
        }
        Some(Rect::new(left, top, right - left, bottom - top))
    }
}

/// A single element
#[derive(Debug, Clone)]
pub struct Element {
    tag: String,
    attributes: BTreeMap<String, String>,
    classes: Vec<String>,
    style: BTreeMap<String, String>,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    rect: Rect,
    complete: bool,
}

impl Element {
    fn new(tag: &str, parent: Option<ElementId>) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attributes: BTreeMap::new(),
            classes: Vec::new(),
            style: BTreeMap::new(),
            parent,
            children: Vec::new(),
            rect: Rect::default(),
            complete: false,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn style(&self, property: &str) -> Option<&str> {
        self.style.get(property).map(String::as_str)
    }

    pub fn parent(&self) -> Option<ElementId> {
        self.parent
    }

    pub fn children(&self) -> &[ElementId] {
        &self.children
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// Whether the element's current source has finished loading (or failed)
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// A dispatched custom event
#[derive(Debug, Clone, PartialEq)]
pub struct DomEvent {
    pub name: String,
    pub target: ElementId,
    pub bubbles: bool,
    pub detail: Value,
    /// Elements the event was delivered to, target first
    pub path: Vec<ElementId>,
}

/// The document: element arena plus event subscribers
#[derive(Debug)]
pub struct Document {
    elements: Vec<Element>,
    subscribers: Vec<mpsc::UnboundedSender<DomEvent>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document with an `html` root element
    pub fn new() -> Self {
        Self {
            elements: vec![Element::new("html", None)],
            subscribers: Vec::new(),
        }
    }

    pub fn into_shared(self) -> SharedDocument {
        Arc::new(Mutex::new(self))
    }

    pub fn root(&self) -> ElementId {
        ElementId(0)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Append a new element under `parent`
    pub fn create_element(&mut self, tag: &str, parent: ElementId) -> ElementId {
        let id = ElementId(self.elements.len());
        self.elements.push(Element::new(tag, Some(parent)));
        self.elements[parent.0].children.push(id);
        id
    }

    pub fn element(&self, id: ElementId) -> &Element {
        &self.elements[id.0]
    }

    fn element_mut(&mut self, id: ElementId) -> &mut Element {
        &mut self.elements[id.0]
    }

    pub fn attribute(&self, id: ElementId, name: &str) -> Option<&str> {
        self.element(id).attribute(name)
    }

    pub fn has_attribute(&self, id: ElementId, name: &str) -> bool {
        self.element(id).has_attribute(name)
    }

    pub fn set_attribute(&mut self, id: ElementId, name: &str, value: impl Into<String>) {
        self.element_mut(id)
            .attributes
            .insert(name.to_string(), value.into());
    }

    pub fn remove_attribute(&mut self, id: ElementId, name: &str) -> Option<String> {
        self.element_mut(id).attributes.remove(name)
    }

    pub fn has_class(&self, id: ElementId, class: &str) -> bool {
        self.element(id).has_class(class)
    }

    pub fn add_class(&mut self, id: ElementId, class: &str) {
        let element = self.element_mut(id);
        if !element.has_class(class) {
            element.classes.push(class.to_string());
        }
    }

    pub fn style(&self, id: ElementId, property: &str) -> Option<&str> {
        self.element(id).style(property)
    }

    pub fn set_style(&mut self, id: ElementId, property: &str, value: impl Into<String>) {
        self.element_mut(id)
            .style
            .insert(property.to_string(), value.into());
    }

    pub fn remove_style(&mut self, id: ElementId, property: &str) -> Option<String> {
        self.element_mut(id).style.remove(property)
    }

    pub fn set_rect(&mut self, id: ElementId, rect: Rect) {
        self.element_mut(id).rect = rect;
    }

    pub fn set_complete(&mut self, id: ElementId, complete: bool) {
        self.element_mut(id).complete = complete;
    }

    /// All elements matching `selector`, in document order
    pub fn query_selector_all(&self, selector: &Selector) -> Vec<ElementId> {
        let mut found = Vec::new();
        self.collect_matching(self.root(), selector, &mut found);
        found
    }

    /// Descendants of `scope` (excluding `scope`) matching `selector`
    pub fn descendants_matching(&self, scope: ElementId, selector: &Selector) -> Vec<ElementId> {
        let mut found = Vec::new();
        for &child in self.element(scope).children() {
            self.collect_matching(child, selector, &mut found);
        }
        found
    }

    fn collect_matching(&self, id: ElementId, selector: &Selector, found: &mut Vec<ElementId>) {
        if selector.matches(self, id) {
            found.push(id);
        }
        for &child in self.element(id).children() {
            self.collect_matching(child, selector, found);
        }
    }

    /// Nearest inclusive ancestor matching `selector`
    pub fn closest(&self, id: ElementId, selector: &Selector) -> Option<ElementId> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if selector.matches(self, current) {
                return Some(current);
            }
            cursor = self.element(current).parent();
        }
        None
    }

    /// Receive every event dispatched after this call
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<DomEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Dispatch a custom event on `target`
    pub fn dispatch(&mut self, name: &str, target: ElementId, bubbles: bool, detail: Value) {
        let mut path = vec![target];
        if bubbles {
            let mut cursor = self.element(target).parent();
            while let Some(ancestor) = cursor {
                path.push(ancestor);
                cursor = self.element(ancestor).parent();
            }
        }
        let event = DomEvent {
            name: name.to_string(),
            target,
            bubbles,
            detail,
            path,
        };
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
