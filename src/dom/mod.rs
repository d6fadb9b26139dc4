/// Document model the image pipeline operates on
///
/// - `document.rs` - element arena, attributes, classes, style, events
/// - `selector.rs` - selector parsing and matching via the `selectors` crate

pub mod document;
pub mod selector;

pub use document::{Document, DomEvent, Element, ElementId, Rect, SharedDocument};
pub use selector::Selector;
