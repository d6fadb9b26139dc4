/// CSS selectors over the document model
///
/// Parsing and matching go through the `selectors` crate on top of
/// `cssparser`. The document is HTML only: namespaces always match, and no
/// pseudo-elements or state pseudo-classes (`:hover`, `:focus`, ...) are
/// recognised. Tree-structural ones (`:not()`, `:first-child`, `:root`)
/// come with the crate.
use std::borrow::{Borrow, Cow};
use std::fmt;
use std::str::FromStr;

use cssparser::{Parser, ParserInput, ToCss};
use selectors::attr::{AttrSelectorOperation, CaseSensitivity, NamespaceConstraint};
use selectors::bloom::BloomFilter;
use selectors::matching::{
    matches_selector, ElementSelectorFlags, MatchingContext, MatchingForInvalidation, MatchingMode,
    NeedsSelectorFlags, QuirksMode, SelectorCaches,
};
use selectors::parser::{ParseRelative, SelectorImpl, SelectorList, SelectorParseErrorKind};
use selectors::OpaqueElement;

use super::document::{Document, ElementId};
use crate::error::SelectorError;

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Identifier, attribute value and name storage for parsed selectors
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CssString(String);

impl CssString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CssString {
    fn from(s: &str) -> Self {
        CssString(s.to_string())
    }
}

impl Borrow<str> for CssString {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl ToCss for CssString {
    fn to_css<W>(&self, dest: &mut W) -> fmt::Result
    where
        W: fmt::Write,
    {
        dest.write_str(&self.0)
    }
}

impl precomputed_hash::PrecomputedHash for CssString {
    fn precomputed_hash(&self) -> u32 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        self.0.hash(&mut hasher);
        hasher.finish() as u32
    }
}

/// Selector flavour for `Document`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentSelectorImpl;

impl SelectorImpl for DocumentSelectorImpl {
    type ExtraMatchingData<'a> = ();
    type AttrValue = CssString;
    type Identifier = CssString;
    type LocalName = CssString;
    type NamespacePrefix = CssString;
    type NamespaceUrl = CssString;
    type BorrowedLocalName = str;
    type BorrowedNamespaceUrl = str;

    type NonTSPseudoClass = PseudoClass;
    type PseudoElement = PseudoElement;
}

/// No state pseudo-classes exist in a static document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PseudoClass {}

impl selectors::parser::NonTSPseudoClass for PseudoClass {
    type Impl = DocumentSelectorImpl;

    fn is_active_or_hover(&self) -> bool {
        match *self {}
    }

    fn is_user_action_state(&self) -> bool {
        match *self {}
    }
}

impl ToCss for PseudoClass {
    fn to_css<W>(&self, _dest: &mut W) -> fmt::Result
    where
        W: fmt::Write,
    {
        match *self {}
    }
}

/// Nothing is rendered, so there are no pseudo-elements either
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PseudoElement {}

impl selectors::parser::PseudoElement for PseudoElement {
    type Impl = DocumentSelectorImpl;
}

impl ToCss for PseudoElement {
    fn to_css<W>(&self, _dest: &mut W) -> fmt::Result
    where
        W: fmt::Write,
    {
        match *self {}
    }
}

/// Parser hooks; the crate defaults reject every non-standard pseudo
struct DocumentSelectorParser;

impl<'i> selectors::parser::Parser<'i> for DocumentSelectorParser {
    type Impl = DocumentSelectorImpl;
    type Error = SelectorParseErrorKind<'i>;
}

/// A parsed, comma-separated selector list
#[derive(Clone)]
pub struct Selector {
    source: String,
    list: SelectorList<DocumentSelectorImpl>,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(SelectorError::Empty);
        }

        let mut input = ParserInput::new(trimmed);
        let mut parser = Parser::new(&mut input);
        let list = SelectorList::parse(&DocumentSelectorParser, &mut parser, ParseRelative::No)
            .map_err(|e| SelectorError::Invalid {
                selector: trimmed.to_string(),
                line: e.location.line,
                column: e.location.column,
                reason: format!("{:?}", e.kind),
            })?;

        Ok(Self {
            source: trimmed.to_string(),
            list,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Does the element match any selector of this list?
    pub fn matches(&self, doc: &Document, id: ElementId) -> bool {
        let element = ElementRef::new(doc, id);
        let mut caches = SelectorCaches::default();
        let mut context = MatchingContext::new(
            MatchingMode::Normal,
            None,
            &mut caches,
            QuirksMode::NoQuirks,
            NeedsSelectorFlags::No,
            MatchingForInvalidation::No,
        );
        self.list
            .slice()
            .iter()
            .any(|selector| matches_selector(selector, 0, None, &element, &mut context))
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Selector").field(&self.source).finish()
    }
}

/// An element seen through the selector matcher
#[derive(Clone, Copy)]
pub struct ElementRef<'a> {
    doc: &'a Document,
    id: ElementId,
}

impl<'a> ElementRef<'a> {
    pub fn new(doc: &'a Document, id: ElementId) -> Self {
        Self { doc, id }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    fn at(&self, id: ElementId) -> Self {
        Self { doc: self.doc, id }
    }

    fn siblings(&self) -> &'a [ElementId] {
        match self.doc.element(self.id).parent() {
            Some(parent) => self.doc.element(parent).children(),
            None => &[],
        }
    }

    fn position(&self) -> Option<usize> {
        self.siblings().iter().position(|&sibling| sibling == self.id)
    }

    /// Attribute value as seen by `[attr]` selectors; classes are kept
    /// apart from the attribute map, so `class` is rebuilt from them
    fn attribute_value(&self, name: &str) -> Option<Cow<'a, str>> {
        let element = self.doc.element(self.id);
        if name.eq_ignore_ascii_case("class") {
            if element.classes().is_empty() {
                return None;
            }
            return Some(Cow::Owned(element.classes().join(" ")));
        }
        element.attribute(name).map(Cow::Borrowed)
    }
}

impl fmt::Debug for ElementRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementRef")
            .field("id", &self.id)
            .field("tag", &self.doc.element(self.id).tag())
            .finish()
    }
}

impl<'a> selectors::Element for ElementRef<'a> {
    type Impl = DocumentSelectorImpl;

    fn opaque(&self) -> OpaqueElement {
        OpaqueElement::new(self.doc.element(self.id))
    }

    fn parent_element(&self) -> Option<Self> {
        self.doc.element(self.id).parent().map(|parent| self.at(parent))
    }

    fn parent_node_is_shadow_root(&self) -> bool {
        false
    }

    fn containing_shadow_host(&self) -> Option<Self> {
        None
    }

    fn is_pseudo_element(&self) -> bool {
        false
    }

    fn prev_sibling_element(&self) -> Option<Self> {
        let index = self.position()?;
        let prev = index.checked_sub(1)?;
        self.siblings().get(prev).map(|&id| self.at(id))
    }

    fn next_sibling_element(&self) -> Option<Self> {
        let index = self.position()?;
        self.siblings().get(index + 1).map(|&id| self.at(id))
    }

    fn first_element_child(&self) -> Option<Self> {
        self.doc
            .element(self.id)
            .children()
            .first()
            .map(|&child| self.at(child))
    }

    fn is_html_element_in_html_document(&self) -> bool {
        true
    }

    fn has_local_name(&self, local_name: &str) -> bool {
        self.doc.element(self.id).tag().eq_ignore_ascii_case(local_name)
    }

    fn has_namespace(&self, ns: &str) -> bool {
        ns.is_empty() || ns == HTML_NAMESPACE
    }

    fn is_same_type(&self, other: &Self) -> bool {
        self.doc.element(self.id).tag() == other.doc.element(other.id).tag()
    }

    fn attr_matches(
        &self,
        ns: &NamespaceConstraint<&CssString>,
        local_name: &CssString,
        operation: &AttrSelectorOperation<&CssString>,
    ) -> bool {
        if let NamespaceConstraint::Specific(url) = ns {
            if !self.has_namespace(url.as_str()) {
                return false;
            }
        }

        let Some(actual) = self.attribute_value(local_name.as_str()) else {
            return false;
        };

        match operation {
            AttrSelectorOperation::Exists => true,
            AttrSelectorOperation::WithValue {
                operator,
                case_sensitivity,
                value,
            } => operator.eval_str(&actual, value.as_str(), *case_sensitivity),
        }
    }

    fn match_non_ts_pseudo_class(
        &self,
        pseudo: &PseudoClass,
        _context: &mut MatchingContext<Self::Impl>,
    ) -> bool {
        match *pseudo {}
    }

    fn match_pseudo_element(
        &self,
        pseudo: &PseudoElement,
        _context: &mut MatchingContext<Self::Impl>,
    ) -> bool {
        match *pseudo {}
    }

    fn is_link(&self) -> bool {
        let element = self.doc.element(self.id);
        matches!(element.tag(), "a" | "area" | "link") && element.has_attribute("href")
    }

    fn is_html_slot_element(&self) -> bool {
        self.doc.element(self.id).tag() == "slot"
    }

    fn has_id(&self, id: &CssString, case_sensitivity: CaseSensitivity) -> bool {
        self.doc
            .element(self.id)
            .attribute("id")
            .is_some_and(|actual| case_sensitivity.eq(actual.as_bytes(), id.as_str().as_bytes()))
    }

    fn has_class(&self, class: &CssString, case_sensitivity: CaseSensitivity) -> bool {
        self.doc
            .element(self.id)
            .classes()
            .iter()
            .any(|c| case_sensitivity.eq(c.as_bytes(), class.as_str().as_bytes()))
    }

    fn imported_part(&self, _name: &CssString) -> Option<CssString> {
        None
    }

    fn is_part(&self, _name: &CssString) -> bool {
        false
    }

    fn is_empty(&self) -> bool {
        self.doc.element(self.id).children().is_empty()
    }

    fn is_root(&self) -> bool {
        self.doc.element(self.id).parent().is_none()
    }

    fn apply_selector_flags(&self, _flags: ElementSelectorFlags) {}

    fn has_custom_state(&self, _name: &CssString) -> bool {
        false
    }

    fn add_element_unique_hashes(&self, _filter: &mut BloomFilter) -> bool {
        false
    }
}
