/// Viewport intersection watching
///
/// A watcher holds the elements it observes, in observation order. Each
/// viewport update reports (and stops observing) the elements whose box
/// intersects the viewport grown by the root margin.
use std::str::FromStr;

use cssparser::{BasicParseError, Parser, ParserInput, Token};

use crate::dom::{Document, ElementId, Rect};
use crate::error::ConfigError;

/// A margin length: absolute pixels or a percentage of the viewport side
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Length {
    Px(f64),
    Percent(f64),
}

impl Length {
    fn resolve(self, side: f64) -> f64 {
        match self {
            Length::Px(px) => px,
            Length::Percent(pct) => side * pct / 100.0,
        }
    }

    /// One `px`, `%` or unitless zero token
    fn parse<'i>(input: &mut Parser<'i, '_>) -> Result<Self, BasicParseError<'i>> {
        let location = input.current_source_location();
        match *input.next()? {
            Token::Dimension {
                value, ref unit, ..
            } if unit.eq_ignore_ascii_case("px") => Ok(Length::Px(f64::from(value))),
            Token::Percentage {
                unit_value,
                int_value,
                ..
            } => Ok(Length::Percent(
                int_value.map_or(f64::from(unit_value) * 100.0, f64::from),
            )),
            Token::Number { value, .. } if value == 0.0 => Ok(Length::Px(0.0)),
            ref token => Err(location.new_basic_unexpected_token_error(token.clone())),
        }
    }
}

/// CSS-style margin: top, right, bottom, left
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootMargin {
    pub top: Length,
    pub right: Length,
    pub bottom: Length,
    pub left: Length,
}

impl Default for RootMargin {
    fn default() -> Self {
        Self {
            top: Length::Px(0.0),
            right: Length::Px(0.0),
            bottom: Length::Px(0.0),
            left: Length::Px(0.0),
        }
    }
}

impl RootMargin {
    /// The viewport grown by this margin
    pub fn expand(&self, viewport: Rect) -> Rect {
        let top = self.top.resolve(viewport.height);
        let right = self.right.resolve(viewport.width);
        let bottom = self.bottom.resolve(viewport.height);
        let left = self.left.resolve(viewport.width);
        Rect::new(
            viewport.x - left,
            viewport.y - top,
            viewport.width + left + right,
            viewport.height + top + bottom,
        )
    }
}

impl FromStr for RootMargin {
    type Err = ConfigError;

    /// One to four lengths, expanded like the CSS `margin` shorthand
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::RootMargin(s.to_string());
        let mut input = ParserInput::new(s);
        let mut parser = Parser::new(&mut input);
        let mut lengths = Vec::with_capacity(4);
        while !parser.is_exhausted() {
            lengths.push(Length::parse(&mut parser).map_err(|_| invalid())?);
        }

        let (top, right, bottom, left) = match lengths.as_slice() {
            [all] => (*all, *all, *all, *all),
            [vertical, horizontal] => (*vertical, *horizontal, *vertical, *horizontal),
            [top, horizontal, bottom] => (*top, *horizontal, *bottom, *horizontal),
            [top, right, bottom, left] => (*top, *right, *bottom, *left),
            _ => return Err(invalid()),
        };
        Ok(Self {
            top,
            right,
            bottom,
            left,
        })
    }
}

/// Fraction of `target` inside `root`; `None` when they do not touch.
/// A zero-area target that touches the root counts as fully visible.
pub fn intersection_ratio(target: Rect, root: Rect) -> Option<f64> {
    let overlap = target.intersection(&root)?;
    let area = target.area();
    if area == 0.0 {
        return Some(1.0);
    }
    Some(overlap.area() / area)
}

/// Watches elements for entering the (margin-grown) viewport
#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionWatcher {
    margin: RootMargin,
    threshold: f64,
    observed: Vec<ElementId>,
}

impl IntersectionWatcher {
    pub fn new(margin: RootMargin, threshold: f64) -> Self {
        Self {
            margin,
            threshold: threshold.clamp(0.0, 1.0),
            observed: Vec::new(),
        }
    }

    /// Start observing; observing twice is a no-op
    pub fn observe(&mut self, element: ElementId) {
        if !self.observed.contains(&element) {
            self.observed.push(element);
        }
    }

    pub fn unobserve(&mut self, element: ElementId) -> bool {
        let before = self.observed.len();
        self.observed.retain(|&e| e != element);
        self.observed.len() != before
    }

    pub fn is_observing(&self, element: ElementId) -> bool {
        self.observed.contains(&element)
    }

    pub fn len(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    /// Elements intersecting `viewport`, unobserved before being returned
    pub fn take_intersecting(&mut self, doc: &Document, viewport: Rect) -> Vec<ElementId> {
        let root = self.margin.expand(viewport);
        let threshold = self.threshold;
        let (hits, rest): (Vec<_>, Vec<_>) = self.observed.iter().partition(|&&element| {
            intersection_ratio(doc.element(element).rect(), root)
                .is_some_and(|ratio| ratio > 0.0 && ratio >= threshold)
        });
        self.observed = rest;
        hits
    }
}
