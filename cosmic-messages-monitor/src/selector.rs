//! Structural Selectors
//!
//! A small CSS-subset selector engine evaluated against any [`DocumentTree`].
//! The host page's markup is not under our control, so every lookup the monitor
//! performs goes through a selector string taken from the configuration table
//! rather than through hardcoded tree walks.
//!
//! ## Supported Syntax
//!
//! - Type selectors (`div`, `span`) and the universal selector `*`
//! - `#id` and `.class`
//! - Attribute tests: `[a]`, `[a=v]`, `[a~=v]`, `[a^=v]`, `[a$=v]`, `[a*=v]`,
//!   with bare, single-quoted or double-quoted values
//! - The `:only-child` pseudo-class
//! - Descendant (whitespace) and child (`>`) combinators
//! - Selector lists separated by `,`
//!
//! ## Example
//!
//! ```rust
//! use cosmic_messages_monitor::Selector;
//!
//! let selector = Selector::parse("[role=grid] > [role=rowgroup], nav .list").unwrap();
//! assert_eq!(selector.source(), "[role=grid] > [role=rowgroup], nav .list");
//! ```

use crate::tree::DocumentTree;
use std::fmt;

/// A compiled selector list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<ComplexSelector>,
}

/// Compound selectors joined by combinators, left to right
#[derive(Debug, Clone, PartialEq, Eq)]
struct ComplexSelector {
    compounds: Vec<CompoundSelector>,
    /// `combinators[i]` joins `compounds[i]` and `compounds[i + 1]`
    combinators: Vec<Combinator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CompoundSelector {
    /// Lowercased tag name, `None` for `*` or an omitted type selector
    tag: Option<String>,
    tests: Vec<SimpleTest>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SimpleTest {
    Id(String),
    Class(String),
    Attribute {
        name: String,
        matcher: Option<(AttributeOp, String)>,
    },
    OnlyChild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttributeOp {
    Equals,
    Includes,
    Prefix,
    Suffix,
    Substring,
}

impl AttributeOp {
    fn test(self, actual: &str, expected: &str) -> bool {
        match self {
            AttributeOp::Equals => actual == expected,
            AttributeOp::Includes => actual.split_whitespace().any(|word| word == expected),
            AttributeOp::Prefix => !expected.is_empty() && actual.starts_with(expected),
            AttributeOp::Suffix => !expected.is_empty() && actual.ends_with(expected),
            AttributeOp::Substring => !expected.is_empty() && actual.contains(expected),
        }
    }
}

impl Selector {
    /// Parse a selector list
    ///
    /// Returns a human-readable reason on failure; callers attach the table
    /// entry name when converting into [`crate::MonitorError::InvalidSelector`].
    pub fn parse(source: &str) -> std::result::Result<Self, String> {
        let mut alternatives = Vec::new();

        for part in split_top_level(source)? {
            let part = part.trim();
            if part.is_empty() {
                return Err("empty selector in list".to_string());
            }
            alternatives.push(Parser::new(part).parse_complex()?);
        }

        if alternatives.is_empty() {
            return Err("empty selector".to_string());
        }

        Ok(Self {
            source: source.trim().to_string(),
            alternatives,
        })
    }

    /// The selector text this was compiled from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Check whether `node` matches any alternative of this selector
    pub fn matches<T: DocumentTree>(&self, tree: &T, node: &T::Node) -> bool {
        self.alternatives
            .iter()
            .any(|complex| complex.matches(tree, node))
    }

    /// First descendant of `scope` (document order) matching this selector
    pub fn query_first<T: DocumentTree>(&self, tree: &T, scope: &T::Node) -> Option<T::Node> {
        tree.descendants(scope)
            .into_iter()
            .find(|node| self.matches(tree, node))
    }

    /// All descendants of `scope` matching this selector, in document order
    pub fn query_all<T: DocumentTree>(&self, tree: &T, scope: &T::Node) -> Vec<T::Node> {
        tree.descendants(scope)
            .into_iter()
            .filter(|node| self.matches(tree, node))
            .collect()
    }

    /// Nearest ancestor-or-self of `node` matching this selector
    pub fn closest<T: DocumentTree>(&self, tree: &T, node: &T::Node) -> Option<T::Node> {
        let mut current = Some(node.clone());
        while let Some(candidate) = current {
            if self.matches(tree, &candidate) {
                return Some(candidate);
            }
            current = tree.parent(&candidate);
        }
        None
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl ComplexSelector {
    fn matches<T: DocumentTree>(&self, tree: &T, node: &T::Node) -> bool {
        let last = self.compounds.len() - 1;
        self.compounds[last].matches(tree, node) && self.matches_left_of(tree, node, last)
    }

    /// Match `compounds[..index]` against the ancestors of `node`, which
    /// already matched `compounds[index]`
    fn matches_left_of<T: DocumentTree>(&self, tree: &T, node: &T::Node, index: usize) -> bool {
        if index == 0 {
            return true;
        }

        let compound = &self.compounds[index - 1];
        match self.combinators[index - 1] {
            Combinator::Child => match tree.parent(node) {
                Some(parent) => {
                    compound.matches(tree, &parent)
                        && self.matches_left_of(tree, &parent, index - 1)
                }
                None => false,
            },
            Combinator::Descendant => {
                let mut current = tree.parent(node);
                while let Some(ancestor) = current {
                    if compound.matches(tree, &ancestor)
                        && self.matches_left_of(tree, &ancestor, index - 1)
                    {
                        return true;
                    }
                    current = tree.parent(&ancestor);
                }
                false
            }
        }
    }
}

impl CompoundSelector {
    fn matches<T: DocumentTree>(&self, tree: &T, node: &T::Node) -> bool {
        let Some(tag) = tree.tag(node) else {
            return false;
        };
        // The document node is never a selector subject
        if tag.starts_with('#') {
            return false;
        }
        if let Some(expected) = &self.tag {
            if !tag.eq_ignore_ascii_case(expected) {
                return false;
            }
        }

        self.tests.iter().all(|test| match test {
            SimpleTest::Id(id) => tree.attribute(node, "id").as_deref() == Some(id.as_str()),
            SimpleTest::Class(class) => tree
                .attribute(node, "class")
                .is_some_and(|value| value.split_whitespace().any(|c| c == class)),
            SimpleTest::Attribute { name, matcher } => match (tree.attribute(node, name), matcher) {
                (Some(_), None) => true,
                (Some(actual), Some((op, expected))) => op.test(&actual, expected),
                (None, _) => false,
            },
            SimpleTest::OnlyChild => tree
                .parent(node)
                .is_some_and(|parent| tree.element_children(&parent).len() == 1),
        })
    }
}

/// Split a selector list on commas that are not inside brackets or quotes
fn split_top_level(source: &str) -> std::result::Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (index, c) in source.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| format!("unbalanced ']' at offset {}", index))?;
            }
            (None, ',') if depth == 0 => {
                parts.push(&source[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }

    if quote.is_some() {
        return Err("unterminated quoted value".to_string());
    }
    if depth != 0 {
        return Err("unterminated attribute test".to_string());
    }

    parts.push(&source[start..]);
    Ok(parts)
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
        }
    }

    fn parse_complex(&mut self) -> std::result::Result<ComplexSelector, String> {
        let mut compounds = vec![self.parse_compound()?];
        let mut combinators = Vec::new();

        loop {
            let saw_space = self.skip_whitespace();
            match self.chars.peek() {
                None => break,
                Some('>') => {
                    self.chars.next();
                    self.skip_whitespace();
                    combinators.push(Combinator::Child);
                }
                Some(_) if saw_space => combinators.push(Combinator::Descendant),
                Some(c) => return Err(format!("unexpected character '{}'", c)),
            }
            compounds.push(self.parse_compound()?);
        }

        Ok(ComplexSelector {
            compounds,
            combinators,
        })
    }

    fn parse_compound(&mut self) -> std::result::Result<CompoundSelector, String> {
        let mut compound = CompoundSelector::default();
        let mut consumed = false;

        match self.chars.peek() {
            Some('*') => {
                self.chars.next();
                consumed = true;
            }
            Some(c) if is_ident_char(*c) => {
                compound.tag = Some(self.parse_ident()?.to_ascii_lowercase());
                consumed = true;
            }
            _ => {}
        }

        while let Some(&c) = self.chars.peek() {
            match c {
                '#' => {
                    self.chars.next();
                    compound.tests.push(SimpleTest::Id(self.parse_ident()?));
                }
                '.' => {
                    self.chars.next();
                    compound.tests.push(SimpleTest::Class(self.parse_ident()?));
                }
                '[' => {
                    self.chars.next();
                    compound.tests.push(self.parse_attribute()?);
                }
                ':' => {
                    self.chars.next();
                    let pseudo = self.parse_ident()?;
                    match pseudo.as_str() {
                        "only-child" => compound.tests.push(SimpleTest::OnlyChild),
                        other => return Err(format!("unsupported pseudo-class ':{}'", other)),
                    }
                }
                _ => break,
            }
            consumed = true;
        }

        if consumed {
            Ok(compound)
        } else {
            match self.chars.peek() {
                Some(c) => Err(format!("expected selector, found '{}'", c)),
                None => Err("expected selector after combinator".to_string()),
            }
        }
    }

    fn parse_attribute(&mut self) -> std::result::Result<SimpleTest, String> {
        self.skip_whitespace();
        let name = self.parse_ident()?;
        self.skip_whitespace();

        let op = match self.chars.next() {
            Some(']') => {
                return Ok(SimpleTest::Attribute {
                    name,
                    matcher: None,
                })
            }
            Some('=') => AttributeOp::Equals,
            Some(prefix @ ('~' | '^' | '$' | '*')) => {
                if self.chars.next() != Some('=') {
                    return Err(format!("expected '=' after '{}'", prefix));
                }
                match prefix {
                    '~' => AttributeOp::Includes,
                    '^' => AttributeOp::Prefix,
                    '$' => AttributeOp::Suffix,
                    _ => AttributeOp::Substring,
                }
            }
            Some(c) => return Err(format!("unexpected '{}' in attribute test", c)),
            None => return Err("unterminated attribute test".to_string()),
        };

        self.skip_whitespace();
        let value = match self.chars.peek().copied() {
            Some(quote) if quote == '"' || quote == '\'' => {
                self.chars.next();
                let mut value = String::new();
                loop {
                    match self.chars.next() {
                        Some(c) if c == quote => break,
                        Some(c) => value.push(c),
                        None => return Err("unterminated quoted value".to_string()),
                    }
                }
                value
            }
            _ => self.parse_bare_value()?,
        };

        self.skip_whitespace();
        match self.chars.next() {
            Some(']') => Ok(SimpleTest::Attribute {
                name,
                matcher: Some((op, value)),
            }),
            _ => Err("unterminated attribute test".to_string()),
        }
    }

    fn parse_ident(&mut self) -> std::result::Result<String, String> {
        let mut ident = String::new();
        while let Some(&c) = self.chars.peek() {
            if !is_ident_char(c) {
                break;
            }
            ident.push(c);
            self.chars.next();
        }
        if ident.is_empty() {
            Err("expected identifier".to_string())
        } else {
            Ok(ident)
        }
    }

    /// Unquoted attribute value: everything up to whitespace or `]`
    fn parse_bare_value(&mut self) -> std::result::Result<String, String> {
        let mut value = String::new();
        while let Some(&c) = self.chars.peek() {
            if c == ']' || c.is_whitespace() {
                break;
            }
            value.push(c);
            self.chars.next();
        }
        if value.is_empty() {
            Err("expected attribute value".to_string())
        } else {
            Ok(value)
        }
    }

    /// Returns true if any whitespace was consumed
    fn skip_whitespace(&mut self) -> bool {
        let mut skipped = false;
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
            skipped = true;
        }
        skipped
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}
