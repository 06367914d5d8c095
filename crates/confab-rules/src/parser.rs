//! Rule-document markup parser.
//!
//! Hand-written parser for the XML subset the rule files use: one root
//! element, nested elements with quoted attributes, self-closing tags,
//! comments, an optional XML declaration, and the five named entities
//! (`&amp; &lt; &gt; &quot; &apos;`). Processing instructions other than
//! the leading declaration, DOCTYPE, and CDATA are not part of the format
//! and are rejected with a positioned error.

use std::path::{Path, PathBuf};

use confab_core::errors::ParseError;

use crate::tree::Element;

/// Parse a complete document, returning its root element.
pub fn parse_document(path: &Path, source: &str) -> Result<Element, ParseError> {
    let mut parser = Parser::new(path, source);
    parser.skip_prolog()?;
    let root = parser.parse_element()?;
    parser.skip_trailing()?;
    Ok(root)
}

struct Parser {
    path: PathBuf,
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Parser {
    fn new(path: &Path, source: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::malformed(&self.path, self.line, self.column, message)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            let _ = self.bump();
        }
    }

    fn starts_with(&self, prefix: &str) -> bool {
        prefix
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn expect(&mut self, expected: char) -> Result<(), ParseError> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(self.error(format!("expected '{expected}', found '{c}'"))),
            None => Err(self.error(format!("expected '{expected}', found end of input"))),
        }
    }

    /// Skip the XML declaration, comments, and whitespace before the root.
    fn skip_prolog(&mut self) -> Result<(), ParseError> {
        loop {
            self.skip_whitespace();
            if self.starts_with("<?") {
                self.skip_until("?>")?;
            } else if self.starts_with("<!--") {
                self.skip_comment()?;
            } else {
                return Ok(());
            }
        }
    }

    /// Only whitespace and comments may follow the root element.
    fn skip_trailing(&mut self) -> Result<(), ParseError> {
        loop {
            self.skip_whitespace();
            if self.starts_with("<!--") {
                self.skip_comment()?;
            } else if self.peek().is_some() {
                return Err(self.error("content after document root"));
            } else {
                return Ok(());
            }
        }
    }

    fn skip_comment(&mut self) -> Result<(), ParseError> {
        // caller verified the "<!--" prefix
        for _ in 0..4 {
            let _ = self.bump();
        }
        self.skip_until("-->")
    }

    fn skip_until(&mut self, terminator: &str) -> Result<(), ParseError> {
        while !self.starts_with(terminator) {
            if self.bump().is_none() {
                return Err(self.error(format!("unterminated construct, expected '{terminator}'")));
            }
        }
        for _ in 0..terminator.chars().count() {
            let _ = self.bump();
        }
        Ok(())
    }

    fn parse_name(&mut self) -> Result<String, ParseError> {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':') {
                name.push(c);
                let _ = self.bump();
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(self.error("expected a name"));
        }
        Ok(name)
    }

    fn parse_element(&mut self) -> Result<Element, ParseError> {
        self.expect('<')?;
        let name = self.parse_name()?;
        let mut element = Element::new(&name);

        // attributes
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('/') => {
                    let _ = self.bump();
                    self.expect('>')?;
                    return Ok(element);
                }
                Some('>') => {
                    let _ = self.bump();
                    break;
                }
                Some(_) => {
                    let key = self.parse_name()?;
                    self.skip_whitespace();
                    self.expect('=')?;
                    self.skip_whitespace();
                    let value = self.parse_quoted()?;
                    if element.attributes.contains_key(&key) {
                        return Err(self.error(format!("duplicate attribute '{key}'")));
                    }
                    let _ = element.attributes.insert(key, value);
                }
                None => return Err(self.error("unexpected end of input in tag")),
            }
        }

        // content until the matching close tag
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error(format!("unclosed element <{name}>"))),
                Some('<') => {
                    if self.starts_with("<!--") {
                        self.skip_comment()?;
                    } else if self.starts_with("</") {
                        let _ = self.bump();
                        let _ = self.bump();
                        let close = self.parse_name()?;
                        if close != name {
                            return Err(self.error(format!(
                                "mismatched close tag: expected </{name}>, found </{close}>"
                            )));
                        }
                        self.skip_whitespace();
                        self.expect('>')?;
                        element.text = text.trim().to_string();
                        return Ok(element);
                    } else {
                        element.children.push(self.parse_element()?);
                    }
                }
                Some(_) => {
                    text.push_str(&self.parse_text()?);
                }
            }
        }
    }

    fn parse_quoted(&mut self) -> Result<String, ParseError> {
        let quote = match self.bump() {
            Some(c @ ('"' | '\'')) => c,
            Some(c) => return Err(self.error(format!("expected quoted value, found '{c}'"))),
            None => return Err(self.error("expected quoted value, found end of input")),
        };
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated attribute value")),
                Some(c) if c == quote => {
                    let _ = self.bump();
                    return Ok(value);
                }
                Some('&') => value.push(self.parse_entity()?),
                Some('<') => return Err(self.error("raw '<' in attribute value")),
                Some(c) => {
                    value.push(c);
                    let _ = self.bump();
                }
            }
        }
    }

    fn parse_text(&mut self) -> Result<String, ParseError> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            match c {
                '<' => break,
                '&' => text.push(self.parse_entity()?),
                _ => {
                    text.push(c);
                    let _ = self.bump();
                }
            }
        }
        Ok(text)
    }

    fn parse_entity(&mut self) -> Result<char, ParseError> {
        let _ = self.bump(); // '&'
        let mut entity = String::new();
        loop {
            match self.bump() {
                Some(';') => break,
                Some(c) if entity.len() < 8 => entity.push(c),
                _ => return Err(self.error("unterminated entity reference")),
            }
        }
        match entity.as_str() {
            "amp" => Ok('&'),
            "lt" => Ok('<'),
            "gt" => Ok('>'),
            "quot" => Ok('"'),
            "apos" => Ok('\''),
            other => Err(self.error(format!("unknown entity '&{other};'"))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn parse(source: &str) -> Result<Element, ParseError> {
        parse_document(Path::new("test.xml"), source)
    }

    #[test]
    fn minimal_document() {
        let root = parse("<Groups/>").unwrap();
        assert_eq!(root.name, "Groups");
        assert!(root.children.is_empty());
    }

    #[test]
    fn declaration_and_comments_skipped() {
        let root = parse(
            "<?xml version=\"1.0\"?>\n<!-- generated -->\n<Groups>\n  <!-- inner -->\n  <Group name=\"web\"/>\n</Groups>\n<!-- trailing -->",
        )
        .unwrap();
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].attr("name"), Some("web"));
    }

    #[test]
    fn nested_elements_preserve_order() {
        let root = parse(
            r#"<Groups>
                 <Group name="a"><Group name="x"/><Bundle name="b1"/></Group>
                 <Client name="c"><Group name="y" negate="true"/></Client>
               </Groups>"#,
        )
        .unwrap();
        let names: Vec<_> = root.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Group", "Client"]);
        let inner: Vec<_> = root.children[0]
            .children
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(inner, vec!["Group", "Bundle"]);
        assert!(root.children[1].children[0].flag("negate"));
    }

    #[test]
    fn single_quoted_attributes() {
        let root = parse("<Path name='/etc/foo.conf' owner='root'/>").unwrap();
        assert_eq!(root.attr("name"), Some("/etc/foo.conf"));
        assert_eq!(root.attr("owner"), Some("root"));
    }

    #[test]
    fn entities_decoded_in_attributes_and_text() {
        let root =
            parse("<Path name=\"a&amp;b\">x &lt; y &gt; &quot;z&quot; &apos;w&apos;</Path>")
                .unwrap();
        assert_eq!(root.attr("name"), Some("a&b"));
        assert_eq!(root.text, "x < y > \"z\" 'w'");
    }

    #[test]
    fn mismatched_close_tag_is_positioned_error() {
        let err = parse("<Groups>\n<Group name=\"a\"></Groups>").unwrap_err();
        assert_matches!(err, ParseError::Malformed { line: 2, .. });
        assert!(err.to_string().contains("mismatched close tag"));
    }

    #[test]
    fn unclosed_element_is_error() {
        let err = parse("<Groups><Group name=\"a\"/>").unwrap_err();
        assert!(err.to_string().contains("unclosed element"));
    }

    #[test]
    fn duplicate_attribute_is_error() {
        let err = parse("<Group name=\"a\" name=\"b\"/>").unwrap_err();
        assert!(err.to_string().contains("duplicate attribute"));
    }

    #[test]
    fn content_after_root_is_error() {
        let err = parse("<Groups/><Groups/>").unwrap_err();
        assert!(err.to_string().contains("after document root"));
    }

    #[test]
    fn unknown_entity_is_error() {
        let err = parse("<Group name=\"&bogus;\"/>").unwrap_err();
        assert!(err.to_string().contains("unknown entity"));
    }

    #[test]
    fn text_is_trimmed() {
        let root = parse("<Info>\n  some payload\n</Info>").unwrap();
        assert_eq!(root.text, "some payload");
    }
}
