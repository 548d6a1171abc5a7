// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Streaming XML primitives shared by the metadata formats.

Reading is a thin pull layer over [quick_xml::Reader]. Elements are matched by local
name, so namespace prefixes never matter, and anything a format does not know is
skipped.

Writing produces a fixed layout (two space indentation, one element per line, text
inline) so that rendering is byte stable.
*/

use {
    crate::error::{MirrorError, Result},
    quick_xml::{
        events::{BytesStart, Event},
        Reader,
    },
    std::io::BufRead,
};

/// Pull parser over an XML document.
pub struct XmlReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    file: &'static str,
}

impl<R: BufRead> XmlReader<R> {
    /// Construct an instance reading the named metadata file.
    pub fn new(source: R, file: &'static str) -> Self {
        Self {
            reader: Reader::from_reader(source),
            buf: vec![],
            file,
        }
    }

    /// The name of the file being parsed.
    pub fn file(&self) -> &'static str {
        self.file
    }

    /// Construct a [MirrorError::MetadataParse] for this file.
    pub fn error(&self, element: impl ToString, message: impl ToString) -> MirrorError {
        MirrorError::parse(self.file, element, message)
    }

    /// Obtain the next event.
    pub fn next(&mut self) -> Result<Event<'static>> {
        self.buf.clear();

        match self.reader.read_event_into(&mut self.buf) {
            Ok(event) => Ok(event.into_owned()),
            Err(e) => Err(MirrorError::parse(
                self.file,
                format!("offset {}", self.reader.buffer_position()),
                e,
            )),
        }
    }

    /// Advance to the next element named `name`, wherever it is in the document.
    ///
    /// Returns the element and whether it was self-closing, or [None] at end of document.
    pub fn find(&mut self, name: &[u8]) -> Result<Option<(BytesStart<'static>, bool)>> {
        loop {
            match self.next()? {
                Event::Start(e) if e.local_name().as_ref() == name => return Ok(Some((e, false))),
                Event::Empty(e) if e.local_name().as_ref() == name => return Ok(Some((e, true))),
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }

    /// Obtain the next child element of the element named `parent`.
    ///
    /// Text between children is ignored. Returns [None] once the closing tag of the
    /// parent is consumed.
    pub fn next_child(&mut self, parent: &[u8]) -> Result<Option<(BytesStart<'static>, bool)>> {
        loop {
            match self.next()? {
                Event::Start(e) => return Ok(Some((e, false))),
                Event::Empty(e) => return Ok(Some((e, true))),
                Event::End(e) if e.local_name().as_ref() == parent => return Ok(None),
                Event::Eof => {
                    return Err(self.error(
                        String::from_utf8_lossy(parent),
                        "unexpected end of document",
                    ))
                }
                _ => {}
            }
        }
    }

    /// Read the text content of the element just opened.
    ///
    /// Text of nested elements is ignored. Whitespace is preserved.
    pub fn text(&mut self, empty: bool) -> Result<String> {
        let mut text = String::new();

        if empty {
            return Ok(text);
        }

        let mut depth = 0usize;

        loop {
            match self.next()? {
                Event::Text(t) if depth == 0 => {
                    let value = t.unescape().map_err(|e| self.error("text", e))?;
                    text.push_str(&value);
                }
                Event::CData(t) if depth == 0 => {
                    text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
                Event::Start(_) => depth += 1,
                Event::End(_) => {
                    if depth == 0 {
                        return Ok(text);
                    }
                    depth -= 1;
                }
                Event::Eof => return Err(self.error("text", "unexpected end of document")),
                _ => {}
            }
        }
    }

    /// Consume the remainder of the element just opened.
    pub fn finish(&mut self, empty: bool) -> Result<()> {
        if empty {
            return Ok(());
        }

        let mut depth = 0usize;

        loop {
            match self.next()? {
                Event::Start(_) => depth += 1,
                Event::End(_) => {
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                }
                Event::Eof => return Err(self.error("element", "unexpected end of document")),
                _ => {}
            }
        }
    }

    /// Obtain the value of an attribute by local name.
    pub fn attr(&self, e: &BytesStart, name: &[u8]) -> Result<Option<String>> {
        for attr in e.attributes() {
            let attr = attr.map_err(|err| self.error(local_name(e), err))?;

            if attr.key.local_name().as_ref() == name {
                let value = attr
                    .unescape_value()
                    .map_err(|err| self.error(local_name(e), err))?;

                return Ok(Some(value.into_owned()));
            }
        }

        Ok(None)
    }

    /// Obtain the value of an attribute that must be present.
    pub fn required_attr(&self, e: &BytesStart, name: &[u8]) -> Result<String> {
        self.attr(e, name)?.ok_or_else(|| {
            self.error(
                local_name(e),
                format!("missing attribute {}", String::from_utf8_lossy(name)),
            )
        })
    }

    /// Parse an integer attribute.
    pub fn u64_attr(&self, e: &BytesStart, name: &[u8]) -> Result<Option<u64>> {
        match self.attr(e, name)? {
            Some(v) if v.trim().is_empty() => Ok(None),
            Some(v) => v.trim().parse::<u64>().map(Some).map_err(|err| {
                self.error(
                    local_name(e),
                    format!(
                        "invalid integer in {}: {:?} ({})",
                        String::from_utf8_lossy(name),
                        v,
                        err
                    ),
                )
            }),
            None => Ok(None),
        }
    }
}

/// The local name of an element as a string.
pub fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

/// Interpret the loose boolean spellings found in repository metadata.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

/// Builds an XML document with a fixed layout.
pub struct XmlWriter {
    out: String,
    depth: usize,
}

impl XmlWriter {
    /// A new document, starting with the XML declaration.
    pub fn new() -> Self {
        Self {
            out: "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n".to_string(),
            depth: 0,
        }
    }

    /// A new document fragment without declaration.
    pub fn fragment() -> Self {
        Self {
            out: String::new(),
            depth: 0,
        }
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }

    fn open_tag(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.indent();
        self.out.push('<');
        self.out.push_str(name);

        for (key, value) in attrs {
            self.out.push(' ');
            self.out.push_str(key);
            self.out.push_str("=\"");
            self.out.push_str(&quick_xml::escape::escape(*value));
            self.out.push('"');
        }
    }

    /// Write a verbatim line, such as a doctype.
    pub fn raw_line(&mut self, line: &str) {
        self.out.push_str(line);
        self.out.push('\n');
    }

    pub fn start(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.open_tag(name, attrs);
        self.out.push_str(">\n");
        self.depth += 1;
    }

    pub fn end(&mut self, name: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push_str(">\n");
    }

    pub fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.open_tag(name, attrs);
        self.out.push_str("/>\n");
    }

    /// Write an element holding text. Empty text yields a self-closing element.
    pub fn text(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) {
        if text.is_empty() {
            self.empty(name, attrs);
            return;
        }

        self.open_tag(name, attrs);
        self.out.push('>');
        self.out.push_str(&quick_xml::escape::escape(text));
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push_str(">\n");
    }

    /// Write a text element only when a value is present.
    pub fn optional_text(&mut self, name: &str, text: Option<&str>) {
        if let Some(text) = text {
            self.text(name, &[], text);
        }
    }

    pub fn finish(self) -> String {
        self.out
    }
}

impl Default for XmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_text_preserves_whitespace() -> Result<()> {
        let mut reader = XmlReader::new(
            "<root><a x=\"1\"> some\n&amp; text </a><b/></root>".as_bytes(),
            "test.xml",
        );

        let (root, _) = reader.find(b"root")?.unwrap();
        assert_eq!(local_name(&root), "root");

        let (a, empty) = reader.next_child(b"root")?.unwrap();
        assert_eq!(reader.u64_attr(&a, b"x")?, Some(1));
        assert_eq!(reader.text(empty)?, " some\n& text ");

        let (b, empty) = reader.next_child(b"root")?.unwrap();
        assert!(empty);
        assert_eq!(local_name(&b), "b");
        assert!(reader.next_child(b"root")?.is_none());

        Ok(())
    }

    #[test]
    fn bad_integer_names_element() {
        let mut reader = XmlReader::new("<size package=\"abc\"/>".as_bytes(), "primary.xml");
        let (e, _) = reader.find(b"size").unwrap().unwrap();

        match reader.u64_attr(&e, b"package") {
            Err(MirrorError::MetadataParse { file, element, .. }) => {
                assert_eq!(file, "primary.xml");
                assert_eq!(element, "size");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn writer_layout() {
        let mut w = XmlWriter::fragment();
        w.start("a", &[("k", "v\"")]);
        w.text("b", &[], "x < y");
        w.text("c", &[], "");
        w.end("a");

        assert_eq!(
            w.finish(),
            "<a k=\"v&quot;\">\n  <b>x &lt; y</b>\n  <c/>\n</a>\n"
        );
    }
}
