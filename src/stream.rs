//! Pull tokenizer over MediaWiki export XML.
//!
//! Wraps a streaming `quick_xml` reader and yields one [`DumpToken`] per
//! completed element we care about. Nothing is ever materialized beyond the
//! text of the single leaf element currently open, so memory stays bounded by
//! element depth, not by document size.

use std::io::BufRead;

use quick_xml::events::Event;
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;

use crate::error::ParseError;

/// All MediaWiki export schema versions share this namespace prefix.
const EXPORT_NS_PREFIX: &[u8] = b"http://www.mediawiki.org/xml/export-";

/// Element-completion events, in document order. Everything else in the dump
/// is structural and never surfaces here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpToken {
    /// `<title>` under `<page>`.
    Title(String),
    /// `<ns>` under `<page>`.
    Namespace(String),
    /// `<timestamp>` under `<revision>`.
    Timestamp(String),
    /// `<text>` under `<revision>`.
    Text(String),
    /// `</revision>`.
    RevisionEnd,
    /// `</page>`.
    PageEnd,
}

/// Leaf element whose text content is currently being captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leaf {
    Title,
    Ns,
    Timestamp,
    Text,
}

/// Forward-only, non-restartable cursor over one archive's XML stream.
pub struct DumpTokens<R: BufRead> {
    reader: NsReader<R>,
    buf: Vec<u8>,
    text: String,
    capture: Option<Leaf>,
    in_page: bool,
    in_revision: bool,
}

impl<R: BufRead> DumpTokens<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: NsReader::from_reader(reader),
            buf: Vec::with_capacity(8192),
            text: String::new(),
            capture: None,
            in_page: false,
            in_revision: false,
        }
    }

    /// Next token, or `None` at end of document.
    pub fn next_token(&mut self) -> Result<Option<DumpToken>, ParseError> {
        // The event borrows the scratch buffer, so lend it out for the call.
        let mut buf = std::mem::take(&mut self.buf);
        let result = self.advance(&mut buf);
        self.buf = buf;
        result
    }

    fn advance(&mut self, buf: &mut Vec<u8>) -> Result<Option<DumpToken>, ParseError> {
        loop {
            buf.clear();
            match self.reader.read_event_into(buf) {
                Ok(Event::Start(e)) => {
                    let Some(local) = self.resolve(e.name()) else {
                        continue;
                    };
                    match local.as_slice() {
                        b"page" => self.in_page = true,
                        b"revision" if self.in_page => self.in_revision = true,
                        _ => {
                            if let Some(leaf) = self.classify(&local) {
                                self.capture = Some(leaf);
                                self.text.clear();
                            }
                        }
                    }
                }
                Ok(Event::Empty(e)) => {
                    // Self-closing leaf, e.g. <text deleted="deleted" />.
                    let Some(local) = self.resolve(e.name()) else {
                        continue;
                    };
                    if let Some(leaf) = self.classify(&local) {
                        return Ok(Some(Self::emit(leaf, String::new())));
                    }
                }
                Ok(Event::Text(e)) => {
                    // Entity references arrive separately as GeneralRef, so
                    // text events only need decoding.
                    if self.capture.is_some() {
                        let chunk = e.decode().map_err(quick_xml::Error::from)?;
                        self.text.push_str(&chunk);
                    }
                }
                Ok(Event::CData(e)) => {
                    if self.capture.is_some() {
                        self.text.push_str(&String::from_utf8_lossy(&e));
                    }
                }
                Ok(Event::GeneralRef(e)) => {
                    if self.capture.is_some() {
                        if let Some(ch) =
                            e.resolve_char_ref().map_err(quick_xml::Error::from)?
                        {
                            self.text.push(ch);
                        } else {
                            let name = e.decode().map_err(quick_xml::Error::from)?;
                            match name.as_ref() {
                                "lt" => self.text.push('<'),
                                "gt" => self.text.push('>'),
                                "amp" => self.text.push('&'),
                                "apos" => self.text.push('\''),
                                "quot" => self.text.push('"'),
                                // Export dumps carry no DTD, so anything else
                                // cannot be resolved.
                                _ => {
                                    self.text.push('&');
                                    self.text.push_str(&name);
                                    self.text.push(';');
                                }
                            }
                        }
                    }
                }
                Ok(Event::End(e)) => {
                    let Some(local) = self.resolve(e.name()) else {
                        continue;
                    };
                    match local.as_slice() {
                        b"page" => {
                            self.in_page = false;
                            return Ok(Some(DumpToken::PageEnd));
                        }
                        b"revision" if self.in_revision => {
                            self.in_revision = false;
                            return Ok(Some(DumpToken::RevisionEnd));
                        }
                        _ => {
                            if let Some(leaf) = self.capture.take() {
                                if self.classify(&local) == Some(leaf) {
                                    let text = std::mem::take(&mut self.text);
                                    return Ok(Some(Self::emit(leaf, text)));
                                }
                                // End of some other element while capturing;
                                // should not happen in well-formed dumps.
                                self.capture = Some(leaf);
                            }
                        }
                    }
                }
                Ok(Event::Eof) => return Ok(None),
                Ok(_) => {}
                Err(err) => return Err(ParseError::Xml(err)),
            }
        }
    }

    /// Local name of an export-namespace element, or `None` for foreign ones.
    fn resolve(&self, name: quick_xml::name::QName<'_>) -> Option<Vec<u8>> {
        let (ns, local) = self.reader.resolve_element(name);
        match ns {
            ResolveResult::Bound(ns) if ns.as_ref().starts_with(EXPORT_NS_PREFIX) => {
                Some(local.as_ref().to_vec())
            }
            _ => None,
        }
    }

    /// Recognized leaves, gated on document position so e.g. a `<title>`
    /// inside siteinfo never counts.
    fn classify(&self, local: &[u8]) -> Option<Leaf> {
        match local {
            b"title" if self.in_page && !self.in_revision => Some(Leaf::Title),
            b"ns" if self.in_page && !self.in_revision => Some(Leaf::Ns),
            b"timestamp" if self.in_revision => Some(Leaf::Timestamp),
            b"text" if self.in_revision => Some(Leaf::Text),
            _ => None,
        }
    }

    fn emit(leaf: Leaf, text: String) -> DumpToken {
        match leaf {
            Leaf::Title => DumpToken::Title(text),
            Leaf::Ns => DumpToken::Namespace(text),
            Leaf::Timestamp => DumpToken::Timestamp(text),
            Leaf::Text => DumpToken::Text(text),
        }
    }
}

// ── Tests ──
