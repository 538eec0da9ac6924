//! Streaming feed rewriter.
//!
//! The raw document is replayed event by event through a `quick-xml` writer,
//! so everything outside entry nodes (declaration, namespace bindings,
//! comments, whitespace) comes out byte for byte as it went in. Entry nodes
//! are buffered until their end tag, then either re-emitted with their link
//! swapped for the article URL or dropped together with their trailing
//! whitespace.

use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesDecl, BytesStart, BytesText, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use quick_xml::Writer;
use std::collections::HashSet;
use thiserror::Error;

use crate::resolve::UrlMapping;
use crate::util::permalink_key;

const ATOM_NS: &[u8] = b"http://www.w3.org/2005/Atom";

/// Errors that can occur while rewriting the raw feed document.
#[derive(Debug, Error)]
pub enum RewriteError {
    /// The document is not well-formed XML.
    #[error("XML error at byte {position}: {source}")]
    Xml {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },
    /// An attribute inside an entry's link could not be read.
    #[error("Malformed attribute: {0}")]
    Attribute(#[from] AttrError),
    /// Writing to the output buffer failed.
    #[error("Failed to serialize rewritten feed: {0}")]
    Write(#[from] std::io::Error),
    /// The document ended in the middle of an entry.
    #[error("Document ended inside an unclosed entry")]
    UnclosedEntry,
}

/// The rewritten document and what happened to its entries.
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    pub document: Vec<u8>,
    pub kept: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    /// `<entry>` in the Atom namespace; link is `<link href="..."/>`.
    Atom,
    /// Unqualified RSS `<item>`; link is `<link>text</link>`.
    Rss,
}

/// Where an entry's link value lives inside its buffered events.
#[derive(Debug)]
struct LinkSlot {
    index: usize,
    value: String,
}

/// Events of one entry, held back until the entry closes.
struct PendingEntry<'i> {
    kind: EntryKind,
    events: Vec<Event<'i>>,
    depth: usize,
    link: Option<LinkSlot>,
    /// Inside the first direct-child RSS `<link>` and still waiting for its text.
    in_rss_link: bool,
}

impl<'i> PendingEntry<'i> {
    fn new(kind: EntryKind, start: Event<'i>) -> Self {
        Self {
            kind,
            events: vec![start],
            depth: 0,
            link: None,
            in_rss_link: false,
        }
    }
}

/// Rewrites `raw` so only entries present in `mapping` survive, each pointing
/// at its article URL.
///
/// Entries are matched by the exact link value in the document. A link that
/// appears on more than one entry is kept only the first time, so each
/// mapping key yields at most one entry in the output. If the document has
/// no XML declaration, one is prepended.
///
/// # Errors
///
/// Returns [`RewriteError`] when `raw` is not well-formed XML or ends inside
/// an entry.
pub fn rewrite(raw: &[u8], mapping: &UrlMapping) -> Result<RewriteOutcome, RewriteError> {
    let mut reader = NsReader::from_reader(raw);
    let mut writer = Writer::new(Vec::with_capacity(raw.len()));

    let mut pending: Option<PendingEntry<'_>> = None;
    let mut emitted: HashSet<String> = HashSet::new();
    let mut started = false;
    let mut drop_tail = false;
    let mut kept = 0;
    let mut removed = 0;

    loop {
        let (ns, event) = match reader.read_resolved_event() {
            Ok((ns, event)) => (NsClass::of(&ns), event),
            Err(source) => {
                return Err(RewriteError::Xml {
                    position: reader.buffer_position() as u64,
                    source,
                })
            }
        };

        if !started {
            started = true;
            if !matches!(event, Event::Decl(_)) {
                writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
                writer.write_event(Event::Text(BytesText::new("\n")))?;
            }
        }

        if let Some(entry) = pending.as_mut() {
            if matches!(event, Event::Eof) {
                return Err(RewriteError::UnclosedEntry);
            }
            let closed = track_entry_event(entry, ns, &event, &reader)?;
            entry.events.push(event);
            if closed {
                if let Some(entry) = pending.take() {
                    if emit_entry(&mut writer, entry, mapping, &mut emitted)? {
                        kept += 1;
                    } else {
                        removed += 1;
                        drop_tail = true;
                    }
                }
            }
            continue;
        }

        let tail = std::mem::take(&mut drop_tail);
        match event {
            Event::Eof => break,
            Event::Start(ref e) => match entry_kind(ns, e) {
                Some(kind) => pending = Some(PendingEntry::new(kind, event)),
                None => writer.write_event(event)?,
            },
            Event::Empty(ref e) if entry_kind(ns, e).is_some() => {
                tracing::info!("Removing entry without link");
                removed += 1;
                drop_tail = true;
            }
            Event::Text(ref t) if tail && is_whitespace(t) => {}
            other => writer.write_event(other)?,
        }
    }

    Ok(RewriteOutcome {
        document: writer.into_inner(),
        kept,
        removed,
    })
}

/// Namespace of an element, reduced to what the rewriter cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NsClass {
    Atom,
    Unbound,
    Other,
}

impl NsClass {
    fn of(ns: &ResolveResult<'_>) -> Self {
        match ns {
            ResolveResult::Bound(Namespace(uri)) if *uri == ATOM_NS => NsClass::Atom,
            ResolveResult::Unbound => NsClass::Unbound,
            _ => NsClass::Other,
        }
    }
}

fn entry_kind(ns: NsClass, start: &BytesStart<'_>) -> Option<EntryKind> {
    match (ns, start.local_name().as_ref()) {
        (NsClass::Atom, b"entry") => Some(EntryKind::Atom),
        (NsClass::Unbound, b"item") => Some(EntryKind::Rss),
        _ => None,
    }
}

fn is_link(kind: EntryKind, ns: NsClass, start: &BytesStart<'_>) -> bool {
    if start.local_name().as_ref() != b"link" {
        return false;
    }
    match kind {
        EntryKind::Atom => ns == NsClass::Atom,
        EntryKind::Rss => ns == NsClass::Unbound,
    }
}

/// Updates depth and link bookkeeping for an event about to be buffered.
/// Returns true when the event closes the entry.
fn track_entry_event(
    entry: &mut PendingEntry<'_>,
    ns: NsClass,
    event: &Event<'_>,
    reader: &NsReader<&[u8]>,
) -> Result<bool, RewriteError> {
    let index = entry.events.len();
    match event {
        Event::Start(e) | Event::Empty(e) => {
            let direct_child = entry.depth == 0;
            if direct_child && entry.link.is_none() && is_link(entry.kind, ns, e) {
                match entry.kind {
                    EntryKind::Atom => {
                        if let Some(href) = href_of(e, reader)? {
                            entry.link = Some(LinkSlot { index, value: href });
                        }
                    }
                    EntryKind::Rss => entry.in_rss_link = matches!(event, Event::Start(_)),
                }
            }
            if matches!(event, Event::Start(_)) {
                entry.depth += 1;
            }
        }
        Event::Text(t) if entry.in_rss_link => {
            let value = t.unescape().map_err(|source| RewriteError::Xml {
                position: reader.buffer_position() as u64,
                source,
            })?;
            entry.link = Some(LinkSlot {
                index,
                value: permalink_key(&value),
            });
            entry.in_rss_link = false;
        }
        Event::End(_) => {
            entry.in_rss_link = false;
            if entry.depth == 0 {
                return Ok(true);
            }
            entry.depth -= 1;
        }
        _ => {}
    }
    Ok(false)
}

fn href_of(start: &BytesStart<'_>, reader: &NsReader<&[u8]>) -> Result<Option<String>, RewriteError> {
    for attr in start.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"href" {
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|source| RewriteError::Xml {
                    position: reader.buffer_position() as u64,
                    source,
                })?;
            return Ok(Some(permalink_key(&value)));
        }
    }
    Ok(None)
}

/// Writes a kept entry with its link replaced, or drops it. Returns whether it was kept.
fn emit_entry(
    writer: &mut Writer<Vec<u8>>,
    entry: PendingEntry<'_>,
    mapping: &UrlMapping,
    emitted: &mut HashSet<String>,
) -> Result<bool, RewriteError> {
    let Some(link) = entry.link else {
        tracing::info!("Removing entry without link");
        return Ok(false);
    };

    let article = match mapping.get(&link.value) {
        Some(article) if !emitted.contains(&link.value) => article,
        Some(_) => {
            tracing::info!(permalink = %link.value, "Removing duplicate entry");
            return Ok(false);
        }
        None => {
            tracing::info!(permalink = %link.value, "Removing");
            return Ok(false);
        }
    };

    for (i, event) in entry.events.into_iter().enumerate() {
        if i != link.index {
            writer.write_event(event)?;
            continue;
        }
        match event {
            Event::Start(e) => writer.write_event(Event::Start(with_href(&e, article)?))?,
            Event::Empty(e) => writer.write_event(Event::Empty(with_href(&e, article)?))?,
            Event::Text(_) => writer.write_event(Event::Text(BytesText::new(article)))?,
            other => writer.write_event(other)?,
        }
    }

    tracing::info!(permalink = %link.value, article = %article, "Keeping");
    emitted.insert(link.value);
    Ok(true)
}

/// Copies a start tag, swapping the value of its `href` attribute.
fn with_href(start: &BytesStart<'_>, url: &str) -> Result<BytesStart<'static>, RewriteError> {
    let mut edited = start.to_owned();
    edited.clear_attributes();
    for attr in start.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"href" {
            edited.push_attribute(("href", url));
        } else {
            edited.push_attribute(attr);
        }
    }
    Ok(edited)
}

fn is_whitespace(text: &BytesText<'_>) -> bool {
    text.iter().all(u8::is_ascii_whitespace)
}
