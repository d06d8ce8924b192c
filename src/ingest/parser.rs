// src/ingest/parser.rs
//! RSS 2.0, RSS 1.0 (RDF) and Atom parsing into [`ParsedEntry`] values.
//! Fields the feed does not carry (or that fail to parse) stay `None`;
//! deciding what is mandatory is the pipeline's job.

use chrono::{DateTime, Utc};
use encoding_rs::{Encoding, UTF_8};
use metrics::histogram;
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::borrow::Cow;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::ingest::normalize_text;
use crate::ingest::types::ParsedEntry;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    author: Option<String>,
    /// `dc:creator`; elements are matched by local name.
    creator: Option<String>,
    /// `dc:date`, W3C-DTF.
    date: Option<String>,
    /// `rdf:about` on RSS 1.0 items.
    #[serde(rename = "@about")]
    about: Option<String>,
}

/// RSS 1.0: items are siblings of `<channel>` under `<rdf:RDF>`.
#[derive(Debug, Deserialize)]
struct RdfFeed {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: Option<String>,
    title: Option<Text>,
    published: Option<String>,
    #[serde(default)]
    author: Vec<AtomPerson>,
    #[serde(default)]
    link: Vec<AtomLink>,
}

#[derive(Debug, Deserialize)]
struct AtomPerson {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// Element whose attributes we don't care about (`<guid isPermaLink>`, `<title type>`).
#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Rss,
    Rdf,
    Atom,
}

/// Parse raw feed bytes. Unknown root elements and malformed XML are errors.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<ParsedEntry>> {
    let t0 = std::time::Instant::now();
    let raw = decode_document(bytes);
    let xml_clean = decode_html_entities_for_xml(&raw);

    let out = match sniff_format(&xml_clean) {
        Some(Format::Rss) => parse_rss(&xml_clean)?,
        Some(Format::Rdf) => parse_rdf(&xml_clean)?,
        Some(Format::Atom) => parse_atom(&xml_clean)?,
        None => return Err(Error::Parse("unrecognized feed format".into())),
    };

    histogram!("collector_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(out)
}

/// The root element decides; whichever marker appears first wins.
fn sniff_format(xml: &str) -> Option<Format> {
    [
        ("<rss", Format::Rss),
        ("<rdf:RDF", Format::Rdf),
        ("<RDF", Format::Rdf),
        ("<feed", Format::Atom),
    ]
    .into_iter()
    .filter_map(|(marker, format)| xml.find(marker).map(|pos| (pos, format)))
    .min_by_key(|(pos, _)| *pos)
    .map(|(_, format)| format)
}

fn map_item(it: Item) -> ParsedEntry {
    let published = it
        .pub_date
        .as_deref()
        .and_then(parse_rfc2822)
        .or_else(|| it.date.as_deref().and_then(parse_rfc3339));
    ParsedEntry {
        id: it
            .guid
            .map(|g| g.value)
            .and_then(non_empty)
            .or_else(|| it.about.and_then(non_empty)),
        title: it.title.map(|t| normalize_text(&t)).and_then(non_empty),
        published,
        author: it
            .author
            .and_then(non_empty)
            .or_else(|| it.creator.and_then(non_empty)),
        link: it.link.and_then(non_empty),
    }
}

fn parse_rss(xml: &str) -> Result<Vec<ParsedEntry>> {
    let rss: Rss = from_str(xml).map_err(|e| Error::Parse(format!("rss: {e}")))?;
    Ok(rss.channel.item.into_iter().map(map_item).collect())
}

fn parse_rdf(xml: &str) -> Result<Vec<ParsedEntry>> {
    let rdf: RdfFeed = from_str(xml).map_err(|e| Error::Parse(format!("rdf: {e}")))?;
    Ok(rdf.item.into_iter().map(map_item).collect())
}

fn parse_atom(xml: &str) -> Result<Vec<ParsedEntry>> {
    let feed: AtomFeed = from_str(xml).map_err(|e| Error::Parse(format!("atom: {e}")))?;
    Ok(feed
        .entry
        .into_iter()
        .map(|en| {
            let link = en
                .link
                .iter()
                .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
                .or_else(|| en.link.first())
                .and_then(|l| l.href.clone())
                .and_then(non_empty);
            ParsedEntry {
                id: en.id.and_then(non_empty),
                title: en.title.map(|t| normalize_text(&t.value)).and_then(non_empty),
                published: en.published.as_deref().and_then(parse_rfc3339),
                author: en
                    .author
                    .into_iter()
                    .find_map(|p| p.name)
                    .and_then(non_empty),
                link,
            }
        })
        .collect())
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else if t.len() == s.len() {
        Some(s)
    } else {
        Some(t.to_string())
    }
}

fn to_chrono(dt: OffsetDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), dt.nanosecond())
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .and_then(to_chrono)
        // obsolete zones ("GMT", "EST") are common in the wild
        .or_else(|| {
            DateTime::parse_from_rfc2822(ts)
                .ok()
                .map(|d| d.with_timezone(&Utc))
        })
}

fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    OffsetDateTime::parse(ts, &Rfc3339)
        .ok()
        .and_then(to_chrono)
        .or_else(|| {
            DateTime::parse_from_rfc3339(ts)
                .ok()
                .map(|d| d.with_timezone(&Utc))
        })
}

/// Decode with the charset from the BOM, else the XML declaration, else UTF-8.
/// Undecodable bytes become U+FFFD rather than failing the feed.
fn decode_document(bytes: &[u8]) -> Cow<'_, str> {
    static RE_DECL: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"^\u{feff}?\s*<\?xml[^>]*?encoding\s*=\s*["']([A-Za-z0-9._:-]+)["']"#)
            .expect("xml declaration regex")
    });

    // the declaration itself is ASCII in every charset we can name
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]);
    let declared = RE_DECL
        .captures(&head)
        .and_then(|c| Encoding::for_label(c[1].as_bytes()))
        // a declaration we could read as ASCII rules out UTF-16
        .filter(|enc| enc.is_ascii_compatible())
        .unwrap_or(UTF_8);

    let (text, used, had_errors) = declared.decode(bytes);
    if had_errors {
        tracing::debug!(encoding = used.name(), "feed body had undecodable bytes");
    }
    text
}

/// quick-xml only knows XML's five predefined entities. Feeds routinely
/// carry HTML ones (`&eacute;`, `&hellip;`), so resolve those up front and
/// escape whatever they expand to. Unknown names become literal text.
fn decode_html_entities_for_xml(xml: &str) -> Cow<'_, str> {
    static RE_ENTITY: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"&([A-Za-z][A-Za-z0-9]*);").expect("entity regex"));

    RE_ENTITY.replace_all(xml, |caps: &Captures| {
        let name = &caps[1];
        if matches!(name, "amp" | "lt" | "gt" | "quot" | "apos") {
            return caps[0].to_string();
        }
        let decoded = html_escape::decode_html_entities(&caps[0]);
        if decoded == caps[0] {
            format!("&amp;{name};")
        } else {
            html_escape::encode_text(&decoded).into_owned()
        }
    })
}
