// ABOUTME: Parses sanitized Atom/OData feeds into ordered entry property maps
// ABOUTME: Provides null-aware text, boolean and float field helpers

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::FeedError;

/// One upstream record: the `<m:properties>` children of an Atom `<entry>`.
///
/// Values are keyed by the element's local name (`d:firstName` -> `firstName`).
/// A value of `None` means the provider flagged the field with `m:null="true"`;
/// an element without text maps to `Some("")`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    properties: Option<HashMap<String, Option<String>>>,
}

impl RawEntry {
    /// Build an entry directly from property values (mainly for tests).
    pub fn from_properties<I, K>(properties: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<String>)>,
        K: Into<String>,
    {
        Self {
            properties: Some(
                properties
                    .into_iter()
                    .map(|(k, v)| (k.into(), v))
                    .collect(),
            ),
        }
    }

    /// Whether the entry carried a properties block at all.
    pub fn has_properties(&self) -> bool {
        self.properties.is_some()
    }

    /// Number of property elements found in the entry.
    pub fn len(&self) -> usize {
        self.properties.as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Text content of `tag`, or `None` when it is missing or explicitly null.
pub fn text<'a>(entry: &'a RawEntry, tag: &str) -> Option<&'a str> {
    entry
        .properties
        .as_ref()
        .and_then(|props| props.get(tag))
        .and_then(|value| value.as_deref())
}

/// Case-insensitive comparison against `"true"`; anything else is `false`.
pub fn bool_value(text: Option<&str>) -> bool {
    text.map_or(false, |t| t.eq_ignore_ascii_case("true"))
}

/// Float value of `tag`; missing, null and unparsable text all give `None`.
pub fn float(entry: &RawEntry, tag: &str) -> Option<f64> {
    let raw = text(entry, tag)?.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<f64>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Could not convert '{}' to float for tag '{}'", raw, tag);
            None
        }
    }
}

/// Field currently being collected inside a properties block.
struct OpenField {
    name: String,
    depth: usize,
    is_null: bool,
    text: String,
}

/// Entry currently being collected.
struct OpenEntry {
    depth: usize,
    properties_depth: Option<usize>,
    properties: Option<HashMap<String, Option<String>>>,
    field: Option<OpenField>,
}

impl OpenEntry {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            properties_depth: None,
            properties: None,
            field: None,
        }
    }

    fn in_properties(&self) -> bool {
        self.properties_depth.is_some()
    }

    fn finish(self) -> RawEntry {
        RawEntry {
            properties: self.properties,
        }
    }
}

/// Parse a sanitized feed document into its entries, in document order.
///
/// Every `<entry>` element anywhere in the document becomes one [`RawEntry`].
/// Fails with [`FeedError::Malformed`] when the document is not well-formed;
/// the error carries the byte offset where the reader stopped.
pub fn parse(xml: &str) -> Result<Vec<RawEntry>, FeedError> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut current: Option<OpenEntry> = None;
    let mut depth = 0usize;
    let mut saw_root = false;

    loop {
        let event = reader.read_event().map_err(|e| FeedError::Malformed {
            position: reader.buffer_position() as u64,
            message: e.to_string(),
        })?;

        match event {
            Event::Start(start) => {
                let is_null = element_is_null(&start, depth, saw_root, &reader)?;
                depth += 1;
                saw_root = true;
                open_element(&mut current, &start, depth, false, is_null);
            }
            Event::Empty(start) => {
                let is_null = element_is_null(&start, depth, saw_root, &reader)?;
                saw_root = true;
                // Self-closing elements open and close at the next depth.
                open_element(&mut current, &start, depth + 1, true, is_null);
                close_element(&mut current, &mut entries, depth + 1);
            }
            Event::End(_) => {
                close_element(&mut current, &mut entries, depth);
                depth = depth.saturating_sub(1);
            }
            Event::Text(t) => {
                let unescaped = t.unescape().map_err(|e| FeedError::Malformed {
                    position: reader.buffer_position() as u64,
                    message: e.to_string(),
                })?;
                if depth == 0 {
                    if !unescaped.trim().is_empty() {
                        return Err(FeedError::Malformed {
                            position: reader.buffer_position() as u64,
                            message: "text outside the root element".to_string(),
                        });
                    }
                } else if let Some(field) = current.as_mut().and_then(|e| e.field.as_mut()) {
                    if depth == field.depth {
                        field.text.push_str(&unescaped);
                    }
                }
            }
            Event::CData(c) => {
                if depth == 0 {
                    return Err(FeedError::Malformed {
                        position: reader.buffer_position() as u64,
                        message: "CDATA outside the root element".to_string(),
                    });
                }
                if let Some(field) = current.as_mut().and_then(|e| e.field.as_mut()) {
                    if depth == field.depth {
                        field.text.push_str(&String::from_utf8_lossy(&c));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(FeedError::Malformed {
            position: reader.buffer_position() as u64,
            message: format!("document ended with {} unclosed element(s)", depth),
        });
    }
    if !saw_root {
        return Err(FeedError::Malformed {
            position: 0,
            message: "document has no root element".to_string(),
        });
    }

    Ok(entries)
}

/// Reject a second root element and check every attribute of `start`.
/// Returns whether the element is marked `m:null="true"`.
fn element_is_null(
    start: &BytesStart<'_>,
    depth: usize,
    saw_root: bool,
    reader: &Reader<&[u8]>,
) -> Result<bool, FeedError> {
    if depth == 0 && saw_root {
        return Err(FeedError::Malformed {
            position: reader.buffer_position() as u64,
            message: "document has more than one root element".to_string(),
        });
    }
    is_null_marked(start).map_err(|message| FeedError::Malformed {
        position: reader.buffer_position() as u64,
        message,
    })
}

fn open_element(
    current: &mut Option<OpenEntry>,
    start: &BytesStart<'_>,
    depth: usize,
    self_closing: bool,
    is_null: bool,
) {
    let local = start.local_name();
    let name = local.as_ref();

    let Some(entry) = current.as_mut() else {
        if name == b"entry" {
            *current = Some(OpenEntry::new(depth));
        }
        return;
    };

    match entry.properties_depth {
        None if name == b"properties" && entry.properties.is_none() => {
            entry.properties_depth = Some(depth);
            entry.properties = Some(HashMap::new());
            if self_closing {
                entry.properties_depth = None;
            }
        }
        Some(props_depth) if depth == props_depth + 1 => {
            entry.field = Some(OpenField {
                name: String::from_utf8_lossy(name).into_owned(),
                depth,
                is_null,
                text: String::new(),
            });
        }
        _ => {}
    }
}

fn close_element(current: &mut Option<OpenEntry>, entries: &mut Vec<RawEntry>, depth: usize) {
    let Some(entry) = current.as_mut() else {
        return;
    };

    if let Some(field) = entry.field.as_ref() {
        if field.depth == depth {
            if let Some(field) = entry.field.take() {
                let value = if field.is_null { None } else { Some(field.text) };
                if let Some(props) = entry.properties.as_mut() {
                    props.insert(field.name, value);
                }
            }
            return;
        }
    }

    if entry.in_properties() && entry.properties_depth == Some(depth) {
        entry.properties_depth = None;
        return;
    }

    if entry.depth == depth {
        if let Some(done) = current.take() {
            entries.push(done.finish());
        }
    }
}

/// True when the element carries the metadata `null="true"` attribute.
/// Every attribute is decoded, so malformed ones are reported on any element.
fn is_null_marked(start: &BytesStart<'_>) -> Result<bool, String> {
    let mut is_null = false;
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        if attr.key.local_name().as_ref() == b"null" {
            is_null = value.trim().eq_ignore_ascii_case("true");
        }
    }
    Ok(is_null)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="utf-8" standalone="yes"?>
<feed xml:base="https://api4.marketsharpm.com/WcfDataService.svc/"
      xmlns:d="http://schemas.microsoft.com/ado/2007/08/dataservices"
      xmlns:m="http://schemas.microsoft.com/ado/2007/08/dataservices/metadata"
      xmlns="http://www.w3.org/2005/Atom">
  <title type="text">Employees</title>
  <entry>
    <id>https://api4.marketsharpm.com/WcfDataService.svc/Employees(guid'1')</id>
    <content type="application/xml">
      <m:properties>
        <d:id m:type="Edm.Guid">8f14e45f-ceea-467f-a0e6-b1f2c3d4e5f6</d:id>
        <d:name>Smith &amp; Jones</d:name>
        <d:isActive m:type="Edm.Boolean">true</d:isActive>
        <d:companyId m:type="Edm.Int32" m:null="true" />
        <d:notes></d:notes>
      </m:properties>
    </content>
  </entry>
  <entry>
    <content type="application/xml">
      <m:properties>
        <d:id m:type="Edm.Guid">c9f0f895-fb98-4b91-99f5-1a2b3c4d5e6f</d:id>
        <d:name><![CDATA[<b>bold</b>]]></d:name>
        <d:latitude m:type="Edm.Double">41.8781</d:latitude>
      </m:properties>
    </content>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_preserves_entry_order() {
        let entries = parse(FEED).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            text(&entries[0], "id"),
            Some("8f14e45f-ceea-467f-a0e6-b1f2c3d4e5f6")
        );
        assert_eq!(
            text(&entries[1], "id"),
            Some("c9f0f895-fb98-4b91-99f5-1a2b3c4d5e6f")
        );
    }

    #[test]
    fn test_text_unescapes_entities_and_cdata() {
        let entries = parse(FEED).unwrap();
        assert_eq!(text(&entries[0], "name"), Some("Smith & Jones"));
        assert_eq!(text(&entries[1], "name"), Some("<b>bold</b>"));
    }

    #[test]
    fn test_null_marker_distinct_from_empty() {
        let entries = parse(FEED).unwrap();
        assert_eq!(text(&entries[0], "companyId"), None);
        assert_eq!(text(&entries[0], "notes"), Some(""));
        assert_eq!(text(&entries[0], "missing"), None);
    }

    #[test]
    fn test_float_helper() {
        let entries = parse(FEED).unwrap();
        assert_eq!(float(&entries[1], "latitude"), Some(41.8781));
        assert_eq!(float(&entries[1], "name"), None);
        assert_eq!(float(&entries[0], "companyId"), None);
        assert_eq!(float(&entries[0], "missing"), None);
    }

    #[test]
    fn test_bool_helper() {
        assert!(bool_value(Some("true")));
        assert!(bool_value(Some("TRUE")));
        assert!(bool_value(Some("True")));
        assert!(!bool_value(Some("false")));
        assert!(!bool_value(Some("")));
        assert!(!bool_value(Some("yes")));
        assert!(!bool_value(None));
    }

    #[test]
    fn test_entry_without_properties() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry><title>x</title></entry></feed>"#;
        let entries = parse(xml).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].has_properties());
        assert!(entries[0].is_empty());
    }

    #[test]
    fn test_empty_feed_has_no_entries() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>Empty</title></feed>"#;
        assert!(parse(xml).unwrap().is_empty());
    }

    #[test]
    fn test_mismatched_tags_are_malformed() {
        let xml = "<feed><entry></feed>";
        let err = parse(xml).unwrap_err();
        assert!(matches!(err, FeedError::Malformed { .. }));
    }

    #[test]
    fn test_unclosed_document_is_malformed() {
        let xml = "<feed><entry><m:properties>";
        assert!(matches!(
            parse(xml).unwrap_err(),
            FeedError::Malformed { .. }
        ));
    }

    #[test]
    fn test_empty_document_is_malformed() {
        assert!(matches!(
            parse("   ").unwrap_err(),
            FeedError::Malformed { .. }
        ));
    }

    fn assert_malformed(xml: &str) {
        match parse(xml) {
            Err(FeedError::Malformed { .. }) => {}
            other => panic!("expected malformed for {:?}, got {:?}", xml, other),
        }
    }

    #[test]
    fn test_bare_ampersand_outside_properties_is_malformed() {
        assert_malformed("<feed><title>A & B</title></feed>");
    }

    #[test]
    fn test_unknown_entity_is_malformed() {
        assert_malformed("<feed>&bogus;</feed>");
    }

    #[test]
    fn test_unquoted_attribute_is_malformed() {
        assert_malformed("<feed><entry foo=bar><title>x</title></entry></feed>");
    }

    #[test]
    fn test_second_root_element_is_malformed() {
        assert_malformed("<feed></feed><feed></feed>");
        assert_malformed("<feed></feed><extra/>");
    }

    #[test]
    fn test_text_outside_root_is_malformed() {
        assert_malformed("<feed></feed>trailing");
        assert_malformed("leading<feed></feed>");
    }

    #[test]
    fn test_whitespace_around_root_is_accepted() {
        let xml = "<?xml version=\"1.0\"?>\n<feed>\n</feed>\n";
        assert!(parse(xml).unwrap().is_empty());
    }
}
