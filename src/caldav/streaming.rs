use crate::caldav::types::DavItem;
use anyhow::{Result, anyhow};
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use std::io::{BufRead, Cursor};

/// `DAV:` — WebDAV core properties (`displayname`, `getetag`, `resourcetype`, ...).
const NS_DAV: &[u8] = b"DAV:";
/// `urn:ietf:params:xml:ns:caldav` — CalDAV-specific properties.
const NS_CALDAV: &[u8] = b"urn:ietf:params:xml:ns:caldav";
/// `http://calendarserver.org/ns/` — `getctag` and other CalendarServer extensions.
const NS_CALENDARSERVER: &[u8] = b"http://calendarserver.org/ns/";
/// `http://apple.com/ns/ical/` — Apple's `calendar-color`/`calendar-order`.
const NS_APPLE_ICAL: &[u8] = b"http://apple.com/ns/ical/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementName {
    Multistatus,
    Response,
    Propstat,
    Prop,
    Href,
    Status,
    Displayname,
    Getetag,
    Resourcetype,
    Collection,
    Calendar,
    SupportedCalendarComponentSet,
    Comp,
    CalendarData,
    CalendarDescription,
    CalendarTimezone,
    CalendarColor,
    CalendarColorApple,
    CalendarOrder,
    Getctag,
    SyncToken,
    CalendarHomeSet,
    CurrentUserPrincipal,
    Owner,
    Getcontenttype,
    Getlastmodified,
    Other,
}

/// Classify a start/end tag by its **resolved namespace URI and local
/// name**, not by whatever prefix the server happened to bind. A server is
/// free to rebind `C:` to something else entirely; only the pair
/// `(namespace, local name)` identifies a property unambiguously. This
/// matters concretely for `calendar-color`, which is a *distinct* property
/// under the CalDAV namespace versus Apple's iCal namespace, and the two
/// must never be conflated just because they share a local name.
fn element_from_resolved(ns: ResolveResult<'_>, local: &[u8]) -> ElementName {
    let uri: &[u8] = match ns {
        ResolveResult::Bound(Namespace(uri)) => uri,
        ResolveResult::Unbound | ResolveResult::Unknown(_) => return ElementName::Other,
    };

    if uri == NS_DAV {
        if local.eq_ignore_ascii_case(b"multistatus") {
            ElementName::Multistatus
        } else if local.eq_ignore_ascii_case(b"response") {
            ElementName::Response
        } else if local.eq_ignore_ascii_case(b"propstat") {
            ElementName::Propstat
        } else if local.eq_ignore_ascii_case(b"prop") {
            ElementName::Prop
        } else if local.eq_ignore_ascii_case(b"href") {
            ElementName::Href
        } else if local.eq_ignore_ascii_case(b"status") {
            ElementName::Status
        } else if local.eq_ignore_ascii_case(b"displayname") {
            ElementName::Displayname
        } else if local.eq_ignore_ascii_case(b"getetag") {
            ElementName::Getetag
        } else if local.eq_ignore_ascii_case(b"resourcetype") {
            ElementName::Resourcetype
        } else if local.eq_ignore_ascii_case(b"collection") {
            ElementName::Collection
        } else if local.eq_ignore_ascii_case(b"sync-token") {
            ElementName::SyncToken
        } else if local.eq_ignore_ascii_case(b"current-user-principal") {
            ElementName::CurrentUserPrincipal
        } else if local.eq_ignore_ascii_case(b"owner") {
            ElementName::Owner
        } else if local.eq_ignore_ascii_case(b"getcontenttype") {
            ElementName::Getcontenttype
        } else if local.eq_ignore_ascii_case(b"getlastmodified") {
            ElementName::Getlastmodified
        } else {
            ElementName::Other
        }
    } else if uri == NS_CALDAV {
        if local.eq_ignore_ascii_case(b"calendar") {
            ElementName::Calendar
        } else if local.eq_ignore_ascii_case(b"supported-calendar-component-set") {
            ElementName::SupportedCalendarComponentSet
        } else if local.eq_ignore_ascii_case(b"comp") {
            ElementName::Comp
        } else if local.eq_ignore_ascii_case(b"calendar-data") {
            ElementName::CalendarData
        } else if local.eq_ignore_ascii_case(b"calendar-description") {
            ElementName::CalendarDescription
        } else if local.eq_ignore_ascii_case(b"calendar-timezone") {
            ElementName::CalendarTimezone
        } else if local.eq_ignore_ascii_case(b"calendar-color") {
            ElementName::CalendarColor
        } else if local.eq_ignore_ascii_case(b"calendar-home-set") {
            ElementName::CalendarHomeSet
        } else {
            ElementName::Other
        }
    } else if uri == NS_APPLE_ICAL {
        if local.eq_ignore_ascii_case(b"calendar-color") {
            ElementName::CalendarColorApple
        } else if local.eq_ignore_ascii_case(b"calendar-order") {
            ElementName::CalendarOrder
        } else {
            ElementName::Other
        }
    } else if uri == NS_CALENDARSERVER {
        if local.eq_ignore_ascii_case(b"getctag") {
            ElementName::Getctag
        } else {
            ElementName::Other
        }
    } else {
        ElementName::Other
    }
}

pub(crate) trait ItemConsumer {
    fn consume(&mut self, item: DavItem) -> Result<()>;
}

impl ItemConsumer for Vec<DavItem> {
    fn consume(&mut self, item: DavItem) -> Result<()> {
        self.push(item);
        Ok(())
    }
}

impl<F> ItemConsumer for F
where
    F: FnMut(DavItem) -> Result<()>,
{
    fn consume(&mut self, item: DavItem) -> Result<()> {
        (self)(item)
    }
}

pub(crate) struct MultistatusParser<C> {
    pub stack: Vec<ElementName>,
    pub current: DavItem,
    sink: C,
}

impl<C: ItemConsumer> MultistatusParser<C> {
    pub fn new(sink: C) -> Self {
        Self {
            stack: Vec::with_capacity(16),
            current: DavItem::new(),
            sink,
        }
    }

    fn finish(self) -> C {
        self.sink
    }

    pub fn path_ends_with(&self, needle: &[ElementName]) -> bool {
        self.stack.len() >= needle.len()
            && self.stack[self.stack.len() - needle.len()..] == needle[..]
    }

    fn on_start(
        &mut self,
        ns: ResolveResult<'_>,
        local: &[u8],
        event: &BytesStart<'_>,
    ) -> Result<()> {
        let element = element_from_resolved(ns, local);
        self.stack.push(element);

        match element {
            ElementName::Response => {
                self.current = DavItem::new();
            }
            ElementName::Collection => {
                if self.path_ends_with(&[
                    ElementName::Response,
                    ElementName::Propstat,
                    ElementName::Prop,
                    ElementName::Resourcetype,
                    ElementName::Collection,
                ]) {
                    self.current.is_collection = true;
                }
            }
            ElementName::Calendar => {
                if self.path_ends_with(&[
                    ElementName::Response,
                    ElementName::Propstat,
                    ElementName::Prop,
                    ElementName::Resourcetype,
                    ElementName::Calendar,
                ]) {
                    self.current.is_calendar = true;
                }
            }
            ElementName::Comp => {
                if self.path_ends_with(&[
                    ElementName::Response,
                    ElementName::Propstat,
                    ElementName::Prop,
                    ElementName::SupportedCalendarComponentSet,
                    ElementName::Comp,
                ]) {
                    for attr in event.attributes().with_checks(false) {
                        let attr = attr?;
                        let key = String::from_utf8_lossy(attr.key.as_ref()).to_ascii_lowercase();
                        if key == "name" {
                            let value = attr
                                .unescape_value()
                                .map_err(|e| anyhow!("Invalid XML attribute: {e}"))?
                                .into_owned();
                            if !value.is_empty()
                                && !self
                                    .current
                                    .supported_components
                                    .iter()
                                    .any(|c| c.eq_ignore_ascii_case(&value))
                            {
                                self.current.supported_components.push(value);
                            }
                        }
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn on_end(&mut self) -> Result<()> {
        if let Some(popped) = self.stack.pop()
            && popped == ElementName::Response
        {
            let finished = std::mem::take(&mut self.current);
            self.sink.consume(finished)?;
            // Ignore mismatches silently; the XML is assumed well-formed.
        }
        Ok(())
    }

    fn on_text(&mut self, text: String) {
        self.handle_text(text);
    }

    fn on_cdata(&mut self, text: String) {
        self.handle_text(text);
    }

    fn handle_text(&mut self, text: String) {
        if text.is_empty() {
            return;
        }

        // calendar-data is often multi-line and may arrive in chunks; keep exact payload.
        if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::CalendarData,
        ]) {
            if let Some(existing) = self.current.calendar_data.as_mut() {
                existing.push_str(&text);
            } else {
                self.current.calendar_data = Some(text);
            }
            return;
        }

        // calendar-timezone can also contain multi-line iCalendar content; preserve it.
        if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::CalendarTimezone,
        ]) {
            if let Some(existing) = self.current.calendar_timezone.as_mut() {
                existing.push_str(&text);
            } else {
                self.current.calendar_timezone = Some(text.clone());
            }
            return;
        }

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }

        if self.path_ends_with(&[ElementName::Response, ElementName::Href]) {
            self.current.href = trimmed.to_string();
        } else if self.path_ends_with(&[ElementName::Response, ElementName::Status])
            || self.path_ends_with(&[
                ElementName::Response,
                ElementName::Propstat,
                ElementName::Status,
            ])
        {
            self.current.status = Some(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::Displayname,
        ]) {
            self.current.displayname = Some(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::Getetag,
        ]) {
            self.current.etag = Some(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::CalendarDescription,
        ]) {
            self.current.calendar_description = Some(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::CalendarColor,
        ]) {
            self.current.calendar_color = Some(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::CalendarColorApple,
        ]) {
            self.current.calendar_color_apple = Some(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::CalendarOrder,
        ]) {
            self.current.calendar_order = Some(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::Getctag,
        ]) {
            self.current.ctag = Some(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::SyncToken,
        ]) {
            self.current.sync_token = Some(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::CalendarHomeSet,
            ElementName::Href,
        ]) {
            self.current.calendar_home_set.push(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::CurrentUserPrincipal,
            ElementName::Href,
        ]) {
            self.current
                .current_user_principal
                .push(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::Owner,
            ElementName::Href,
        ]) {
            self.current.owner = Some(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::Getcontenttype,
        ]) {
            self.current.content_type = Some(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::Getlastmodified,
        ]) {
            self.current.last_modified = Some(trimmed.to_string());
        }
    }
}

fn parse_multistatus_bytes_with<R, C>(reader: R, sink: C) -> Result<C>
where
    R: BufRead,
    C: ItemConsumer,
{
    let mut xml = NsReader::from_reader(reader);
    xml.config_mut().trim_text(false);

    let mut buf = Vec::with_capacity(8 * 1024);
    let mut parser = MultistatusParser::new(sink);

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let (ns, local) = xml.resolve_element(e.name());
                parser.on_start(ns, local.as_ref(), &e)?;
            }
            Ok(Event::Empty(e)) => {
                let (ns, local) = xml.resolve_element(e.name());
                parser.on_start(ns, local.as_ref(), &e)?;
                parser.on_end()?;
            }
            Ok(Event::Text(e)) => {
                let text = decode_text(e.as_ref())?;
                parser.on_text(text);
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                parser.on_cdata(text);
            }
            Ok(Event::End(_)) => parser.on_end()?,
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow!("XML error: {e}")),
            _ => {}
        }
        buf.clear();
    }

    Ok(parser.finish())
}

/// Parse a WebDAV `207 Multi-Status` XML body from an already aggregated buffer.
pub fn parse_multistatus_bytes(body: &[u8]) -> Result<Vec<DavItem>> {
    let cursor = Cursor::new(body);
    parse_multistatus_bytes_with(cursor, Vec::<DavItem>::new())
}

/// Parse an aggregated multistatus body, invoking a callback per item
/// instead of collecting a `Vec`.
pub fn parse_multistatus_bytes_visit<F>(body: &[u8], on_item: F) -> Result<()>
where
    F: FnMut(DavItem) -> Result<()>,
{
    let cursor = Cursor::new(body);
    parse_multistatus_bytes_with(cursor, on_item)?;
    Ok(())
}

pub fn decode_text(raw: &[u8]) -> Result<String> {
    match std::str::from_utf8(raw) {
        Ok(s) => Ok(unescape(s)
            .map_err(|err| anyhow!("XML decode error: {err}"))?
            .into_owned()),
        Err(_) => Ok(String::from_utf8_lossy(raw).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_multistatus() {
        let xml = br#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:response>
    <D:href>/cal/personal/</D:href>
    <D:propstat>
      <D:prop>
        <D:displayname>Personal</D:displayname>
        <D:getetag>"abc123"</D:getetag>
        <D:resourcetype><D:collection/><C:calendar/></D:resourcetype>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#;
        let items = parse_multistatus_bytes(xml).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].href, "/cal/personal/");
        assert_eq!(items[0].displayname.as_deref(), Some("Personal"));
        assert_eq!(items[0].etag.as_deref(), Some("\"abc123\""));
        assert!(items[0].is_collection);
        assert!(items[0].is_calendar);
    }

    #[test]
    fn distinguishes_caldav_and_apple_calendar_color_by_namespace() {
        let xml = br#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav" xmlns:A="http://apple.com/ns/ical/" xmlns:CS="http://calendarserver.org/ns/">
  <D:response>
    <D:href>/cal/work/</D:href>
    <D:propstat>
      <D:prop>
        <C:calendar-color>#112233FF</C:calendar-color>
        <A:calendar-color>#AABBCCFF</A:calendar-color>
        <A:calendar-order>3</A:calendar-order>
        <CS:getctag>ctag-42</CS:getctag>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#;
        let items = parse_multistatus_bytes(xml).unwrap();
        assert_eq!(items[0].calendar_color.as_deref(), Some("#112233FF"));
        assert_eq!(items[0].calendar_color_apple.as_deref(), Some("#AABBCCFF"));
        assert_eq!(items[0].calendar_order.as_deref(), Some("3"));
        assert_eq!(items[0].ctag.as_deref(), Some("ctag-42"));
    }

    #[test]
    fn rebound_prefix_still_resolves_by_namespace_uri() {
        // A server that swaps the conventional "C:" prefix for CalDAV to
        // something else (here reusing "C:" for DAV: itself) must not be
        // misparsed by prefix alone.
        let xml = br#"<?xml version="1.0"?>
<C:multistatus xmlns:C="DAV:" xmlns:X="urn:ietf:params:xml:ns:caldav">
  <C:response>
    <C:href>/cal/mixed/</C:href>
    <C:propstat>
      <C:prop>
        <C:resourcetype><C:collection/><X:calendar/></C:resourcetype>
        <X:calendar-color>#FF0000</X:calendar-color>
      </C:prop>
      <C:status>HTTP/1.1 200 OK</C:status>
    </C:propstat>
  </C:response>
</C:multistatus>"#;
        let items = parse_multistatus_bytes(xml).unwrap();
        assert!(items[0].is_collection);
        assert!(items[0].is_calendar);
        assert_eq!(items[0].calendar_color.as_deref(), Some("#FF0000"));
    }
}
