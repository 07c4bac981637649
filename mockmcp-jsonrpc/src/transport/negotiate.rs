//! `Accept` header negotiation between plain JSON and Server-Sent Events responses.

pub const APPLICATION_JSON: &str = "application/json";
pub const TEXT_EVENT_STREAM: &str = "text/event-stream";

/// How a response to a `POST` should be framed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseFormat {
    /// A single JSON document
    Json,
    /// A single `data:` frame on a `text/event-stream` body, which is then closed
    EventStream,
}

/// One entry of an `Accept` header
#[derive(Debug)]
struct MediaRange {
    kind: String,
    subtype: String,
    quality: f32,
    position: usize,
}

impl MediaRange {
    /// How specifically this range names `kind/subtype`, or `None` if it doesn't match at all.
    fn specificity(&self, kind: &str, subtype: &str) -> Option<u8> {
        match (self.kind.as_str(), self.subtype.as_str()) {
            ("*", "*") => Some(0),
            (k, "*") if k == kind => Some(1),
            (k, s) if k == kind && s == subtype => Some(2),
            _ => None,
        }
    }
}

fn parse_accept(accept: &str) -> Vec<MediaRange> {
    accept
        .split(',')
        .enumerate()
        .filter_map(|(position, entry)| {
            let mut parts = entry.split(';');
            let media = parts.next()?.trim().to_ascii_lowercase();
            let (kind, subtype) = media.split_once('/')?;

            let mut quality = 1.0;
            for param in parts {
                if let Some(q) = param.trim().strip_prefix("q=") {
                    // Unparseable weights are treated as the default rather than rejecting the
                    // whole header
                    quality = q.trim().parse::<f32>().unwrap_or(1.0).clamp(0.0, 1.0);
                }
            }

            Some(MediaRange {
                kind: kind.trim().to_string(),
                subtype: subtype.trim().to_string(),
                quality,
                position,
            })
        })
        .collect()
}

/// How acceptable a media type is: `(quality, specificity, position)` of the most specific range
/// that matches it, or `None` if nothing matches or the best match has a zero weight.
fn acceptability(ranges: &[MediaRange], media_type: &str) -> Option<(f32, u8, usize)> {
    let (kind, subtype) = media_type.split_once('/')?;

    ranges
        .iter()
        .filter_map(|range| {
            range
                .specificity(kind, subtype)
                .map(|specificity| (range.quality, specificity, range.position))
        })
        .max_by_key(|(_, specificity, _)| *specificity)
        .filter(|(quality, _, _)| *quality > 0.0)
}

/// Pick the framing for a `POST` response.
///
/// A missing or empty header means anything goes, which is answered with JSON.  When both formats
/// are acceptable the higher weight wins, then the more specific match, then whichever the client
/// listed first; a complete tie goes to JSON.  Returns `None` when neither format is acceptable.
pub fn negotiate_post(accept: Option<&str>) -> Option<ResponseFormat> {
    let accept = match accept.map(str::trim) {
        None | Some("") => return Some(ResponseFormat::Json),
        Some(accept) => accept,
    };

    let ranges = parse_accept(accept);
    let json = acceptability(&ranges, APPLICATION_JSON);
    let sse = acceptability(&ranges, TEXT_EVENT_STREAM);

    match (json, sse) {
        (None, None) => None,
        (Some(_), None) => Some(ResponseFormat::Json),
        (None, Some(_)) => Some(ResponseFormat::EventStream),
        (Some((json_q, json_spec, json_pos)), Some((sse_q, sse_spec, sse_pos))) => {
            let sse_preferred = sse_q > json_q
                || (sse_q == json_q && sse_spec > json_spec)
                || (sse_q == json_q && sse_spec == json_spec && sse_pos < json_pos);

            if sse_preferred {
                Some(ResponseFormat::EventStream)
            } else {
                Some(ResponseFormat::Json)
            }
        }
    }
}

/// Whether a `GET` may open a long-lived event stream.  The client has to name
/// `text/event-stream` explicitly; wildcards are not enough.
pub fn accepts_event_stream(accept: Option<&str>) -> bool {
    let Some(accept) = accept else {
        return false;
    };

    parse_accept(accept).iter().any(|range| {
        range.specificity("text", "event-stream") == Some(2) && range.quality > 0.0
    })
}
