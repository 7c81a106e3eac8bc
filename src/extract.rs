//! Content extraction — raw envelope bytes to a structured message.
//!
//! Never fails: malformed input degrades to empty fields.

use std::collections::BTreeMap;

use mail_parser::{MessageParser, MessagePart, MimeHeaders, PartType};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Metadata for one attachment. Payload bytes are never kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// File name, empty if the part carries none.
    pub filename: String,
    /// Decoded payload length; only set for `Content-Disposition: attachment`.
    pub size: Option<u64>,
    /// `type/subtype`, lowercase.
    pub mimetype: String,
}

/// Structured view of one inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub subject: String,
    pub body_text: String,
    pub headers: BTreeMap<String, String>,
    pub attachments: Vec<Attachment>,
}

/// Parse raw message bytes.
pub fn extract(raw: &[u8]) -> ParsedMessage {
    let Some(message) = MessageParser::default().parse(raw) else {
        debug!(len = raw.len(), "Envelope could not be parsed, using empty message");
        return ParsedMessage::default();
    };

    let mut headers = BTreeMap::new();
    for (name, value) in message.headers_raw() {
        headers
            .entry(name.to_string())
            .or_insert_with(|| unfold(value));
    }

    let subject = message.subject().unwrap_or_default().to_string();
    let Some(root) = message.parts.first() else {
        return ParsedMessage {
            subject,
            headers,
            ..ParsedMessage::default()
        };
    };

    if !matches!(root.body, PartType::Multipart(_)) {
        let body_text = if mime_type(root).starts_with("text/") {
            part_text(root)
        } else {
            String::new()
        };
        return ParsedMessage {
            subject,
            body_text,
            headers,
            attachments: Vec::new(),
        };
    }

    let leaves: Vec<&MessagePart> = message
        .parts
        .iter()
        .filter(|p| !matches!(p.body, PartType::Multipart(_)))
        .collect();

    let body_index = leaves
        .iter()
        .position(|p| mime_type(p) == "text/plain" && !has_attachment_disposition(p))
        .or_else(|| leaves.iter().position(|p| mime_type(p).starts_with("text/")));

    let body_text = body_index.map(|i| part_text(leaves[i])).unwrap_or_default();

    let attachments = leaves
        .iter()
        .enumerate()
        .filter(|(i, p)| is_attachment(p, Some(*i) == body_index))
        .map(|(_, p)| attachment_meta(p))
        .collect();

    ParsedMessage {
        subject,
        body_text,
        headers,
        attachments,
    }
}

fn is_attachment(part: &MessagePart, is_body: bool) -> bool {
    if has_attachment_disposition(part) {
        return true;
    }
    !is_body && (part.attachment_name().is_some() || !mime_type(part).starts_with("text/"))
}

fn attachment_meta(part: &MessagePart) -> Attachment {
    let size = (has_attachment_disposition(part) && !part.is_encoding_problem)
        .then(|| part.contents().len() as u64);
    Attachment {
        filename: part.attachment_name().unwrap_or_default().to_string(),
        size,
        mimetype: mime_type(part),
    }
}

fn has_attachment_disposition(part: &MessagePart) -> bool {
    part.content_disposition()
        .is_some_and(|d| d.ctype().eq_ignore_ascii_case("attachment"))
}

/// Content type as `type/subtype`; a missing header means `text/plain`.
fn mime_type(part: &MessagePart) -> String {
    match part.content_type() {
        Some(ct) => match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub).to_lowercase(),
            None => "text/plain".to_string(),
        },
        None => "text/plain".to_string(),
    }
}

fn part_text(part: &MessagePart) -> String {
    match part.text_contents() {
        Some(text) => text.to_string(),
        None => String::from_utf8_lossy(part.contents()).into_owned(),
    }
}

/// Collapse folded header whitespace.
fn unfold(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED: &str = "From: alice@corp.com\r\n\
To: finance@demo.local\r\n\
Subject: Q3 numbers\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=\"inner\"\r\n\
\r\n\
--inner\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>html body</p>\r\n\
--inner\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
plain body\r\n\
--inner--\r\n\
--outer\r\n\
Content-Type: application/pdf; name=\"report.pdf\"\r\n\
Content-Disposition: attachment; filename=\"report.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
aGVsbG8gd29ybGQ=\r\n\
--outer\r\n\
Content-Type: image/png\r\n\
Content-Disposition: inline; filename=\"logo.png\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
iVBORw0KGgo=\r\n\
--outer--\r\n";

    #[test]
    fn multipart_prefers_text_plain_over_html() {
        let parsed = extract(MIXED.as_bytes());
        assert_eq!(parsed.subject, "Q3 numbers");
        assert_eq!(parsed.body_text.trim(), "plain body");
    }

    #[test]
    fn attachment_disposition_sets_decoded_size() {
        let parsed = extract(MIXED.as_bytes());
        let pdf = parsed
            .attachments
            .iter()
            .find(|a| a.filename == "report.pdf")
            .unwrap();
        assert_eq!(pdf.mimetype, "application/pdf");
        assert_eq!(pdf.size, Some("hello world".len() as u64));
    }

    #[test]
    fn inline_attachment_has_no_size() {
        let parsed = extract(MIXED.as_bytes());
        let logo = parsed
            .attachments
            .iter()
            .find(|a| a.filename == "logo.png")
            .unwrap();
        assert_eq!(logo.mimetype, "image/png");
        assert_eq!(logo.size, None);
        assert_eq!(parsed.attachments.len(), 2);
    }

    #[test]
    fn html_only_multipart_falls_back_to_first_text_part() {
        let raw = "Subject: html\r\n\
Content-Type: multipart/alternative; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/html\r\n\
\r\n\
<b>only html</b>\r\n\
--b--\r\n";
        let parsed = extract(raw.as_bytes());
        assert!(parsed.body_text.contains("only html"));
        assert!(parsed.attachments.is_empty());
    }

    #[test]
    fn text_attachment_is_skipped_for_body_selection() {
        let raw = "Subject: notes\r\n\
Content-Type: multipart/mixed; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
Content-Disposition: attachment; filename=\"notes.txt\"\r\n\
\r\n\
attached notes\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
\r\n\
real body\r\n\
--b--\r\n";
        let parsed = extract(raw.as_bytes());
        assert_eq!(parsed.body_text.trim(), "real body");
        assert_eq!(parsed.attachments.len(), 1);
        assert_eq!(parsed.attachments[0].filename, "notes.txt");
        assert!(parsed.attachments[0].size.is_some());
    }

    #[test]
    fn single_part_text_message() {
        let raw = "From: a@b.c\r\nSubject: hi\r\n\r\nJust text.\r\n";
        let parsed = extract(raw.as_bytes());
        assert_eq!(parsed.body_text.trim(), "Just text.");
        assert!(parsed.attachments.is_empty());
        assert_eq!(parsed.headers.get("From").map(String::as_str), Some("a@b.c"));
    }

    #[test]
    fn single_part_non_text_has_empty_body() {
        let raw = "Subject: bin\r\nContent-Type: application/octet-stream\r\n\r\nAAAA\r\n";
        let parsed = extract(raw.as_bytes());
        assert_eq!(parsed.subject, "bin");
        assert!(parsed.body_text.is_empty());
    }

    #[test]
    fn folded_headers_are_unfolded() {
        let raw = "Subject: hi\r\nX-Tags: one,\r\n two\r\n\r\nbody\r\n";
        let parsed = extract(raw.as_bytes());
        assert_eq!(parsed.headers.get("X-Tags").map(String::as_str), Some("one, two"));
    }

    #[test]
    fn garbage_input_never_panics() {
        for raw in [
            &b"\xff\xfe\x00garbage"[..],
            b"Content-Type: multipart/mixed\r\n\r\n--",
            b"Content-Type: multipart/mixed; boundary=x\r\n\r\n--x\r\nContent-Type: text/plain\r\n",
        ] {
            let _ = extract(raw);
        }
        assert_eq!(extract(b""), ParsedMessage::default());
    }
}
