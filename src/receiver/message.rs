use chrono::{DateTime, Utc};
use log::warn;
use mailparse::{addrparse, parse_mail, DispositionType, MailHeaderMap, ParsedMail};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::receiver::error::ReceiverError;

/// A mail message normalized into the generic content record consumed
/// by the downstream orchestrator. The `id` is freshly generated per
/// normalization and has no relation to any server-side identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub id: String,
    pub format: BodyFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub metadata: MessageMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyFormat {
    #[serde(rename = "HTML")]
    Html,
    Text,
}

/// Fixed metadata schema. `attachments` is serialized only when the
/// message actually carries attachments, so the external JSON shape
/// keeps the `HasAttachments`/`Attachments` pairing downstream expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "Subject")]
    pub subject: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "HasAttachments")]
    pub has_attachments: bool,
    #[serde(
        rename = "Attachments",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub attachments: Option<Vec<AttachmentRecord>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    #[serde(rename = "FileName", default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(rename = "ContentType")]
    pub content_type: String,
    #[serde(rename = "Size")]
    pub size: usize,
    #[serde(rename = "Data")]
    pub data: Vec<u8>,
}

/// Decode a raw RFC822 message into a [`NormalizedMessage`].
///
/// Format is "HTML" iff an HTML body part exists; content prefers the
/// plain-text body, falls back to HTML, and is absent when the message
/// has neither. Attachment parts that fail to decode are skipped with
/// a warning so the rest of the message still normalizes.
pub fn normalize(raw: &[u8]) -> Result<NormalizedMessage, ReceiverError> {
    let parsed = parse_mail(raw).map_err(|e| ReceiverError::Decode(e.to_string()))?;

    let text_body = find_body(&parsed, "text/plain")?;
    let html_body = find_body(&parsed, "text/html")?;
    let format = if html_body.is_some() {
        BodyFormat::Html
    } else {
        BodyFormat::Text
    };
    let content = text_body.or(html_body);

    let mut attachments = Vec::new();
    collect_attachments(&parsed, &mut attachments);
    let has_attachments = !attachments.is_empty();

    Ok(NormalizedMessage {
        id: Uuid::new_v4().to_string(),
        format,
        content,
        metadata: MessageMetadata {
            from: render_from(&parsed),
            subject: parsed
                .headers
                .get_first_value("Subject")
                .unwrap_or_default(),
            date: render_date(&parsed),
            has_attachments,
            attachments: has_attachments.then_some(attachments),
        },
    })
}

// Depth-first search for the first non-attachment body part of the
// requested mime type.
fn find_body(part: &ParsedMail, mimetype: &str) -> Result<Option<String>, ReceiverError> {
    if part.ctype.mimetype == mimetype
        && part.get_content_disposition().disposition != DispositionType::Attachment
    {
        let body = part
            .get_body()
            .map_err(|e| ReceiverError::Decode(e.to_string()))?;
        return Ok(Some(body));
    }

    for subpart in &part.subparts {
        if let Some(body) = find_body(subpart, mimetype)? {
            return Ok(Some(body));
        }
    }

    Ok(None)
}

// Walk the MIME tree in document order collecting attachment parts.
fn collect_attachments(part: &ParsedMail, attachments: &mut Vec<AttachmentRecord>) {
    // An embedded full message stays opaque: its raw wire-format bytes
    // become the attachment data, never a nested normalized record.
    if part.ctype.mimetype == "message/rfc822" {
        match part.get_body_raw() {
            Ok(data) => attachments.push(AttachmentRecord {
                file_name: Some(embedded_message_file_name(part)),
                content_type: "message/rfc822".to_string(),
                size: data.len(),
                data,
            }),
            Err(e) => warn!("skipping undecodable embedded message part: {}", e),
        }
        return;
    }

    if part.get_content_disposition().disposition == DispositionType::Attachment {
        match part.get_body_raw() {
            Ok(data) => attachments.push(AttachmentRecord {
                // Recorded as declared; a missing filename stays absent.
                file_name: part.get_content_disposition().params.get("filename").cloned(),
                content_type: part.ctype.mimetype.clone(),
                size: data.len(),
                data,
            }),
            Err(e) => warn!("skipping undecodable attachment part: {}", e),
        }
        return;
    }

    for subpart in &part.subparts {
        collect_attachments(subpart, attachments);
    }
}

// Filename fallback for embedded messages: content-disposition
// filename, then content-type name parameter, then "message.eml".
fn embedded_message_file_name(part: &ParsedMail) -> String {
    if let Some(name) = part.get_content_disposition().params.get("filename") {
        if !name.is_empty() {
            return name.clone();
        }
    }
    if let Some(name) = part.ctype.params.get("name") {
        if !name.is_empty() {
            return name.clone();
        }
    }
    "message.eml".to_string()
}

fn render_from(parsed: &ParsedMail) -> String {
    match parsed.headers.get_first_value("From") {
        Some(raw) => match addrparse(&raw) {
            Ok(list) => list.to_string(),
            // Keep the raw header when the address list does not parse.
            Err(_) => raw,
        },
        None => String::new(),
    }
}

// Origination date as "YYYY-MM-DD HH:MM:SSZ", UTC-normalized. Missing
// or unparseable dates render as an empty string.
fn render_date(parsed: &ParsedMail) -> String {
    parsed
        .headers
        .get_first_value("Date")
        .and_then(|raw| mailparse::dateparse(&raw).ok())
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%SZ").to_string())
        .unwrap_or_default()
}
