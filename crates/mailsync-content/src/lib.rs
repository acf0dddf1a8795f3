use mailparse::{MailAddr, MailHeaderMap, ParsedMail, addrparse_header};
use serde::Serialize;

use mailsync_core::{MailSyncError, Result};

mod utf7;

pub use utf7::{decode_mailbox_name, display_name_from_path};

/// Header that marks outbound mail produced by this system.
pub const MARKER_HEADER: &str = "X-Mailsync-Type";
pub const MARKER_SYSTEM: &str = "system";

const HTML_WRAP_COLS: usize = 100;

/// Fields pulled out of a fetched RFC 5322 message.
#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub timestamp: Option<i64>,
    pub body: String,
    pub marker: Option<String>,
    pub attachments: Vec<AttachmentPart>,
}

/// Attachment metadata addressed by IMAP section number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentPart {
    pub part_number: String,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct AttachmentData {
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

pub fn parse_message(raw: &[u8]) -> Result<ParsedMessage> {
    let parsed = mailparse::parse_mail(raw).map_err(parse_error)?;
    let headers = &parsed.headers;

    let message_id = headers
        .get_first_value("Message-ID")
        .map(|v| v.trim().to_string())
        .unwrap_or_default();
    let subject = headers
        .get_first_value("Subject")
        .map(|v| v.trim().to_string())
        .unwrap_or_default();
    let timestamp = headers
        .get_first_value("Date")
        .and_then(|v| mailparse::dateparse(v.trim()).ok());
    let marker = headers
        .get_first_value(MARKER_HEADER)
        .map(|v| v.trim().to_string());

    let mut attachments = Vec::new();
    visit_leaves(&parsed, None, &mut |part, number| {
        if let Some(filename) = attachment_filename(part) {
            let size = part.get_body_raw().map(|b| b.len() as u64).unwrap_or(0);
            attachments.push(AttachmentPart {
                part_number: number.to_string(),
                filename,
                mime_type: part.ctype.mimetype.to_lowercase(),
                size,
            });
        }
    });

    Ok(ParsedMessage {
        message_id,
        subject,
        sender: sender_address(&parsed),
        timestamp,
        body: select_body(&parsed),
        marker,
        attachments,
    })
}

/// Decoded content of the leaf part at `part_number`, if it exists.
pub fn attachment_data(raw: &[u8], part_number: &str) -> Result<Option<AttachmentData>> {
    let parsed = mailparse::parse_mail(raw).map_err(parse_error)?;
    let mut found: Option<AttachmentData> = None;
    let mut failure: Option<MailSyncError> = None;
    visit_leaves(&parsed, None, &mut |part, number| {
        if found.is_some() || number != part_number {
            return;
        }
        match part.get_body_raw() {
            Ok(data) => {
                found = Some(AttachmentData {
                    filename: attachment_filename(part)
                        .unwrap_or_else(|| "attachment".to_string()),
                    mime_type: part.ctype.mimetype.to_lowercase(),
                    data,
                })
            }
            Err(err) => failure = Some(parse_error(err)),
        }
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(found),
    }
}

pub fn html_to_text(html: &str) -> String {
    let sanitized = sanitize_html(html);
    let text = html2text::from_read(sanitized.as_bytes(), HTML_WRAP_COLS);
    let text = html_escape::decode_html_entities(&text).to_string();
    normalize_text(&text)
}

fn parse_error(err: mailparse::MailParseError) -> MailSyncError {
    MailSyncError::MessageFetch(format!("unparseable message: {}", err))
}

fn sanitize_html(html: &str) -> String {
    let mut builder = ammonia::Builder::default();
    builder.rm_clean_content_tags(["style"]);
    builder.clean(html).to_string()
}

fn select_body(parsed: &ParsedMail) -> String {
    let mut text_plain: Option<String> = None;
    let mut text_html: Option<String> = None;

    visit_leaves(parsed, None, &mut |part, _| {
        if attachment_filename(part).is_some() {
            return;
        }
        let ctype = part.ctype.mimetype.to_lowercase();
        if ctype == "text/plain" && text_plain.is_none() {
            if let Ok(body) = part.get_body() {
                text_plain = Some(body);
            }
        } else if ctype == "text/html" && text_html.is_none() {
            if let Ok(body) = part.get_body() {
                text_html = Some(body);
            }
        }
    });

    if let Some(text) = text_plain.filter(|t| !t.trim().is_empty()) {
        return normalize_text(&text);
    }
    if let Some(html) = text_html {
        return html_to_text(&html);
    }
    String::new()
}

// Leaves get IMAP section numbers: a single-part message is "1", children of
// a multipart are numbered from 1 and nested parts join with dots.
fn visit_leaves<F>(parsed: &ParsedMail, number: Option<&str>, cb: &mut F)
where
    F: FnMut(&ParsedMail, &str),
{
    if parsed.subparts.is_empty() {
        cb(parsed, number.unwrap_or("1"));
        return;
    }
    for (idx, part) in parsed.subparts.iter().enumerate() {
        let child = match number {
            Some(prefix) => format!("{}.{}", prefix, idx + 1),
            None => (idx + 1).to_string(),
        };
        visit_leaves(part, Some(&child), cb);
    }
}

fn attachment_filename(part: &ParsedMail) -> Option<String> {
    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned());
    if filename.is_some() {
        return filename;
    }
    if matches!(
        disposition.disposition,
        mailparse::DispositionType::Attachment
    ) {
        return Some("attachment".to_string());
    }
    None
}

fn sender_address(parsed: &ParsedMail) -> String {
    let Some(header) = parsed.headers.get_first_header("From") else {
        return String::new();
    };
    let Ok(list) = addrparse_header(header) else {
        return header.get_value().trim().to_string();
    };
    for addr in list.iter() {
        match addr {
            MailAddr::Single(info) => {
                let email = info.addr.trim();
                if !email.is_empty() {
                    return email.to_string();
                }
            }
            MailAddr::Group(group) => {
                if let Some(info) = group.addrs.iter().find(|i| !i.addr.trim().is_empty()) {
                    return info.addr.trim().to_string();
                }
            }
        }
    }
    String::new()
}

fn normalize_text(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out_lines: Vec<&str> = Vec::new();
    let mut prev_blank = false;
    for line in normalized.split('\n') {
        let line = line.trim_end();
        let is_blank = line.is_empty();
        if is_blank && prev_blank {
            continue;
        }
        prev_blank = is_blank;
        out_lines.push(line);
    }
    out_lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::{attachment_data, html_to_text, parse_message};

    const MIXED: &str = concat!(
        "From: \"Alice Example\" <alice@example.com>\r\n",
        "To: shop@example.com\r\n",
        "Subject: Invoice 42\r\n",
        "Message-ID: <inv42@example.com>\r\n",
        "Date: Tue, 14 Nov 2023 10:00:00 +0000\r\n",
        "X-Mailsync-Type: System\r\n",
        "MIME-Version: 1.0\r\n",
        "Content-Type: multipart/mixed; boundary=\"outer\"\r\n",
        "\r\n",
        "--outer\r\n",
        "Content-Type: multipart/alternative; boundary=\"inner\"\r\n",
        "\r\n",
        "--inner\r\n",
        "Content-Type: text/plain; charset=utf-8\r\n",
        "\r\n",
        "Please find the invoice attached.\r\n",
        "--inner\r\n",
        "Content-Type: text/html; charset=utf-8\r\n",
        "\r\n",
        "<p>Please find the <b>invoice</b> attached.</p>\r\n",
        "--inner--\r\n",
        "--outer\r\n",
        "Content-Type: application/pdf; name=\"invoice.pdf\"\r\n",
        "Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "JVBERi0xLjQ=\r\n",
        "--outer--\r\n",
    );

    #[test]
    fn parses_headers_body_and_numbered_attachments() -> anyhow::Result<()> {
        let parsed = parse_message(MIXED.as_bytes())?;
        assert_eq!(parsed.message_id, "<inv42@example.com>");
        assert_eq!(parsed.subject, "Invoice 42");
        assert_eq!(parsed.sender, "alice@example.com");
        assert_eq!(parsed.timestamp, Some(1_699_956_000));
        assert_eq!(parsed.marker.as_deref(), Some("System"));
        assert_eq!(parsed.body, "Please find the invoice attached.");
        assert_eq!(parsed.attachments.len(), 1);
        let attachment = &parsed.attachments[0];
        assert_eq!(attachment.part_number, "2");
        assert_eq!(attachment.filename, "invoice.pdf");
        assert_eq!(attachment.mime_type, "application/pdf");
        assert_eq!(attachment.size, 8);
        Ok(())
    }

    #[test]
    fn attachment_data_is_found_by_part_number() -> anyhow::Result<()> {
        let data = attachment_data(MIXED.as_bytes(), "2")?
            .ok_or_else(|| anyhow::anyhow!("missing part"))?;
        assert_eq!(data.filename, "invoice.pdf");
        assert_eq!(data.data, b"%PDF-1.4");
        assert!(attachment_data(MIXED.as_bytes(), "7")?.is_none());
        Ok(())
    }

    #[test]
    fn html_only_message_falls_back_to_text_rendering() -> anyhow::Result<()> {
        let raw = concat!(
            "From: bob@example.com\r\n",
            "Subject: hi\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<html><body><p>Hello &amp; welcome</p><script>alert(1)</script></body></html>\r\n",
        );
        let text = parse_message(raw.as_bytes())?.body;
        assert!(text.contains("Hello & welcome"));
        assert!(!text.contains("alert"));
        Ok(())
    }

    #[test]
    fn single_part_plain_message_has_no_attachments() -> anyhow::Result<()> {
        let raw = "From: Bob <bob@example.com>\r\nSubject: plain\r\n\r\nline one\r\n\r\n\r\n\r\nline two\r\n";
        let parsed = parse_message(raw.as_bytes())?;
        assert!(parsed.attachments.is_empty());
        assert_eq!(parsed.body, "line one\n\nline two");
        assert_eq!(parsed.timestamp, None);
        assert!(parsed.marker.is_none());
        Ok(())
    }

    #[test]
    fn html_to_text_collapses_blank_runs() {
        let text = html_to_text("<p>a</p><p></p><p></p><p>b</p>");
        assert!(!text.contains("\n\n\n"));
        assert!(text.starts_with('a'));
    }
}
