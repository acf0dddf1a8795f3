use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, NO_PAD};

// RFC 3501 section 5.1.3: "," replaces "/" and padding is omitted.
const IMAP_MUTF7: GeneralPurpose = GeneralPurpose::new(
    &alphabet::IMAP_MUTF7,
    NO_PAD.with_decode_allow_trailing_bits(true),
);

/// Decodes an IMAP modified UTF-7 mailbox name.
///
/// Malformed shift sequences are passed through untouched rather than
/// rejected, so a server sending raw UTF-8 still yields a usable name.
pub fn decode_mailbox_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('-') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let encoded = &after[..end];
        if encoded.is_empty() {
            out.push('&');
        } else {
            match decode_segment(encoded) {
                Some(decoded) => out.push_str(&decoded),
                None => out.push_str(&rest[start..start + 1 + end + 1]),
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

fn decode_segment(encoded: &str) -> Option<String> {
    let bytes = IMAP_MUTF7.decode(encoded).ok()?;
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect::<Vec<_>>();
    String::from_utf16(&units).ok()
}

/// Human-readable name for a folder: the decoded last path segment.
pub fn display_name_from_path(path: &str, delimiter: Option<&str>) -> String {
    let leaf = match delimiter {
        Some(delim) if !delim.is_empty() => path.rsplit(delim).next().unwrap_or(path),
        _ => path,
    };
    decode_mailbox_name(leaf)
}
