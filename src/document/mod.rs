//! Document extraction (spec.md §4.2) and format classification /
//! normalisation (spec.md §4.3).

const IPP_HEADER_LEN: usize = 8;
const END_OF_ATTRIBUTES_TAG: u8 = 0x03;
const PDF_MAGIC: &[u8] = b"%PDF";

/// Locate the document payload trailing the attribute groups of a
/// `Print-Job` / `Send-Document` request body.
///
/// Skips the 8-octet IPP header, scans for `end-of-attributes-tag`,
/// then skips any run of padding (`NUL`/`CR`/`LF`) clients insert
/// before the document. Falls back to a direct `%PDF` scan when no
/// terminator is found, for clients that omit it.
pub fn extract_document(body: &[u8]) -> &[u8] {
    if body.len() <= IPP_HEADER_LEN {
        return &[];
    }
    let rest = &body[IPP_HEADER_LEN..];
    if let Some(tag_pos) = rest.iter().position(|&b| b == END_OF_ATTRIBUTES_TAG) {
        let mut start = tag_pos + 1;
        while start < rest.len() && matches!(rest[start], 0x00 | b'\r' | b'\n') {
            start += 1;
        }
        return &rest[start..];
    }
    if let Some(pdf_pos) = find_subslice(rest, PDF_MAGIC) {
        return &rest[pdf_pos..];
    }
    &[]
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Document type recognised by leading signature (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentFormat {
    Pdf,
    Jpeg,
    Png,
    PostScript,
    Gif,
    Bmp,
    Text,
    Unknown,
}

impl DocumentFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Jpeg => "image/jpeg",
            DocumentFormat::Png => "image/png",
            DocumentFormat::PostScript => "application/postscript",
            DocumentFormat::Gif => "image/gif",
            DocumentFormat::Bmp => "image/bmp",
            DocumentFormat::Text => "text/plain",
            DocumentFormat::Unknown => "application/octet-stream",
        }
    }

    /// Filename extension used when persisting a job with this detected
    /// format. Restricted to `pdf`, `jpg`, `png`, `ps`, `raw`, `txt`
    /// (spec.md §6) — formats with no as-is persistence policy (GIF,
    /// BMP) fall back to `raw`, the same bucket untyped bytes land in.
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Jpeg => "jpg",
            DocumentFormat::Png => "png",
            DocumentFormat::PostScript => "ps",
            DocumentFormat::Gif | DocumentFormat::Bmp => "raw",
            DocumentFormat::Text => "txt",
            DocumentFormat::Unknown => "raw",
        }
    }
}

/// Classify a byte slice by leading signature, falling back to a
/// printable-byte heuristic for plain text (spec.md §4.3).
pub fn classify(bytes: &[u8]) -> DocumentFormat {
    if bytes.starts_with(b"%PDF") {
        return DocumentFormat::Pdf;
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return DocumentFormat::Jpeg;
    }
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return DocumentFormat::Png;
    }
    if bytes.starts_with(&[0x42, 0x4D]) {
        return DocumentFormat::Bmp;
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return DocumentFormat::Gif;
    }
    if bytes.starts_with(b"%!") {
        return DocumentFormat::PostScript;
    }
    if is_mostly_printable(bytes) {
        return DocumentFormat::Text;
    }
    DocumentFormat::Unknown
}

fn is_mostly_printable(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    let printable = bytes
        .iter()
        .filter(|&&b| b == 9 || b == 10 || b == 13 || (32..=126).contains(&b))
        .count();
    (printable as f64) / (bytes.len() as f64) >= 0.70
}

/// Artifacts produced by [`normalise`]: the primary file to persist,
/// and an optional raw companion for debugging (spec.md §4.3, §6).
pub struct Normalised {
    pub primary: (Vec<u8>, DocumentFormat),
    pub companion: Option<(Vec<u8>, DocumentFormat)>,
}

/// Whether `declared` names a format this service trusts enough to
/// wrap unknown bytes in a synthetic PDF (spec.md §4.3 table).
fn declared_invites_wrapping(declared: &str) -> bool {
    let declared = declared.to_ascii_lowercase();
    declared == "application/pdf"
        || declared == "application/postscript"
        || declared.starts_with("application/cups-")
        || declared == "application/octet-stream"
}

/// Decide what to persist for a document, per the normalisation policy
/// table in spec.md §4.3. Detection always wins; `declared` only
/// affects whether unknown bytes get a synthetic-PDF companion
/// (spec.md §9 Open Question resolution).
pub fn normalise(detected: DocumentFormat, declared: &str, bytes: &[u8]) -> Normalised {
    match detected {
        DocumentFormat::Pdf | DocumentFormat::Jpeg | DocumentFormat::Png => Normalised {
            primary: (bytes.to_vec(), detected),
            companion: None,
        },
        _ if detected == DocumentFormat::Unknown && declared_invites_wrapping(declared) => {
            let wrapper = synthesize_pdf(bytes);
            Normalised {
                primary: (wrapper, DocumentFormat::Pdf),
                companion: Some((bytes.to_vec(), DocumentFormat::Unknown)),
            }
        }
        other => Normalised {
            primary: (bytes.to_vec(), other),
            companion: None,
        },
    }
}

/// Build a minimal, well-formed PDF carrying `payload` as an opaque
/// stream object on a single page (spec.md §4.3 "Synthetic PDF
/// wrapper"). Not guaranteed to render the payload.
pub fn synthesize_pdf(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");

    let mut offsets = Vec::new();
    let mut push_object = |out: &mut Vec<u8>, body: &[u8]| {
        offsets.push(out.len());
        out.extend_from_slice(body);
    };

    push_object(&mut out, b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
    push_object(&mut out, b"2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n");
    push_object(
        &mut out,
        b"3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << >> >>\nendobj\n",
    );

    let stream_header = format!("4 0 obj\n<< /Length {} >>\nstream\n", payload.len());
    offsets.push(out.len());
    out.extend_from_slice(stream_header.as_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(b"\nendstream\nendobj\n");

    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", offsets.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF",
            offsets.len() + 1,
            xref_offset
        )
        .as_bytes(),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_payload_after_terminator_and_padding() {
        let mut body = vec![1, 1, 0, 2, 0, 0, 0, 1];
        body.push(0x03);
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(b"%PDF-1.4\n...%%EOF");
        let doc = extract_document(&body);
        assert_eq!(doc, b"%PDF-1.4\n...%%EOF");
    }

    #[test]
    fn falls_back_to_pdf_scan_without_terminator() {
        let mut body = vec![0u8; 8];
        body.extend_from_slice(b"garbage");
        body.extend_from_slice(b"%PDF-1.7 rest");
        let doc = extract_document(&body);
        assert_eq!(doc, b"%PDF-1.7 rest");
    }

    #[test]
    fn empty_when_no_terminator_or_pdf_marker() {
        let body = vec![0u8; 8];
        assert_eq!(extract_document(&body), &[] as &[u8]);
    }

    #[test]
    fn classification_is_signature_based_regardless_of_declared_type() {
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0];
        jpeg.extend_from_slice(b"rest-of-file");
        assert_eq!(classify(&jpeg), DocumentFormat::Jpeg);
    }

    #[test]
    fn mostly_binary_with_no_signature_is_unknown() {
        let bytes: Vec<u8> = (0u8..=255).collect();
        assert_eq!(classify(&bytes), DocumentFormat::Unknown);
    }

    #[test]
    fn unknown_bytes_declared_as_pdf_get_wrapped() {
        let bytes = vec![0xDE, 0xAD, 0xBE, 0xEF, 0, 1, 2, 3];
        let normalised = normalise(DocumentFormat::Unknown, "application/pdf", &bytes);
        assert_eq!(normalised.primary.1, DocumentFormat::Pdf);
        assert!(normalised.primary.0.starts_with(b"%PDF-1.4"));
        let companion = normalised.companion.expect("raw companion expected");
        assert_eq!(companion.0, bytes);
    }

    #[test]
    fn unknown_bytes_declared_as_text_are_saved_raw_only() {
        let bytes = vec![0xDE, 0xAD, 0xBE, 0xEF];
        let normalised = normalise(DocumentFormat::Unknown, "text/rtf", &bytes);
        assert!(normalised.companion.is_none());
    }

    #[test]
    fn synthetic_pdf_is_well_formed() {
        let wrapper = synthesize_pdf(b"hello world");
        let text = String::from_utf8_lossy(&wrapper);
        assert!(text.starts_with("%PDF-1.4"));
        assert!(text.contains("stream\nhello world\nendstream"));
        assert!(text.trim_end().ends_with("%%EOF"));
        assert!(text.contains("xref"));
        assert!(text.contains("trailer"));
        assert!(text.contains("startxref"));
    }
}
