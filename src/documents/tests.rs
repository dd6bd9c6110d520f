use super::*;

#[test]
fn kind_follows_extension() {
    assert_eq!(DocumentKind::from_filename("manual.pdf"), DocumentKind::Pdf);
    assert_eq!(DocumentKind::from_filename("MANUAL.PDF"), DocumentKind::Pdf);
    assert_eq!(DocumentKind::from_filename("notes.txt"), DocumentKind::PlainText);
    assert_eq!(DocumentKind::from_filename("README"), DocumentKind::PlainText);
    assert_eq!(DocumentKind::from_filename("pdf"), DocumentKind::PlainText);
}

#[test]
fn plain_text_is_decoded() {
    let text = extract_text("Opening hours: 9 to 5.".as_bytes(), "hours.txt")
        .expect("text should extract");
    assert_eq!(text, "Opening hours: 9 to 5.");
}

#[test]
fn byte_order_mark_is_stripped() {
    let bytes = "\u{feff}Résumé".as_bytes();
    let text = extract_text(bytes, "cv.md").expect("text should extract");
    assert_eq!(text, "Résumé");
}

#[test]
fn invalid_utf8_fails_extraction() {
    let error = extract_text(&[0x66, 0x6f, 0xff, 0xfe], "binary.txt")
        .expect_err("invalid utf-8 should fail");
    assert_eq!(error.kind(), "extraction_failed");
    assert!(error.to_string().contains("binary.txt"));
}

#[test]
fn corrupt_pdf_fails_extraction() {
    let error = extract_text(b"%PDF-1.4\nthis is not really a pdf", "broken.pdf")
        .expect_err("corrupt pdf should fail");
    assert!(matches!(error, KnowledgeError::ExtractionFailed(_)));
}
