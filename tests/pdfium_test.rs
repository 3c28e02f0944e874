//! Extraction through PDFium over fixture PDFs
//!
//! Skipped when no PDFium library can be bound on this machine.

use pdf_reflow_mcp::neo::{decode, DecodeOptions};
use pdf_reflow_mcp::pdf::{extract_document, ElementKind, PdfBackend, PdfiumBackend};
use pdf_reflow_mcp::render::{FontMap, FontResolver, UnavailableHtmlToPdf};
use pdf_reflow_mcp::{Error, ReflowConfig, ReflowPipeline};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::Arc;

fn fixture_path(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    path
}

fn pdfium_unavailable(error: &Error) -> bool {
    matches!(error, Error::Pdfium { reason } if reason.starts_with("Failed to initialize PDFium"))
}

#[test]
fn test_hello_page_geometry() {
    let backend = match PdfiumBackend::open(fixture_path("hello.pdf")) {
        Ok(backend) => backend,
        Err(e) if pdfium_unavailable(&e) => {
            eprintln!("skipping: {}", e);
            return;
        }
        Err(e) => panic!("failed to open hello.pdf: {}", e),
    };

    assert_eq!(backend.page_count(), 1);
    let page = backend.page(0).unwrap();
    assert_eq!((page.width, page.height), (200.0, 200.0));
    assert!(page.plain_text.contains("Hello"));
    assert_eq!(page.blocks.len(), 1);

    // baseline at 180 from the bottom; flipped, the block sits near the top
    let bbox = page.blocks[0].bbox;
    assert!(bbox.y0 < bbox.y1);
    assert!(bbox.y0 > 0.0 && bbox.y1 < 40.0, "{:?}", bbox);
    assert!(bbox.x0 >= 9.0 && bbox.x0 < 20.0, "{:?}", bbox);
    assert_eq!(page.blocks[0].concatenated_text().trim(), "Hello");
}

#[test]
fn test_hello_extracts_one_block() {
    let out = tempfile::tempdir().unwrap();
    let backend = match PdfiumBackend::open(fixture_path("hello.pdf")) {
        Ok(backend) => backend,
        Err(e) if pdfium_unavailable(&e) => {
            eprintln!("skipping: {}", e);
            return;
        }
        Err(e) => panic!("failed to open hello.pdf: {}", e),
    };

    let document = extract_document(&backend, out.path()).unwrap();
    let elements: Vec<_> = document.elements().collect();
    assert_eq!(elements.len(), 1);
    match &elements[0].kind {
        ElementKind::Text { content, .. } => assert_eq!(content, "Hello"),
        other => panic!("unexpected element {:?}", other),
    }
    assert!(document.og_text.contains("Hello"));
}

#[test]
fn test_reflow_hello_pdf() {
    let out = tempfile::tempdir().unwrap();
    let pipeline = ReflowPipeline::new(
        ReflowConfig {
            output_dir: out.path().to_path_buf(),
            ..ReflowConfig::default()
        },
        FontResolver::new(out.path(), FontMap::default()),
        Arc::new(UnavailableHtmlToPdf),
    )
    .unwrap();

    let report = match pipeline.run(&fixture_path("hello.pdf"), None) {
        Ok(report) => report,
        Err(e) if pdfium_unavailable(&e) => {
            eprintln!("skipping: {}", e);
            return;
        }
        Err(e) => panic!("reflow failed: {}", e),
    };

    assert_eq!(
        report.neo,
        "[フォント:IPAexGothic, sans-serif][サイズ:12.00][ウェイト:normal]Hello\n"
    );
    assert_eq!(report.page_count, 1);
    assert!(report.run_dir.starts_with("hello-"));

    let decoded = decode(&report.neo, &DecodeOptions::default());
    assert_eq!(decoded.skipped_lines, 0);
    assert_eq!(decoded.texts().collect::<Vec<_>>(), vec!["Hello"]);
}

#[test]
fn test_missing_fixture_is_not_found() {
    let result = PdfiumBackend::open(fixture_path("does-not-exist.pdf"));
    assert!(matches!(result, Err(Error::PdfNotFound { .. })));
}
