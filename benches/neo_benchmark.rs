//! Performance benchmarks for the NEO encoder and decoder
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pdf_reflow_mcp::neo::{decode, encode_elements, DecodeOptions, EncodeOptions};
use pdf_reflow_mcp::pdf::{ElementKind, PageElement, Rect, SourceFont};
use pdf_reflow_mcp::OverrideSettings;

/// Synthetic document: `pages` pages of 40 text blocks each
fn synthetic_elements(pages: u32) -> Vec<PageElement> {
    let mut elements = Vec::new();
    for page in 1..=pages {
        for row in 0..40 {
            let y0 = 20.0 + row as f32 * 18.0;
            elements.push(PageElement {
                page,
                bbox: Rect::new(40.0, y0, 555.0, y0 + 12.0),
                kind: ElementKind::Text {
                    content: format!("Page {} line {}: 読みやすい文章のサンプルです", page, row),
                    source_font: SourceFont::Fallback,
                },
            });
        }
    }
    elements
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("neo_encode");
    let options = EncodeOptions::default();
    let overrides = OverrideSettings {
        font_select: Some("Noto Sans JP".to_string()),
        font_size: Some(2.0),
        line_height: Some(1.5),
    };

    for pages in [1u32, 10, 100] {
        let elements = synthetic_elements(pages);
        group.throughput(Throughput::Elements(elements.len() as u64));
        group.bench_with_input(BenchmarkId::new("pages", pages), &elements, |b, elements| {
            b.iter(|| encode_elements(black_box(elements), &options, Some(&overrides)));
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("neo_decode");
    let options = DecodeOptions::default();

    for pages in [1u32, 10, 100] {
        let neo = encode_elements(&synthetic_elements(pages), &EncodeOptions::default(), None).neo;
        group.throughput(Throughput::Bytes(neo.len() as u64));
        group.bench_with_input(BenchmarkId::new("pages", pages), &neo, |b, neo| {
            b.iter(|| decode(black_box(neo), &options));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
