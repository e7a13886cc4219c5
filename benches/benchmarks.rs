use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::HashMap;
use tokio::io::AsyncReadExt;
use tokio::runtime::Runtime;
use yamime::quotedprintable::{new_utf8_reader, Reader};
use yamime::{format_media_type, parse_media_type};

// Benchmark media type parsing
fn bench_parse_media_type(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_media_type");

    let test_cases = vec![
        ("simple", "text/html"),
        ("with_charset", "text/html; charset=utf-8"),
        (
            "complex",
            "multipart/form-data; boundary=----WebKitFormBoundary7MA4YWxkTrZu0gW",
        ),
        (
            "rfc2231",
            "attachment; filename*0*=utf-8''rapport%20; filename*1=\"slutgiltig.pdf\"",
        ),
    ];

    for (name, input) in test_cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), &input, |b, &input| {
            b.iter(|| parse_media_type(black_box(input)));
        });
    }

    group.finish();
}

// Benchmark media type formatting
fn bench_format_media_type(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_media_type");

    let mut params = HashMap::new();
    params.insert("charset".to_string(), "utf-8".to_string());
    params.insert("boundary".to_string(), "----boundary".to_string());

    group.bench_function("with_params", |b| {
        b.iter(|| format_media_type(black_box("multipart/form-data"), black_box(&params)));
    });

    group.finish();
}

fn quoted_printable_body(len: usize) -> Vec<u8> {
    let mut body = Vec::with_capacity(len + 128);
    while body.len() < len {
        body.extend_from_slice(b"Denna f=C3=B6rfr=C3=A5gan g=C3\r\n=A4ller bara kostnad=\r\n f=C3=B6r order 768298.\r\n");
    }
    body
}

// Benchmark streaming quoted-printable decoding
fn bench_quoted_printable_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("quoted_printable_decode");
    let rt = Runtime::new().unwrap();
    let body = quoted_printable_body(256 * 1024);
    group.throughput(Throughput::Bytes(body.len() as u64));

    group.bench_function("lenient", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut out = Vec::with_capacity(body.len());
                Reader::new(black_box(&body[..]))
                    .read_to_end(&mut out)
                    .await
                    .unwrap();
                out
            })
        });
    });

    group.bench_function("strict", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut out = Vec::with_capacity(body.len());
                Reader::strict(black_box(&body[..]))
                    .read_to_end(&mut out)
                    .await
                    .unwrap();
                out
            })
        });
    });

    group.bench_function("with_utf8_rejoin", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut out = Vec::with_capacity(body.len());
                new_utf8_reader(black_box(&body[..]))
                    .read_to_end(&mut out)
                    .await
                    .unwrap();
                out
            })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_parse_media_type,
    bench_format_media_type,
    bench_quoted_printable_decode
);
criterion_main!(benches);
