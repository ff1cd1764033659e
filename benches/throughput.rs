//! Throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use crosscontrol_core::core::action::validate_payload;
use crosscontrol_core::core::device::interchange::{parse_csv, parse_ndjson, to_csv, to_ndjson};
use crosscontrol_core::core::transport::Endpoint;
use crosscontrol_core::{Device, ProtocolKind};
use serde_json::json;

fn sample_devices(count: usize) -> Vec<Device> {
    (0..count)
        .map(|i| {
            Device::new(format!("dev-{i}"), format!("Sensor \"{i}\", hall"), ProtocolKind::Tcp)
                .endpoint(format!("10.0.{}.{}:502", i / 250, i % 250 + 1))
                .owned_by("ops", "plant-a")
        })
        .collect()
}

fn interchange_benchmark(c: &mut Criterion) {
    let devices = sample_devices(1000);
    let csv = to_csv(&devices);
    let ndjson = to_ndjson(&devices).unwrap();

    let mut group = c.benchmark_group("interchange");

    group.throughput(Throughput::Bytes(csv.len() as u64));
    group.bench_function("csv_parse", |b| {
        b.iter(|| {
            let records = parse_csv(black_box(&csv));
            black_box(records)
        })
    });

    group.throughput(Throughput::Bytes(ndjson.len() as u64));
    group.bench_function("ndjson_parse", |b| {
        b.iter(|| {
            let records = parse_ndjson(black_box(&ndjson));
            black_box(records)
        })
    });

    group.finish();
}

fn validation_benchmark(c: &mut Criterion) {
    let http = json!({
        "method": "POST",
        "url": "https://device.local/api/v1/relay",
        "headers": {"X-Trace": "1"},
        "body": {"relay": 2, "on": true},
        "token": "abc",
        "auto_bearer": true
    });
    let tcp = json!({"host": "10.0.0.5", "port": 502, "body": "01 03 00 00 00 0A", "hex": true});

    let mut group = c.benchmark_group("validation");

    group.bench_function("http_payload", |b| {
        b.iter(|| validate_payload(ProtocolKind::Http, black_box(&http)).is_ok())
    });

    group.bench_function("tcp_payload", |b| {
        b.iter(|| validate_payload(ProtocolKind::Tcp, black_box(&tcp)).is_ok())
    });

    group.bench_function("endpoint_parse", |b| {
        b.iter(|| Endpoint::parse(ProtocolKind::Tcp, black_box("tcp://192.168.1.20:8080")).is_ok())
    });

    group.finish();
}

criterion_group!(benches, interchange_benchmark, validation_benchmark);
criterion_main!(benches);
