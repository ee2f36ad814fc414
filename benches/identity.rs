//! Benchmark for identity resolution, the filter pipeline and the hierarchy
//! cache, the per-device work done on every full scan
//!
//! Target: 10K devices resolved and filtered per scan in well under 100ms

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use node_device_manager::domain::{DeviceRecord, DeviceType};
use node_device_manager::filter::{
    DeviceValidityFilter, Filter, FilterRegistry, PathFilter, RegisteredFilter, VendorFilter,
};
use node_device_manager::hardware::HierarchyCache;
use node_device_manager::identity::IdentityResolver;
use std::sync::Arc;

fn disk(i: usize) -> DeviceRecord {
    let mut record = DeviceRecord::new(format!("/dev/sd{}", i));
    record.attributes.device_type = DeviceType::Disk;
    record.attributes.capacity = 10 * 1024 * 1024 * 1024;
    record.attributes.wwn = format!("5000C500{:08X}", i);
    record.attributes.serial = format!("ZA{:06}", i);
    record.attributes.model = "ST4000NM0035".to_string();
    record.attributes.vendor = "SEAGATE".to_string();
    record.attributes.id_type = "disk".to_string();
    record
}

fn partition(i: usize) -> DeviceRecord {
    let mut record = DeviceRecord::new(format!("/dev/sd{}1", i));
    record.attributes.device_type = DeviceType::Partition;
    record.attributes.capacity = 1024 * 1024 * 1024;
    record.partition.entry_uuid = format!("6a1b4d3c-0000-4000-8000-{:012}", i);
    record.dependents.parent = format!("/dev/sd{}", i);
    record
}

fn registry() -> FilterRegistry {
    let registry = FilterRegistry::new();
    let mut validity = DeviceValidityFilter::new();
    validity.start();
    let filters: Vec<(&str, Arc<dyn Filter>)> = vec![
        ("device-validity-filter", Arc::new(validity)),
        ("vendor-filter", Arc::new(VendorFilter::new(Vec::new(), vec!["CD-ROM".to_string()]))),
        ("path-filter", Arc::new(PathFilter::new(Vec::new(), vec!["loop".to_string()]))),
    ];
    for (key, filter) in filters {
        registry.register(RegisteredFilter {
            key: key.to_string(),
            name: key.to_string(),
            enabled: true,
            filter,
        });
    }
    registry
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity");
    group.throughput(Throughput::Elements(1));

    let resolver = IdentityResolver::new("node-1");
    let disk = disk(1);
    let partition = partition(1);

    group.bench_function("resolve_wwn", |b| {
        b.iter(|| resolver.resolve(black_box(&disk)));
    });

    group.bench_function("resolve_partition", |b| {
        b.iter(|| resolver.resolve(black_box(&partition)));
    });

    group.bench_function("resolve_legacy", |b| {
        b.iter(|| resolver.resolve_legacy(black_box(&disk)));
    });

    group.finish();
}

fn bench_filters(c: &mut Criterion) {
    let mut group = c.benchmark_group("filters");
    let registry = registry();
    let records: Vec<DeviceRecord> = (0..1000).map(disk).collect();
    group.throughput(Throughput::Elements(records.len() as u64));

    group.bench_function("apply_filters_1000", |b| {
        b.iter(|| {
            records
                .iter()
                .filter(|r| registry.apply_filters(black_box(r)))
                .count()
        });
    });

    group.finish();
}

fn bench_full_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");
    let resolver = IdentityResolver::new("node-1");
    let registry = registry();
    let records: Vec<DeviceRecord> = (0..5000).flat_map(|i| [disk(i), partition(i)]).collect();
    group.throughput(Throughput::Elements(records.len() as u64));

    group.bench_function("rebuild_filter_resolve_10000", |b| {
        let cache = HierarchyCache::new();
        b.iter(|| {
            cache.rebuild(records.iter().cloned());
            records
                .iter()
                .filter(|r| registry.apply_filters(r))
                .filter_map(|r| resolver.resolve(r))
                .count()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_resolve, bench_filters, bench_full_scan);
criterion_main!(benches);
