//! Benchmarks for validation and topology derivation on large trees

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use storage_target::{
    BootEnvironment, Dataset, Disk, DiskGeometry, LabelKind, Partition, PartitionType, Pool,
    PoolMembership, SizeValue, TargetTree, TopologyBuilder, Validator, ValidatorConfig, Vdev,
    VdevKind,
};

const GPT_ZFS: &str = "6a898cc3-1dd2-11b2-99a6-080020736631";

/// A root pool on one disk plus a data pool of mirrored partitions
fn build_tree(disks: usize) -> TargetTree {
    let mut tree = TargetTree::new();
    let root = tree.root();
    let part_size = SizeValue::parse("8g").unwrap();

    let mut boot = Disk::new("c0t0d0").whole_disk_in(PoolMembership::new("rpool"));
    boot.boot_disk = true;
    tree.add(root, boot);

    for i in 0..disks {
        let mut disk = Disk::new(format!("c1t{}d0", i));
        disk.label = LabelKind::Gpt;
        disk.geometry = DiskGeometry {
            total_sectors: 64 * 1024 * 1024,
            ..Default::default()
        };
        let disk = tree.add(root, disk);
        for p in 0..2u8 {
            let mut partition = Partition::new(p, PartitionType::Gpt(GPT_ZFS.into()), part_size);
            partition.membership =
                Some(PoolMembership::new("tank").in_vdev(format!("mirror-{}", (i / 2) * 2 + p as usize)));
            tree.add(disk, partition);
        }
    }

    let logical = tree.logical_or_insert();
    let rpool = tree.add(logical, Pool::root("rpool"));
    tree.add(rpool, BootEnvironment::new("solaris"));
    tree.add(rpool, Dataset::filesystem("export").mounted_at("/export"));

    let tank = tree.add(logical, Pool::new("tank"));
    for v in 0..disks {
        tree.add(tank, Vdev::new(format!("mirror-{}", v), VdevKind::Mirror));
    }
    for d in 0..disks {
        tree.add(tank, Dataset::filesystem(format!("data/{}", d)));
    }
    tree
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("validation");
    let validator = Validator::new(ValidatorConfig {
        require_active_partition: false,
        ..Default::default()
    });

    for disks in [16usize, 128, 512] {
        let tree = build_tree(disks);
        group.throughput(Throughput::Elements(tree.capacity() as u64));
        group.bench_with_input(BenchmarkId::new("validate", disks), &tree, |b, tree| {
            b.iter(|| validator.validate(black_box(tree)));
        });
    }

    group.finish();
}

fn bench_topology(c: &mut Criterion) {
    let mut group = c.benchmark_group("topology");

    for disks in [16usize, 128, 512] {
        let tree = build_tree(disks);
        let (tank, _) = tree.find_pool("tank").unwrap();
        group.bench_with_input(BenchmarkId::new("build", disks), &tree, |b, tree| {
            b.iter(|| TopologyBuilder::build(black_box(tree), tank));
        });
    }

    group.finish();
}

fn bench_size_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("size");
    group.throughput(Throughput::Elements(1));

    group.bench_function("parse", |b| {
        b.iter(|| SizeValue::parse(black_box("1.5tb")));
    });

    group.finish();
}

criterion_group!(benches, bench_validate, bench_topology, bench_size_parse);
criterion_main!(benches);
