use criterion::{black_box, criterion_group, criterion_main, Criterion};
use holeybag::checksum::digest_bytes;
use holeybag::{BagOptions, ChecksumAlgorithm, Filler, Loader, PackageFormat};
use tempfile::TempDir;

fn bench_digest(c: &mut Criterion) {
    let data = vec![0u8; 1024 * 1024];
    for alg in ChecksumAlgorithm::ALL {
        c.bench_function(&format!("digest_1mb_{alg}"), |b| {
            b.iter(|| digest_bytes(alg, black_box(&data)))
        });
    }
}

fn bench_fill_single_file(c: &mut Criterion) {
    let data = vec![42u8; 1024 * 1024];

    c.bench_function("fill_1mb_directory", |b| {
        b.iter(|| {
            let tmp = TempDir::new().unwrap();
            let mut filler = Filler::in_dir(tmp.path().join("bag"), BagOptions::default()).unwrap();
            filler.payload("bench.bin", black_box(&data[..])).unwrap();
            filler.to_directory().unwrap();
        })
    });

    c.bench_function("fill_1mb_zip", |b| {
        b.iter(|| {
            let tmp = TempDir::new().unwrap();
            let mut filler = Filler::in_dir(tmp.path().join("bag"), BagOptions::default()).unwrap();
            filler.payload("bench.bin", black_box(&data[..])).unwrap();
            filler.to_package(PackageFormat::Zip).unwrap();
        })
    });
}

fn bench_validate(c: &mut Criterion) {
    let data = vec![99u8; 512 * 1024];
    let tmp = TempDir::new().unwrap();
    let mut filler = Filler::in_dir(tmp.path().join("bag"), BagOptions::default()).unwrap();
    for i in 0..10 {
        filler.payload(&format!("file_{}.bin", i), &data[..]).unwrap();
    }
    let dir = filler.to_directory().unwrap();
    let bag = Loader::open(&dir, BagOptions::default()).unwrap().load().unwrap();

    c.bench_function("validate_10x_512kb", |b| b.iter(|| assert!(bag.is_valid().unwrap())));
}

criterion_group!(benches, bench_digest, bench_fill_single_file, bench_validate);
criterion_main!(benches);
