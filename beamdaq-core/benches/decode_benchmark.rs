//! Benchmarks for EUDRB block decoding and record conversion.
//!
//! Run with: cargo bench

use beamdaq_core::decoder::decode_plane;
use beamdaq_core::{
    codec, BoardInfo, CodecRegistry, ConverterRegistry, DecodeMode, DetectorType,
    RawBlockRecord, Record, RunConfig,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

/// Full MIMOTEL RAW3 block with a pseudo-random ADC pattern.
fn raw_block(info: &BoardInfo) -> Vec<u8> {
    let sensor = info.sensor();
    let words = sensor.cols * sensor.rows * sensor.mats * info.mode.frames();
    let mut data = vec![0u8; 8];
    data[5..8].copy_from_slice(&[0x00, 0x40, 0x00]);
    for i in 0..words {
        data.extend_from_slice(&((i.wrapping_mul(2_654_435_761) >> 20) as u16 & 0x0FFF).to_be_bytes());
    }
    data.extend_from_slice(&[0u8; 8]);
    data
}

/// ZS2 block with `lines` lines of two states per frame.
fn zs2_block(lines: u16) -> Vec<u8> {
    let mut halves = Vec::new();
    for row in 0..lines {
        halves.push(((row * 3) << 4) | 2);
        halves.push(((row * 7 % 1100) << 2) | 3);
        halves.push((((row * 7 + 40) % 1100) << 2) | 1);
    }
    if halves.len() % 2 == 1 {
        halves.push(0);
    }
    let frame: Vec<u32> = halves
        .chunks(2)
        .map(|pair| u32::from(pair[0]) | (u32::from(pair[1]) << 16))
        .collect();

    let mut words = vec![0u32, 0, 0, 100, 5, 9300, 0, 1, frame.len() as u32];
    words.extend_from_slice(&frame);
    words.extend_from_slice(&[0, 0, 2, frame.len() as u32]);
    words.extend_from_slice(&frame);
    words.extend_from_slice(&[0, 0x0001_2300, 0]);
    words[0] = 0xAB00_0000 | (words.len() as u32 - 4);
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

fn decode_raw_benchmark(c: &mut Criterion) {
    let info = BoardInfo::new(DetectorType::Mimotel, DecodeMode::Raw3, 2);
    let block = raw_block(&info);

    let mut group = c.benchmark_group("decode_raw");
    group.throughput(Throughput::Bytes(block.len() as u64));
    group.bench_function("mimotel_raw3", |b| {
        b.iter(|| {
            let decoded = decode_plane(black_box(&block), 0, &info).unwrap();
            black_box(decoded.plane.hit_count())
        })
    });
    group.finish();
}

fn decode_zs2_benchmark(c: &mut Criterion) {
    let info = BoardInfo::new(DetectorType::Mimosa26, DecodeMode::Zs2, 2);
    let block = zs2_block(500);

    let mut group = c.benchmark_group("decode_zs2");
    group.throughput(Throughput::Bytes(block.len() as u64));
    group.bench_function("mimosa26_500_lines", |b| {
        b.iter(|| {
            let decoded = decode_plane(black_box(&block), 0, &info).unwrap();
            black_box(decoded.plane.hit_count())
        })
    });
    group.finish();
}

fn convert_record_benchmark(c: &mut Criterion) {
    let mut bore = RawBlockRecord::bore("EUDRB", 1);
    bore.header.tags.set("BOARDS", 6);
    bore.header.tags.set("DET", "MIMOSA26");
    bore.header.tags.set("MODE", "ZS2");
    bore.header.tags.set("VERSION", 2);

    let mut registry = ConverterRegistry::with_builtin();
    registry
        .initialize(&bore.into(), &RunConfig::default())
        .unwrap();

    let mut data = RawBlockRecord::new("EUDRB", 1, 1);
    for id in 0..6 {
        data.add_block(id, zs2_block(200));
    }
    let record = Record::from(data);
    let encoded = codec::encode(&record).unwrap();
    let codecs = CodecRegistry::with_builtin();

    let mut group = c.benchmark_group("convert_record");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("telescope_6_planes", |b| {
        b.iter(|| {
            let record = codecs.decode(black_box(&encoded)).unwrap();
            let event = registry.convert(&record).unwrap();
            black_box(event.num_planes())
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    decode_raw_benchmark,
    decode_zs2_benchmark,
    convert_record_benchmark
);
criterion_main!(benches);
