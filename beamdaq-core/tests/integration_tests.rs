//! Integration tests for record files and EUDRB conversion.
//!
//! Files are synthesized in a temporary directory, written through the
//! record writer and read back through the reader and converter registry.
//! Run with: cargo test --test integration_tests

use beamdaq_core::output::{self, Columns};
use beamdaq_core::{
    BoardRecord, ConverterRegistry, DecodeError, DetectorRecord, RawBlockRecord, ReadOutcome,
    Record, RecordReader, RecordWriter, RunConfig, StandardEvent, UNKNOWN_TRIGGER_ID,
};
use std::path::Path;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const RUN: u32 = 4711;

/// ZS2 block with one line of `hits` consecutive pixels at (`col`, `row`)
/// in frame 0. `sof` shifts the pivot: 100 gives pivot 40.
fn zs2_block(row: u16, col: u16, hits: u16, sof: u32, trigger: u16) -> Vec<u8> {
    let line = (row << 4) | 1;
    let state = (col << 2) | (hits - 1);
    let frame1 = [u32::from(line) | (u32::from(state) << 16)];

    let mut words = vec![0u32, 0, 0, sof, 0x05, 9300, 0, 1, frame1.len() as u32];
    words.extend_from_slice(&frame1);
    words.extend_from_slice(&[0, 0, 2, 0]);
    words.extend_from_slice(&[0, u32::from(trigger) << 8, 0]);
    words[0] = 0xAB00_0000 | (words.len() as u32 - 4);
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

fn telescope_bore(boards: usize) -> RawBlockRecord {
    let mut bore = RawBlockRecord::bore("EUDRB", RUN);
    bore.header.tags.set("BOARDS", boards);
    bore.header.tags.set("DET", "MIMOSA26");
    bore.header.tags.set("MODE", "ZS2");
    bore.header.tags.set("VERSION", 2);
    bore
}

fn telescope_event(event: u32, boards: u32) -> RawBlockRecord {
    let mut record = RawBlockRecord::new("EUDRB", RUN, event);
    for id in 0..boards {
        let row = (event * 10 + id) as u16;
        record.add_block(id, zs2_block(row, 100 + id as u16, 2, 100, event as u16));
    }
    record
}

fn write_run(path: &Path, events: u32, boards: u32) {
    let mut writer = RecordWriter::create(path).expect("Failed to create file");
    writer.write(&telescope_bore(boards as usize).into()).unwrap();
    for event in 1..=events {
        writer.write(&telescope_event(event, boards).into()).unwrap();
    }
    writer
        .write(&RawBlockRecord::eore("EUDRB", RUN, events + 1).into())
        .unwrap();
    writer.flush().unwrap();
    assert_eq!(writer.records_written(), u64::from(events) + 2);
}

fn read_all(path: &Path) -> Vec<Record> {
    let mut reader = RecordReader::open(path).expect("Failed to open file");
    let mut records = Vec::new();
    while let ReadOutcome::Record(record) = reader.next_record(0).unwrap() {
        records.push(record);
    }
    records
}

fn convert_all(records: &[Record]) -> Vec<StandardEvent> {
    let mut registry = ConverterRegistry::with_builtin();
    let mut events = Vec::new();
    for record in records {
        if record.is_bore() {
            registry.initialize(record, &RunConfig::default()).unwrap();
        } else {
            events.push(registry.convert(record).unwrap());
        }
    }
    events
}

/// Test that a written run reads back record by record and converts.
#[test]
fn test_file_round_trip_and_convert() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run004711.raw");
    write_run(&path, 5, 3);

    let records = read_all(&path);
    assert_eq!(records.len(), 7);
    assert!(records[0].is_bore());
    assert!(records[6].is_eore());
    assert_eq!(records[0].get("BOARDS", 0usize), 3);
    assert_eq!(records[2], Record::from(telescope_event(2, 3)));

    let events = convert_all(&records);
    assert_eq!(events.len(), 6);
    assert!(events[5].is_empty(), "EORE converts to an empty event");

    for (index, event) in events[..5].iter().enumerate() {
        let number = index as u32 + 1;
        assert_eq!(event.run_number(), RUN);
        assert_eq!(event.event_number(), number);
        assert_eq!(event.num_planes(), 3);

        for plane in event.planes() {
            assert_eq!(plane.sensor(), "MIMOSA26");
            assert_eq!((plane.width(), plane.height()), (1152, 576));
            assert_eq!(plane.pivot_pixel(), 40);
            assert_eq!(plane.trigger_id(), number);
            assert_eq!(plane.hit_count(), 2);

            let first = plane.pixel(0).unwrap();
            assert_eq!(first.x, 100 + plane.id());
            assert_eq!(first.y, number * 10 + plane.id());
            assert_eq!(first.frame, 0);
        }
    }
}

/// Test that skipping lands on the requested record and keeps the run number.
#[test]
fn test_skip_records() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("skip.raw");
    write_run(&path, 10, 2);

    let mut reader = RecordReader::open(&path).unwrap();
    assert_eq!(reader.run_number(), None);

    let ReadOutcome::Record(record) = reader.next_record(4).unwrap() else {
        panic!("expected a record after skipping");
    };
    assert_eq!(record.event_number(), 4);
    assert_eq!(reader.run_number(), Some(RUN));

    let ReadOutcome::Record(record) = reader.next_record(0).unwrap() else {
        panic!("expected the following record");
    };
    assert_eq!(record.event_number(), 5);
    assert_eq!(reader.records_read(), 2);

    assert!(matches!(
        reader.next_record(100).unwrap(),
        ReadOutcome::EndOfStream
    ));
}

/// Test that legacy per-board records decode like raw block records but
/// take the trigger id from the first board.
#[test]
fn test_legacy_board_records() {
    let mut bore = BoardRecord::bore(RUN);
    bore.header.tags = telescope_bore(2).header.tags;

    let mut data = BoardRecord::new(RUN, 1);
    data.add_board(0, zs2_block(5, 10, 1, 100, 0x101));
    data.add_board(1, zs2_block(6, 11, 1, 100, 0x102));

    let mut registry = ConverterRegistry::with_builtin();
    registry
        .initialize(&bore.into(), &RunConfig::default())
        .unwrap();

    let record = Record::from(data);
    assert_eq!(registry.trigger_id(&record), 0x101);

    let event = registry.convert(&record).unwrap();
    let triggers: Vec<u32> = event.planes().iter().map(|p| p.trigger_id()).collect();
    assert_eq!(triggers, vec![0x101, 0x102]);
}

/// Test that detector records survive the file and fan out to converters.
#[test]
fn test_detector_records() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("detector.raw");

    let mut bore = DetectorRecord::bore(RUN);
    bore.add(telescope_bore(2));
    bore.add(RawBlockRecord::bore("TLU", RUN));

    let mut data = DetectorRecord::new(RUN, 1);
    data.add(RawBlockRecord::new("TLU", RUN, 1));
    data.add(telescope_event(1, 2));

    {
        let mut writer = RecordWriter::create(&path).unwrap();
        writer.write(&bore.into()).unwrap();
        writer.write(&data.into()).unwrap();
        writer.flush().unwrap();
    }

    let records = read_all(&path);
    assert_eq!(records.len(), 2);
    let Record::Detector(detector) = &records[1] else {
        panic!("expected a detector record");
    };
    assert_eq!(detector.records.len(), 2);
    assert_eq!(detector.records[0].subtype(), "TLU");

    let events = convert_all(&records);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].num_planes(), 2);
}

/// Test that conversion errors name the offending value.
#[test]
fn test_bad_configuration_is_fatal() {
    let mut bore = telescope_bore(1);
    bore.header.tags.set("MODE", "RAW1");

    let mut registry = ConverterRegistry::with_builtin();
    let err = registry
        .initialize(&bore.into(), &RunConfig::default())
        .unwrap_err();
    assert!(matches!(err, DecodeError::UnknownMode(ref mode) if mode == "RAW1"));
    assert!(err.to_string().contains("RAW1"));

    let unknown = Record::from(RawBlockRecord::new("CMSPIXEL", RUN, 1));
    assert_eq!(registry.trigger_id(&unknown), UNKNOWN_TRIGGER_ID);
    assert!(matches!(
        registry.convert(&unknown),
        Err(DecodeError::NoConverter { .. })
    ));
}

/// Test that records decode in parallel through a shared registry.
#[test]
fn test_parallel_decode() {
    let mut registry = ConverterRegistry::with_builtin();
    registry
        .initialize(&telescope_bore(4).into(), &RunConfig::default())
        .unwrap();
    let records: Vec<Record> = (1..=64).map(|n| telescope_event(n, 4).into()).collect();

    let registry = &registry;
    let hits: usize = thread::scope(|scope| {
        let handles: Vec<_> = records
            .chunks(16)
            .map(|chunk| {
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|r| registry.convert(r).unwrap())
                        .flat_map(|e| e.planes().to_vec())
                        .map(|p| p.hit_count())
                        .sum::<usize>()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(hits, 64 * 4 * 2);
}

/// Test that decoded hits are written to CSV.
#[test]
fn test_hit_csv_output() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("run.raw");
    let csv = dir.path().join("hits.csv");
    write_run(&raw, 2, 2);

    let events = convert_all(&read_all(&raw));
    let written = output::write_csv(&csv, &events, "event,plane,x,y".parse::<Columns>().unwrap())
        .unwrap();
    assert_eq!(written, 2 * 2 * 2);

    let content = std::fs::read_to_string(&csv).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "event,plane,x,y");
    assert_eq!(lines[1], "1,0,100,10");
    assert_eq!(lines[2], "1,0,101,10");
    assert_eq!(lines.len(), 9);
}

/// Test that a reader following a growing file can be interrupted.
#[test]
fn test_follow_mode_interrupt() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("live.raw");
    write_run(&path, 1, 1);

    let mut reader = RecordReader::open(&path)
        .unwrap()
        .follow(Duration::from_millis(5));
    let interrupter = reader.interrupter();

    let handle = thread::spawn(move || {
        let mut outcomes = Vec::new();
        loop {
            match reader.next_record(0).unwrap() {
                ReadOutcome::Record(record) => outcomes.push(record.event_number()),
                ReadOutcome::Interrupted => return outcomes,
                ReadOutcome::EndOfStream => panic!("follow mode never reports end of stream"),
            }
        }
    });

    thread::sleep(Duration::from_millis(100));
    interrupter.interrupt();
    let events = handle.join().unwrap();
    assert_eq!(events, vec![0, 1, 2]);
}
