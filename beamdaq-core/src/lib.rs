//! Record model, stream codec and EUDRB decoder for beam telescope data.
//!
//! Producers emit tagged records that are stored as a sequence of binary
//! frames. This crate reads and writes those streams and converts EUDRB
//! sensor data (raw, ZS and MIMOSA26 ZS2 readout) into sensor-agnostic
//! [`StandardEvent`]s.
//!
//! # Example
//!
//! ```no_run
//! use beamdaq_core::{ConverterRegistry, ReadOutcome, RecordReader, RunConfig};
//!
//! let config = RunConfig::default();
//! let mut registry = ConverterRegistry::with_builtin();
//! let mut reader = RecordReader::open("run000123.raw").unwrap();
//!
//! while let ReadOutcome::Record(record) = reader.next_record(0).unwrap() {
//!     if record.is_bore() {
//!         registry.initialize(&record, &config).unwrap();
//!         continue;
//!     }
//!     let event = registry.convert(&record).unwrap();
//!     println!("event {}: {} planes", event.event_number(), event.num_planes());
//! }
//! ```
//!
//! # Features
//!
//! - Tagged records with typed tag lookup and an explicit codec registry
//! - Frame skipping, run number query and cross-thread interrupt on read
//! - Raw 1/2/3-frame, ZS and ZS2 decoding with geometry remapping
//! - Cross-board pivot synchronization check

pub mod board;
pub mod codec;
pub mod config;
pub mod converter;
pub mod decoder;
pub mod output;
pub mod parser;
pub mod reader;
pub mod record;
pub mod sensor;
pub mod sync;
pub mod types;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use board::{BoardInfo, BoardTable, DecodeMode};
pub use codec::{CodecError, CodecRegistry};
pub use config::{ConfigError, RunConfig};
pub use converter::{Converter, ConverterKey, ConverterRegistry, EudrbConverter, TriggerBlock};
pub use decoder::{DecodeError, UNKNOWN_TRIGGER_ID};
pub use output::{Columns, OutputError};
pub use reader::{Interrupter, ReadOutcome, RecordReader, RecordWriter};
pub use record::{
    BlockSource, BoardRecord, DetectorRecord, RawBlockRecord, Record, RecordType, Tags,
};
pub use sensor::{DetectorType, SensorInfo};
pub use types::{Pixel, StandardEvent, StandardPlane};
