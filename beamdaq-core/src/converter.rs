//! Converter dispatch.
//!
//! A [`ConverterRegistry`] maps `(record type, subtype)` to the converter
//! that turns such records into a [`StandardEvent`]. The registry is built
//! explicitly, initialized from a begin-of-run record, and then only read, so
//! it can be shared across decode threads.

use crate::board::BoardTable;
use crate::config::RunConfig;
use crate::decoder::{self, DecodeError, UNKNOWN_TRIGGER_ID};
use crate::record::{Record, RecordType};
use crate::sync::SyncMonitor;
use crate::types::StandardEvent;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Turns records of one kind into standard events.
pub trait Converter: Send + Sync {
    fn name(&self) -> &str;

    /// Prepares the converter for a new run from its begin-of-run record.
    fn initialize(&mut self, bore: &Record, config: &RunConfig) -> Result<(), DecodeError>;

    /// Trigger counter of a data record, [`UNKNOWN_TRIGGER_ID`] if absent.
    fn trigger_id(&self, record: &Record) -> u32;

    /// Decodes one record. Begin and end-of-run records give an empty event.
    fn decode(&self, record: &Record) -> Result<StandardEvent, DecodeError>;
}

/// Which block carries the trigger counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerBlock {
    /// Legacy per-board records
    First,
    /// Raw block records
    Last,
}

#[derive(Debug)]
struct RunState {
    table: BoardTable,
    sync: SyncMonitor,
    ended: AtomicBool,
}

/// Converter for EUDRB telescope boards.
#[derive(Debug)]
pub struct EudrbConverter {
    trigger_block: TriggerBlock,
    run: Option<RunState>,
}

impl EudrbConverter {
    pub fn new(trigger_block: TriggerBlock) -> Self {
        Self {
            trigger_block,
            run: None,
        }
    }
}

impl Converter for EudrbConverter {
    fn name(&self) -> &str {
        "EUDRB"
    }

    fn initialize(&mut self, bore: &Record, config: &RunConfig) -> Result<(), DecodeError> {
        if let Some(previous) = &self.run {
            if !previous.ended.load(Ordering::Relaxed) {
                warn!(
                    converter = self.name(),
                    previous_run = previous.table.run_number(),
                    run = bore.run_number(),
                    "Converter re-initialized without an end-of-run record"
                );
            }
        }

        let table = BoardTable::resolve(bore)?;
        info!(
            converter = self.name(),
            run = table.run_number(),
            boards = table.len(),
            "Converter initialized"
        );
        self.run = Some(RunState {
            table,
            sync: SyncMonitor::new(&config.sync),
            ended: AtomicBool::new(false),
        });
        Ok(())
    }

    fn trigger_id(&self, record: &Record) -> u32 {
        let Some(source) = record.block_source() else {
            return UNKNOWN_TRIGGER_ID;
        };
        let index = match (self.trigger_block, source.block_count()) {
            (_, 0) => return UNKNOWN_TRIGGER_ID,
            (TriggerBlock::First, _) => 0,
            (TriggerBlock::Last, n) => n - 1,
        };
        source
            .block(index)
            .and_then(decoder::trigger_id)
            .unwrap_or(UNKNOWN_TRIGGER_ID)
    }

    fn decode(&self, record: &Record) -> Result<StandardEvent, DecodeError> {
        let mut event = StandardEvent::new(record.run_number(), record.event_number());
        if record.is_bore() {
            return Ok(event);
        }
        if record.is_eore() {
            if let Some(run) = &self.run {
                run.ended.store(true, Ordering::Relaxed);
            }
            return Ok(event);
        }

        let run = self.run.as_ref().ok_or(DecodeError::NotInitialized)?;

        let source = record
            .block_source()
            .ok_or(DecodeError::UnsupportedRecord(record.record_type()))?;

        let mut pivots = Vec::with_capacity(source.block_count());
        for index in 0..source.block_count() {
            let (Some(id), Some(data)) = (source.block_id(index), source.block(index)) else {
                continue;
            };
            let info = run.table.lookup(id)?;
            let decoded = decoder::decode_plane(data, id, info)?;
            if decoded.overflows > 0 {
                event.set_tag(format!("OVF{id}"), decoded.overflows);
            }
            pivots.push(decoded.plane.pivot_pixel());
            event.add_plane(decoded.plane);
        }

        if event.num_planes() > 1 {
            run.sync.observe(record.event_number(), &pivots);
        }
        Ok(event)
    }
}

/// Registry lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConverterKey {
    pub record_type: RecordType,
    pub subtype: String,
}

impl ConverterKey {
    pub fn new(record_type: RecordType, subtype: impl Into<String>) -> Self {
        Self {
            record_type,
            subtype: subtype.into(),
        }
    }

    pub fn of(record: &Record) -> Self {
        Self::new(record.record_type(), record.subtype())
    }
}

impl fmt::Display for ConverterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.subtype.is_empty() {
            write!(f, "{}", self.record_type)
        } else {
            write!(f, "{}:{}", self.record_type, self.subtype)
        }
    }
}

/// Explicit map from record kind to converter.
#[derive(Default)]
pub struct ConverterRegistry {
    converters: HashMap<ConverterKey, Box<dyn Converter>>,
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self.converters.keys().map(ToString::to_string).collect();
        keys.sort();
        f.debug_struct("ConverterRegistry")
            .field("converters", &keys)
            .finish()
    }
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the EUDRB converters for current and legacy records.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            ConverterKey::new(RecordType::RAW, "EUDRB"),
            Box::new(EudrbConverter::new(TriggerBlock::Last)),
        );
        registry.register(
            ConverterKey::new(RecordType::BOARD, ""),
            Box::new(EudrbConverter::new(TriggerBlock::First)),
        );
        registry
    }

    /// Adds a converter, returning the one it replaces.
    pub fn register(
        &mut self,
        key: ConverterKey,
        converter: Box<dyn Converter>,
    ) -> Option<Box<dyn Converter>> {
        self.converters.insert(key, converter)
    }

    pub fn find(&self, record: &Record) -> Option<&dyn Converter> {
        self.converters.get(&ConverterKey::of(record)).map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// Routes a begin-of-run record to its converter. A detector record
    /// initializes the converter of every sub-record.
    pub fn initialize(&mut self, bore: &Record, config: &RunConfig) -> Result<(), DecodeError> {
        if let Record::Detector(detector) = bore {
            for sub in &detector.records {
                let key = ConverterKey::of(sub);
                match self.converters.get_mut(&key) {
                    Some(converter) => converter.initialize(sub, config)?,
                    None => warn!(%key, "No converter for sub-record, skipping initialization"),
                }
            }
            return Ok(());
        }

        let key = ConverterKey::of(bore);
        let converter = self
            .converters
            .get_mut(&key)
            .ok_or_else(|| no_converter(bore))?;
        converter.initialize(bore, config)
    }

    /// Trigger counter of a record. Detector records report the first
    /// sub-record that carries one.
    pub fn trigger_id(&self, record: &Record) -> u32 {
        match record {
            Record::Detector(detector) => detector
                .records
                .iter()
                .map(|sub| self.trigger_id(sub))
                .find(|&id| id != UNKNOWN_TRIGGER_ID)
                .unwrap_or(UNKNOWN_TRIGGER_ID),
            _ => self
                .find(record)
                .map_or(UNKNOWN_TRIGGER_ID, |c| c.trigger_id(record)),
        }
    }

    /// Converts a record into a standard event. Sub-records of a detector
    /// record without a converter are skipped.
    pub fn convert(&self, record: &Record) -> Result<StandardEvent, DecodeError> {
        let Record::Detector(detector) = record else {
            let converter = self.find(record).ok_or_else(|| no_converter(record))?;
            return converter.decode(record);
        };

        let mut event = StandardEvent::new(record.run_number(), record.event_number());
        for sub in &detector.records {
            match self.find(sub) {
                Some(converter) => event.absorb(converter.decode(sub)?),
                None => debug!(key = %ConverterKey::of(sub), "No converter for sub-record"),
            }
        }
        Ok(event)
    }
}

fn no_converter(record: &Record) -> DecodeError {
    DecodeError::NoConverter {
        record_type: record.record_type(),
        subtype: record.subtype().to_string(),
    }
}
