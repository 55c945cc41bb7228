//! Per-board decode configuration.
//!
//! The begin-of-run record of an EUDRB run describes every board through
//! string tags (`BOARDS`, `DETn`, `MODEn`, `IDn`, with global `DET`, `MODE`
//! and `VERSION` fallbacks). [`BoardTable::resolve`] turns those tags into an
//! immutable table keyed by board id that the decoder uses for the whole run.

use crate::decoder::DecodeError;
use crate::record::{Record, Tags};
use crate::sensor::{DetectorType, SensorInfo};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

const DEFAULT_DETECTOR: &str = "MIMOTEL";
const DEFAULT_MODE: &str = "RAW3";

/// Readout mode of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeMode {
    /// Zero suppressed, 4 bytes per pixel
    Zs,
    /// Full readout, one frame
    Raw1,
    /// Full readout, two frames
    Raw2,
    /// Full readout, three frames
    Raw3,
    /// MIMOSA26 zero suppressed with run-length states
    Zs2,
}

impl DecodeMode {
    /// Readout frames per trigger.
    pub fn frames(self) -> u32 {
        match self {
            DecodeMode::Zs | DecodeMode::Raw1 => 1,
            DecodeMode::Raw2 | DecodeMode::Zs2 => 2,
            DecodeMode::Raw3 => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DecodeMode::Zs => "ZS",
            DecodeMode::Raw1 => "RAW1",
            DecodeMode::Raw2 => "RAW2",
            DecodeMode::Raw3 => "RAW3",
            DecodeMode::Zs2 => "ZS2",
        }
    }
}

impl fmt::Display for DecodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DecodeMode {
    type Err = DecodeError;

    /// Parses the run-start `MODE` tag. Only modes the producer can be
    /// configured with are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ZS" => Ok(DecodeMode::Zs),
            "ZS2" => Ok(DecodeMode::Zs2),
            "RAW2" => Ok(DecodeMode::Raw2),
            "RAW3" => Ok(DecodeMode::Raw3),
            other => Err(DecodeError::UnknownMode(other.to_string())),
        }
    }
}

/// Resolved configuration of one board, fixed for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardInfo {
    pub detector: DetectorType,
    pub mode: DecodeMode,
    /// EUDRB protocol version, always >= 1
    pub version: u32,
    /// Set when the version was guessed because `VERSION` was missing
    pub version_guessed: bool,
}

impl BoardInfo {
    pub fn new(detector: DetectorType, mode: DecodeMode, version: u32) -> Self {
        Self {
            detector,
            mode,
            version,
            version_guessed: false,
        }
    }

    /// Resolves board `index` from run-start tags.
    pub fn from_tags(tags: &Tags, index: usize) -> Result<Self, DecodeError> {
        let det_name = per_board_tag(tags, "DET", index, DEFAULT_DETECTOR);
        let detector =
            DetectorType::from_name(&det_name).ok_or_else(|| DecodeError::UnknownDetector {
                name: det_name.clone(),
                known: DetectorType::names().join(", "),
            })?;

        let mode: DecodeMode = per_board_tag(tags, "MODE", index, DEFAULT_MODE).parse()?;

        let mut info = BoardInfo::new(detector, mode, tags.get("VERSION", 0u32));
        if info.version == 0 {
            info.version = if detector == DetectorType::Mimotel && mode != DecodeMode::Raw2 {
                1
            } else {
                2
            };
            info.version_guessed = true;
            warn!(
                board = index,
                "No EUDRB Version tag, guessing VERSION={}",
                info.version
            );
        }
        Ok(info)
    }

    /// Static geometry of this board's sensor.
    pub fn sensor(&self) -> &'static SensorInfo {
        self.detector.sensor()
    }
}

/// `<key><index>`, else the global `<key>`, else `default`. Empty values
/// count as absent.
fn per_board_tag(tags: &Tags, key: &str, index: usize, default: &str) -> String {
    tags.tag(&format!("{key}{index}"))
        .filter(|v| !v.is_empty())
        .or_else(|| tags.tag(key).filter(|v| !v.is_empty()))
        .unwrap_or(default)
        .to_string()
}

/// Board configurations of one run, indexed by board id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardTable {
    run_number: u32,
    boards: BTreeMap<u32, BoardInfo>,
}

impl BoardTable {
    /// Resolves every board announced by a begin-of-run record.
    pub fn resolve(bore: &Record) -> Result<Self, DecodeError> {
        let tags = bore.tags();
        let nboards: usize = tags.get("BOARDS", 0);
        let mut table = BoardTable {
            run_number: bore.run_number(),
            boards: BTreeMap::new(),
        };

        for index in 0..nboards {
            let id: u32 = tags.get(&format!("ID{index}"), index as u32);
            let info = BoardInfo::from_tags(tags, index)?;
            debug!(
                run = table.run_number,
                board = index,
                id,
                detector = info.sensor().name,
                mode = %info.mode,
                version = info.version,
                "resolved board"
            );
            table.insert(id, info);
        }

        Ok(table)
    }

    /// Stores `info` under `id`, replacing any earlier entry.
    pub fn insert(&mut self, id: u32, info: BoardInfo) -> Option<BoardInfo> {
        self.boards.insert(id, info)
    }

    /// Looks up the configuration of board `id`.
    pub fn lookup(&self, id: u32) -> Result<&BoardInfo, DecodeError> {
        self.boards.get(&id).ok_or(DecodeError::UnrecognizedId {
            id,
            count: self.boards.len(),
        })
    }

    pub fn run_number(&self) -> u32 {
        self.run_number
    }

    /// Number of configured boards.
    pub fn len(&self) -> usize {
        self.boards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }

    /// Iterates over `(id, info)` in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &BoardInfo)> {
        self.boards.iter().map(|(&id, info)| (id, info))
    }
}
