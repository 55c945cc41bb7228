//! Output writers for decoded standard events.
//!
//! Hits are written as CSV with a configurable column selection; a second
//! writer emits one summary line per plane.

use crate::types::{Pixel, StandardEvent, StandardPlane};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// One column of the hit CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Event,
    Plane,
    X,
    Y,
    Value,
    Pivot,
    Frame,
}

impl Column {
    const ALL: [Column; 7] = [
        Column::Event,
        Column::Plane,
        Column::X,
        Column::Y,
        Column::Value,
        Column::Pivot,
        Column::Frame,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Column::Event => "event",
            Column::Plane => "plane",
            Column::X => "x",
            Column::Y => "y",
            Column::Value => "value",
            Column::Pivot => "pivot",
            Column::Frame => "frame",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "event" | "ev" => Some(Column::Event),
            "plane" | "board" | "id" => Some(Column::Plane),
            "x" => Some(Column::X),
            "y" => Some(Column::Y),
            "value" | "adc" => Some(Column::Value),
            "pivot" => Some(Column::Pivot),
            "frame" => Some(Column::Frame),
            _ => None,
        }
    }

    #[inline]
    fn value(self, event: u32, plane: u32, pixel: &Pixel) -> u32 {
        match self {
            Column::Event => event,
            Column::Plane => plane,
            Column::X => pixel.x,
            Column::Y => pixel.y,
            Column::Value => u32::from(pixel.value),
            Column::Pivot => u32::from(pixel.pivot),
            Column::Frame => u32::from(pixel.frame),
        }
    }
}

/// Ordered column selection for the hit CSV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Columns(Vec<Column>);

impl Default for Columns {
    fn default() -> Self {
        Self(Column::ALL.to_vec())
    }
}

impl std::str::FromStr for Columns {
    type Err = OutputError;

    /// Parses a selection like `"event,plane,x,y,value"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut columns = Vec::new();
        for part in s.split(',').map(|p| p.trim().to_lowercase()) {
            let column = Column::parse(&part).ok_or_else(|| {
                OutputError::InvalidFormat(format!(
                    "Unknown column: {}. Use event, plane, x, y, value, pivot, frame",
                    part
                ))
            })?;
            if columns.contains(&column) {
                return Err(OutputError::InvalidFormat(format!(
                    "Duplicate column: {}",
                    part
                )));
            }
            columns.push(column);
        }
        Ok(Self(columns))
    }
}

impl Columns {
    /// Header line for this selection.
    pub fn header(&self) -> String {
        self.0
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn as_slice(&self) -> &[Column] {
        &self.0
    }
}

/// CSV writer for decoded hits, one line per pixel.
pub struct HitCsvWriter<W: Write> {
    writer: BufWriter<W>,
    columns: Columns,
    hits_written: u64,
}

impl<W: Write> HitCsvWriter<W> {
    pub fn new(writer: W, columns: Columns) -> Self {
        Self {
            writer: BufWriter::new(writer),
            columns,
            hits_written: 0,
        }
    }

    pub fn write_header(&mut self) -> Result<(), OutputError> {
        writeln!(self.writer, "{}", self.columns.header())?;
        Ok(())
    }

    /// Writes every hit of every plane of `event`.
    pub fn write_event(&mut self, event: &StandardEvent) -> Result<(), OutputError> {
        for plane in event.planes() {
            for pixel in plane.pixels() {
                self.write_hit(event.event_number(), plane.id(), pixel)?;
            }
        }
        Ok(())
    }

    #[inline]
    fn write_hit(&mut self, event: u32, plane: u32, pixel: &Pixel) -> Result<(), OutputError> {
        for (i, column) in self.columns.as_slice().iter().enumerate() {
            if i > 0 {
                self.writer.write_all(b",")?;
            }
            write!(self.writer, "{}", column.value(event, plane, pixel))?;
        }
        self.writer.write_all(b"\n")?;
        self.hits_written += 1;
        Ok(())
    }

    pub fn hits_written(&self) -> u64 {
        self.hits_written
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// CSV writer with one summary line per decoded plane.
pub struct PlaneCsvWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> PlaneCsvWriter<W> {
    pub const HEADER: &'static str = "event,plane,sensor,width,height,pivot,trigger,hits";

    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    pub fn write_header(&mut self) -> Result<(), OutputError> {
        writeln!(self.writer, "{}", Self::HEADER)?;
        Ok(())
    }

    pub fn write_event(&mut self, event: &StandardEvent) -> Result<(), OutputError> {
        for plane in event.planes() {
            self.write_plane(event.event_number(), plane)?;
        }
        Ok(())
    }

    fn write_plane(&mut self, event: u32, plane: &StandardPlane) -> Result<(), OutputError> {
        writeln!(
            self.writer,
            "{},{},{},{},{},{},{},{}",
            event,
            plane.id(),
            plane.sensor(),
            plane.width(),
            plane.height(),
            plane.pivot_pixel(),
            plane.trigger_id(),
            plane.hit_count()
        )?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes the hits of `events` to a CSV file.
pub fn write_csv<P: AsRef<Path>>(
    path: P,
    events: &[StandardEvent],
    columns: Columns,
) -> Result<u64, OutputError> {
    let file = File::create(path)?;
    let mut writer = HitCsvWriter::new(file, columns);
    writer.write_header()?;
    for event in events {
        writer.write_event(event)?;
    }
    writer.flush()?;
    Ok(writer.hits_written())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample_event() -> StandardEvent {
        let mut plane = StandardPlane::new(6, "EUDRB", "MIMOSA26", 1152, 576);
        plane.set_pivot_pixel(40);
        plane.set_trigger_id(77);
        plane.push_pixel(Pixel::new(100, 10, 1, true, 0));
        plane.push_pixel(Pixel::new(7, 30, 1, false, 1));

        let mut event = StandardEvent::new(3, 12);
        event.add_plane(plane);
        event
    }

    #[test]
    fn test_column_parsing() {
        assert_eq!(
            Columns::from_str("event,plane,x,y,value,pivot,frame").unwrap(),
            Columns::default()
        );
        let columns = Columns::from_str("X, Y, ADC").unwrap();
        assert_eq!(columns.as_slice(), &[Column::X, Column::Y, Column::Value]);
        assert_eq!(columns.header(), "x,y,value");
    }

    #[test]
    fn test_column_parsing_invalid() {
        assert!(Columns::from_str("x,y,z").is_err());
        assert!(Columns::from_str("x,x").is_err());
        assert!(Columns::from_str("").is_err());
    }

    #[test]
    fn test_hit_csv_writer() {
        let mut output = Vec::new();
        {
            let mut writer = HitCsvWriter::new(&mut output, Columns::default());
            writer.write_header().unwrap();
            writer.write_event(&sample_event()).unwrap();
            assert_eq!(writer.hits_written(), 2);
            writer.flush().unwrap();
        }

        let output_str = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = output_str.lines().collect();
        assert_eq!(
            lines,
            vec![
                "event,plane,x,y,value,pivot,frame",
                "12,6,100,10,1,1,0",
                "12,6,7,30,1,0,1",
            ]
        );
    }

    #[test]
    fn test_plane_csv_writer() {
        let mut output = Vec::new();
        {
            let mut writer = PlaneCsvWriter::new(&mut output);
            writer.write_event(&sample_event()).unwrap();
            writer.flush().unwrap();
        }

        let output_str = String::from_utf8(output).unwrap();
        assert_eq!(output_str, "12,6,MIMOSA26,1152,576,40,77,2\n");
    }
}
