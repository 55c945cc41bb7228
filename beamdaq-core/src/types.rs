//! Sensor-agnostic decode output.
//!
//! A [`StandardPlane`] holds the hits of one board for one trigger; a
//! [`StandardEvent`] collects the planes of all boards. These types are the
//! entire surface offered to downstream analysis adapters.

use crate::record::Tags;
use std::fmt::Display;

/// A decoded pixel hit.
///
/// Raw modes emit every pixel of every frame; zero-suppressed modes emit only
/// pixels above threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pixel {
    /// X coordinate on the output plane
    pub x: u32,
    /// Y coordinate on the output plane
    pub y: u32,
    /// ADC value (12 bits), or 1 for binary readout
    pub value: u16,
    /// Whether the pixel was read out after the pivot address
    pub pivot: bool,
    /// Readout frame index within the trigger
    pub frame: u8,
}

impl Pixel {
    #[inline]
    pub fn new(x: u32, y: u32, value: u16, pivot: bool, frame: u8) -> Self {
        Self {
            x,
            y,
            value,
            pivot,
            frame,
        }
    }
}

/// The decoded hits of one board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardPlane {
    id: u32,
    kind: &'static str,
    sensor: &'static str,
    width: u32,
    height: u32,
    pivot_pixel: u32,
    trigger_id: u32,
    pixels: Vec<Pixel>,
}

impl StandardPlane {
    pub(crate) fn new(id: u32, kind: &'static str, sensor: &'static str, width: u32, height: u32) -> Self {
        Self {
            id,
            kind,
            sensor,
            width,
            height,
            pivot_pixel: 0,
            trigger_id: 0,
            pixels: Vec::new(),
        }
    }

    /// Board id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Producer kind, e.g. `"EUDRB"`
    pub fn kind(&self) -> &str {
        self.kind
    }

    /// Sensor name, e.g. `"MIMOSA26"`
    pub fn sensor(&self) -> &str {
        self.sensor
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pivot_pixel(&self) -> u32 {
        self.pivot_pixel
    }

    /// Trigger counter stamped into the block trailer
    pub fn trigger_id(&self) -> u32 {
        self.trigger_id
    }

    pub fn hit_count(&self) -> usize {
        self.pixels.len()
    }

    pub fn pixel(&self, index: usize) -> Option<&Pixel> {
        self.pixels.get(index)
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    /// Number of distinct frames present in the hit list.
    pub fn frame_count(&self) -> usize {
        self.pixels
            .iter()
            .map(|p| usize::from(p.frame) + 1)
            .max()
            .unwrap_or(0)
    }

    pub(crate) fn set_pivot_pixel(&mut self, pivot_pixel: u32) {
        self.pivot_pixel = pivot_pixel;
    }

    pub(crate) fn set_trigger_id(&mut self, trigger_id: u32) {
        self.trigger_id = trigger_id;
    }

    pub(crate) fn reserve(&mut self, additional: usize) {
        self.pixels.reserve(additional);
    }

    #[inline]
    pub(crate) fn push_pixel(&mut self, pixel: Pixel) {
        self.pixels.push(pixel);
    }
}

/// All planes decoded from one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StandardEvent {
    run_number: u32,
    event_number: u32,
    planes: Vec<StandardPlane>,
    tags: Tags,
}

impl StandardEvent {
    pub fn new(run_number: u32, event_number: u32) -> Self {
        Self {
            run_number,
            event_number,
            planes: Vec::new(),
            tags: Tags::new(),
        }
    }

    pub fn run_number(&self) -> u32 {
        self.run_number
    }

    pub fn event_number(&self) -> u32 {
        self.event_number
    }

    pub fn planes(&self) -> &[StandardPlane] {
        &self.planes
    }

    pub fn plane(&self, index: usize) -> Option<&StandardPlane> {
        self.planes.get(index)
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    /// Informational tags such as `OVF<board>` overflow counts.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub(crate) fn add_plane(&mut self, plane: StandardPlane) {
        self.planes.push(plane);
    }

    pub(crate) fn set_tag(&mut self, key: impl Into<String>, value: impl Display) {
        self.tags.set(key, value);
    }

    /// Moves the planes and tags of `other` into this event.
    pub(crate) fn absorb(&mut self, other: StandardEvent) {
        self.planes.extend(other.planes);
        for (key, value) in other.tags.iter() {
            self.tags.set(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_accessors() {
        let mut plane = StandardPlane::new(6, "EUDRB", "MIMOSA26", 1152, 576);
        plane.set_pivot_pixel(1234);
        plane.push_pixel(Pixel::new(10, 20, 1, true, 0));
        plane.push_pixel(Pixel::new(11, 20, 1, false, 1));

        assert_eq!(plane.id(), 6);
        assert_eq!(plane.sensor(), "MIMOSA26");
        assert_eq!(plane.pivot_pixel(), 1234);
        assert_eq!(plane.hit_count(), 2);
        assert_eq!(plane.frame_count(), 2);
        assert_eq!(plane.pixel(1).map(|p| p.x), Some(11));
        assert!(plane.pixel(2).is_none());
    }

    #[test]
    fn test_event_absorb_keeps_order() {
        let mut event = StandardEvent::new(1, 2);
        event.add_plane(StandardPlane::new(0, "EUDRB", "MIMOTEL", 264, 256));

        let mut other = StandardEvent::new(1, 2);
        other.add_plane(StandardPlane::new(5, "EUDRB", "MIMOTEL", 264, 256));
        other.set_tag("OVF5", 3);
        event.absorb(other);

        let ids: Vec<u32> = event.planes().iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec![0, 5]);
        assert_eq!(event.tags().get("OVF5", 0u32), 3);
    }
}
