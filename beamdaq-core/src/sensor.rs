//! Static sensor geometry.
//!
//! Each detector family read out through the EUDRB has a fixed description:
//! the readout geometry (columns, rows and matrices) and the output plane size,
//! plus the function that maps readout coordinates onto the plane.

/// Maps `(col, row, matrix, ncols, nrows)` to plane `(x, y)`.
pub type RemapFn = fn(u32, u32, u32, u32, u32) -> (u32, u32);

/// Known detector families, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorType {
    Mimostar2,
    Mimotel,
    MimotelNewOrder,
    Mimosa18,
    Mimosa5,
    Mimosa26,
}

impl DetectorType {
    pub const ALL: [DetectorType; 6] = [
        DetectorType::Mimostar2,
        DetectorType::Mimotel,
        DetectorType::MimotelNewOrder,
        DetectorType::Mimosa18,
        DetectorType::Mimosa5,
        DetectorType::Mimosa26,
    ];

    /// Looks up a detector by name. The first table entry with that name wins.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|det| det.sensor().name == name)
    }

    /// Static geometry for this detector.
    #[inline]
    pub fn sensor(self) -> &'static SensorInfo {
        &SENSORS[self as usize]
    }

    /// Distinct detector names, for error messages.
    pub fn names() -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Vec::new();
        for det in Self::ALL {
            if !names.contains(&det.sensor().name) {
                names.push(det.sensor().name);
            }
        }
        names
    }
}

/// Geometry of one detector family.
#[derive(Debug)]
pub struct SensorInfo {
    pub name: &'static str,
    pub cols: u32,
    pub rows: u32,
    pub mats: u32,
    pub width: u32,
    pub height: u32,
    remap: Option<RemapFn>,
}

impl SensorInfo {
    /// Maps readout coordinates onto the output plane. Sensors without a
    /// remap function pass coordinates through.
    #[inline]
    pub fn remap(&self, col: u32, row: u32, mat: u32) -> (u32, u32) {
        match self.remap {
            Some(f) => f(col, row, mat, self.cols, self.rows),
            None => (col, row),
        }
    }
}

#[rustfmt::skip]
static SENSORS: [SensorInfo; 6] = [
    SensorInfo { name: "MIMOSTAR2", cols: 0, rows: 0, mats: 0, width: 132, height: 128, remap: None },
    SensorInfo { name: "MIMOTEL", cols: 66, rows: 256, mats: 4, width: 264, height: 256, remap: Some(map_4x1) },
    SensorInfo { name: "MIMOTEL", cols: 66, rows: 256, mats: 4, width: 264, height: 256, remap: Some(map_4x1) },
    SensorInfo { name: "MIMOSA18", cols: 256, rows: 256, mats: 4, width: 512, height: 512, remap: Some(map_2x2) },
    SensorInfo { name: "MIMOSA5", cols: 0, rows: 0, mats: 0, width: 1024, height: 1024, remap: None },
    SensorInfo { name: "MIMOSA26", cols: 1152, rows: 576, mats: 1, width: 1152, height: 576, remap: Some(map_1x1) },
];

/// Single matrix, coordinates unchanged.
pub fn map_1x1(col: u32, row: u32, _mat: u32, _ncols: u32, _nrows: u32) -> (u32, u32) {
    (col, row)
}

/// Four matrices side by side; matrices 0 and 3 swap places.
pub fn map_4x1(col: u32, row: u32, mat: u32, ncols: u32, _nrows: u32) -> (u32, u32) {
    let mat = if mat == 0 || mat == 3 { 3 - mat } else { mat };
    (col + mat * ncols, row)
}

/// Four matrices in quadrants, mirrored so the readout corners meet.
pub fn map_2x2(col: u32, row: u32, mat: u32, ncols: u32, nrows: u32) -> (u32, u32) {
    let x = if mat < 2 { col } else { 2 * ncols - 1 - col };
    let y = if mat == 0 || mat == 3 { row } else { 2 * nrows - 1 - row };
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lookup_is_fixed() {
        let m26 = DetectorType::Mimosa26.sensor();
        assert_eq!(m26.name, "MIMOSA26");
        assert_eq!((m26.cols, m26.rows, m26.mats), (1152, 576, 1));
        assert_eq!((m26.width, m26.height), (1152, 576));

        for det in DetectorType::ALL {
            // same reference on every call
            assert!(std::ptr::eq(det.sensor(), det.sensor()));
        }
        assert_eq!(DetectorType::Mimostar2.sensor().width, 132);
        assert_eq!(DetectorType::Mimosa5.sensor().height, 1024);
        assert_eq!(DetectorType::Mimosa18.sensor().cols, 256);
    }

    #[test]
    fn test_name_lookup_first_match_wins() {
        assert_eq!(DetectorType::from_name("MIMOTEL"), Some(DetectorType::Mimotel));
        assert_eq!(DetectorType::from_name("MIMOSA26"), Some(DetectorType::Mimosa26));
        assert_eq!(DetectorType::from_name("mimosa26"), None);
        assert_eq!(DetectorType::names().len(), 5);
    }

    #[test]
    fn test_map_4x1_mirrors_outer_matrices() {
        assert_eq!(map_4x1(10, 5, 3, 66, 256), (10, 5));
        assert_eq!(map_4x1(10, 5, 0, 66, 256), (10 + 3 * 66, 5));
        assert_eq!(map_4x1(10, 5, 1, 66, 256), (10 + 66, 5));
        assert_eq!(map_4x1(10, 5, 2, 66, 256), (10 + 2 * 66, 5));
    }

    #[test]
    fn test_map_2x2_quadrants() {
        assert_eq!(map_2x2(3, 4, 0, 256, 256), (3, 4));
        assert_eq!(map_2x2(3, 4, 1, 256, 256), (3, 511 - 4));
        assert_eq!(map_2x2(3, 4, 2, 256, 256), (511 - 3, 511 - 4));
        assert_eq!(map_2x2(3, 4, 3, 256, 256), (511 - 3, 4));
    }

    #[test]
    fn test_missing_remap_is_identity() {
        assert_eq!(DetectorType::Mimostar2.sensor().remap(7, 9, 2), (7, 9));
        assert_eq!(DetectorType::Mimotel.sensor().remap(10, 5, 3), (10, 5));
    }
}
