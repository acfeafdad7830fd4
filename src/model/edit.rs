//! Edit parameters carried by photos and derived copies.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::geometry::{same_rotation, CropBounds, GEOMETRY_EPSILON};

/// An operation that can be baked into a copy's pixels.
///
/// `Crop` covers the whole geometric step: rotation, crop and re-origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageOperation {
    Crop,
    ColorMap,
    RawConversion,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationSet(BTreeSet<ImageOperation>);

impl OperationSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        [
            ImageOperation::Crop,
            ImageOperation::ColorMap,
            ImageOperation::RawConversion,
        ]
        .into_iter()
        .collect()
    }

    pub fn contains(&self, op: ImageOperation) -> bool {
        self.0.contains(&op)
    }

    pub fn insert(&mut self, op: ImageOperation) {
        self.0.insert(op);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Operations in `self` that are not in `other`.
    pub fn difference(&self, other: &OperationSet) -> OperationSet {
        OperationSet(self.0.difference(&other.0).copied().collect())
    }

    pub fn union(&self, other: &OperationSet) -> OperationSet {
        OperationSet(self.0.union(&other.0).copied().collect())
    }

    pub fn is_superset(&self, other: &OperationSet) -> bool {
        self.0.is_superset(&other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = ImageOperation> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<ImageOperation> for OperationSet {
    fn from_iter<I: IntoIterator<Item = ImageOperation>>(iter: I) -> Self {
        OperationSet(iter.into_iter().collect())
    }
}

/// Settings for turning sensor data into display pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSettings {
    /// Exposure correction in stops.
    pub exposure_ev: f64,
    /// Black point as a fraction of full scale.
    pub black_level: f64,
    /// White balance multipliers for red, green and blue.
    pub white_balance: [f64; 3],
}

impl Default for RawSettings {
    fn default() -> Self {
        Self {
            exposure_ev: 0.0,
            black_level: 0.0,
            white_balance: [1.0, 1.0, 1.0],
        }
    }
}

impl RawSettings {
    /// Per-channel lookup tables for 8-bit samples.
    pub fn lookup_tables(&self) -> [[u8; 256]; 3] {
        let gain = 2f64.powf(self.exposure_ev);
        let black = self.black_level.clamp(0.0, 0.99);
        let mut tables = [[0u8; 256]; 3];
        for (channel, table) in tables.iter_mut().enumerate() {
            let wb = self.white_balance[channel];
            for (i, slot) in table.iter_mut().enumerate() {
                let v = i as f64 / 255.0;
                let v = ((v - black) / (1.0 - black)).max(0.0) * gain * wb;
                *slot = (v.clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        }
        tables
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Applied to all colour channels before the per-channel curves.
    Value,
    Red,
    Green,
    Blue,
}

/// A tone curve given by control points in `[0, 1] x [0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    pub points: Vec<(f64, f64)>,
}

impl Curve {
    pub fn new(mut points: Vec<(f64, f64)>) -> Self {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { points }
    }

    /// Piecewise-linear evaluation, flat outside the first/last point.
    pub fn eval(&self, x: f64) -> f64 {
        match self.points.as_slice() {
            [] => x,
            [only] => only.1,
            points => {
                let first = points[0];
                let last = points[points.len() - 1];
                if x <= first.0 {
                    return first.1;
                }
                if x >= last.0 {
                    return last.1;
                }
                for pair in points.windows(2) {
                    let (x0, y0) = pair[0];
                    let (x1, y1) = pair[1];
                    if x <= x1 {
                        if (x1 - x0).abs() < GEOMETRY_EPSILON {
                            return y1;
                        }
                        return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
                    }
                }
                last.1
            }
        }
    }

    pub fn lookup_table(&self) -> [u8; 256] {
        let mut table = [0u8; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            let y = self.eval(i as f64 / 255.0);
            *slot = (y.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
        table
    }
}

/// Per-channel colour curve mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorCurves {
    pub channels: BTreeMap<Channel, Curve>,
}

impl ColorCurves {
    pub fn with_curve(mut self, channel: Channel, curve: Curve) -> Self {
        self.channels.insert(channel, curve);
        self
    }

    /// Combined lookup tables for red, green and blue.
    pub fn lookup_tables(&self) -> [[u8; 256]; 3] {
        let identity: [u8; 256] = std::array::from_fn(|i| i as u8);
        let value = self
            .channels
            .get(&Channel::Value)
            .map(Curve::lookup_table)
            .unwrap_or(identity);

        let mut tables = [identity; 3];
        for (table, channel) in tables
            .iter_mut()
            .zip([Channel::Red, Channel::Green, Channel::Blue])
        {
            let per_channel = self
                .channels
                .get(&channel)
                .map(Curve::lookup_table)
                .unwrap_or(identity);
            for (i, slot) in table.iter_mut().enumerate() {
                *slot = per_channel[value[i] as usize];
            }
        }
        tables
    }
}

/// The full set of edit parameters a copy can be rendered with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditParams {
    pub crop: CropBounds,
    pub rotation: f64,
    pub raw_settings: Option<RawSettings>,
    pub color_curves: Option<ColorCurves>,
}

impl EditParams {
    /// Operations these parameters actually ask for.
    pub fn requested_operations(&self) -> OperationSet {
        let mut ops = OperationSet::empty();
        if !self.crop.is_full() || !same_rotation(self.rotation, 0.0) {
            ops.insert(ImageOperation::Crop);
        }
        if self.color_curves.is_some() {
            ops.insert(ImageOperation::ColorMap);
        }
        if self.raw_settings.is_some() {
            ops.insert(ImageOperation::RawConversion);
        }
        ops
    }

    /// Whether `other` renders identically for the operations in `ops`.
    pub fn matches_for(&self, other: &EditParams, ops: &OperationSet) -> bool {
        ops.iter().all(|op| match op {
            ImageOperation::Crop => {
                self.crop.approx_eq(&other.crop) && same_rotation(self.rotation, other.rotation)
            }
            ImageOperation::ColorMap => self.color_curves == other.color_curves,
            ImageOperation::RawConversion => self.raw_settings == other.raw_settings,
        })
    }

    /// These parameters with the fields behind `ops` taken from `baked`.
    pub fn with_baked(&self, baked: &EditParams, ops: &OperationSet) -> EditParams {
        let mut params = self.clone();
        for op in ops.iter() {
            match op {
                ImageOperation::Crop => {
                    params.crop = baked.crop;
                    params.rotation = baked.rotation;
                }
                ImageOperation::ColorMap => params.color_curves = baked.color_curves.clone(),
                ImageOperation::RawConversion => params.raw_settings = baked.raw_settings,
            }
        }
        params
    }
}
