//! Multi-master interpolation in normalized design space.
//!
//! Masters are ordered, given box-shaped supports and delta weights the same
//! way OpenType variation tooling does it, so results agree with what a
//! variable font built from the same masters would produce.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Tag, VariationLocation};

#[derive(Debug, Error, PartialEq)]
pub enum VariationModelError {
    #[error("Base master not found")]
    NoBaseMaster,
    #[error("Duplicate master location {0:?}")]
    DuplicateLocation(String),
    #[error("Expected {expected} master values, got {got}")]
    MasterCount { expected: usize, got: usize },
    #[error("Master values have differing lengths")]
    IncompatibleMasters,
}

/// A `(lower, peak, upper)` region per axis.
pub type Support = BTreeMap<Tag, (f64, f64, f64)>;

/// How much a master whose support is `support` contributes at `location`.
pub fn support_scalar(location: &VariationLocation, support: &Support) -> f64 {
    let mut scalar = 1.0;
    for (axis, &(lower, peak, upper)) in support {
        if peak == 0.0 || lower > peak || peak > upper || (lower < 0.0 && upper > 0.0) {
            continue;
        }
        let v = location.get(axis).copied().unwrap_or(0.0);
        if v == peak {
            continue;
        }
        if v <= lower || upper <= v {
            return 0.0;
        }
        if v < peak {
            scalar *= (v - lower) / (peak - lower);
        } else {
            scalar *= (v - upper) / (peak - upper);
        }
    }
    scalar
}

fn strip_zeros(location: &VariationLocation) -> VariationLocation {
    location
        .iter()
        .filter(|(_, v)| **v != 0.0)
        .map(|(k, v)| (*k, *v))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariationModel {
    /// Master locations in the caller's order, zeros stripped.
    locations: Vec<VariationLocation>,
    axis_order: Vec<Tag>,
    /// `reverse_mapping[sorted_index] == original_index`
    reverse_mapping: Vec<usize>,
    supports: Vec<Support>,
    delta_weights: Vec<BTreeMap<usize, f64>>,
}

impl VariationModel {
    /// Build a model from normalized master locations. One location must be
    /// the default (all zeros).
    pub fn new(
        locations: &[VariationLocation],
        axis_order: Vec<Tag>,
    ) -> Result<Self, VariationModelError> {
        let locations: Vec<VariationLocation> = locations.iter().map(strip_zeros).collect();
        if !locations.iter().any(|l| l.is_empty()) {
            return Err(VariationModelError::NoBaseMaster);
        }
        let unique: BTreeSet<Vec<(Tag, u64)>> = locations
            .iter()
            .map(|l| l.iter().map(|(k, v)| (*k, v.to_bits())).collect())
            .collect();
        if unique.len() != locations.len() {
            return Err(VariationModelError::DuplicateLocation(format!("{:?}", locations)));
        }

        let axis_points = on_point_values(&locations);
        let mut order: Vec<usize> = (0..locations.len()).collect();
        order.sort_by(|&a, &b| {
            compare_locations(&locations[a], &locations[b], &axis_points, &axis_order)
        });
        let sorted: Vec<&VariationLocation> = order.iter().map(|&i| &locations[i]).collect();
        let supports = compute_supports(&sorted);
        let delta_weights = sorted
            .iter()
            .enumerate()
            .map(|(i, loc)| {
                supports[..i]
                    .iter()
                    .enumerate()
                    .filter_map(|(j, support)| {
                        let scalar = support_scalar(loc, support);
                        (scalar != 0.0).then_some((j, scalar))
                    })
                    .collect()
            })
            .collect();
        Ok(VariationModel {
            locations,
            axis_order,
            reverse_mapping: order,
            supports,
            delta_weights,
        })
    }

    pub fn locations(&self) -> &[VariationLocation] {
        &self.locations
    }

    pub fn axis_order(&self) -> &[Tag] {
        &self.axis_order
    }

    pub fn supports(&self) -> &[Support] {
        &self.supports
    }

    /// Index (in the caller's order) of the default master.
    pub fn default_index(&self) -> usize {
        self.reverse_mapping.first().copied().unwrap_or(0)
    }

    /// Deltas in sorted master order, one row per master.
    pub fn deltas(&self, master_values: &[&[f64]]) -> Result<Vec<Vec<f64>>, VariationModelError> {
        if master_values.len() != self.locations.len() {
            return Err(VariationModelError::MasterCount {
                expected: self.locations.len(),
                got: master_values.len(),
            });
        }
        let width = master_values.first().map(|v| v.len()).unwrap_or(0);
        if master_values.iter().any(|v| v.len() != width) {
            return Err(VariationModelError::IncompatibleMasters);
        }
        let mut out: Vec<Vec<f64>> = Vec::with_capacity(master_values.len());
        for (i, weights) in self.delta_weights.iter().enumerate() {
            let mut delta = master_values[self.reverse_mapping[i]].to_vec();
            for (&j, &weight) in weights {
                for (d, prev) in delta.iter_mut().zip(&out[j]) {
                    *d -= prev * weight;
                }
            }
            out.push(delta);
        }
        Ok(out)
    }

    pub fn scalars(&self, location: &VariationLocation) -> Vec<f64> {
        self.supports
            .iter()
            .map(|support| support_scalar(location, support))
            .collect()
    }

    /// Interpolate rows of values (e.g. flattened point lists) at a
    /// normalized location.
    pub fn interpolate(
        &self,
        location: &VariationLocation,
        master_values: &[&[f64]],
    ) -> Result<Vec<f64>, VariationModelError> {
        let deltas = self.deltas(master_values)?;
        let width = master_values.first().map(|v| v.len()).unwrap_or(0);
        let mut result = vec![0.0; width];
        for (delta, scalar) in deltas.iter().zip(self.scalars(location)) {
            if scalar == 0.0 {
                continue;
            }
            for (r, d) in result.iter_mut().zip(delta) {
                *r += d * scalar;
            }
        }
        Ok(result)
    }

    pub fn interpolate_scalar(
        &self,
        location: &VariationLocation,
        master_values: &[f64],
    ) -> Result<f64, VariationModelError> {
        let rows: Vec<[f64; 1]> = master_values.iter().map(|v| [*v]).collect();
        let rows: Vec<&[f64]> = rows.iter().map(|r| &r[..]).collect();
        Ok(self
            .interpolate(location, &rows)?
            .first()
            .copied()
            .unwrap_or(0.0))
    }

    pub fn to_serialized(&self) -> SerializedModel {
        SerializedModel {
            axis_order: self.axis_order.iter().map(|t| t.to_string()).collect(),
            locations: self
                .locations
                .iter()
                .map(|l| l.iter().map(|(k, v)| (k.to_string(), *v)).collect())
                .collect(),
        }
    }
}

/// The master model as stored in compiled variable fonts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedModel {
    pub axis_order: Vec<String>,
    pub locations: Vec<BTreeMap<String, f64>>,
}

impl SerializedModel {
    pub fn to_model(&self) -> Result<VariationModel, VariationModelError> {
        let tag = |s: &String| crate::tag_from_str(s);
        let locations: Vec<VariationLocation> = self
            .locations
            .iter()
            .map(|l| l.iter().filter_map(|(k, v)| Some((tag(k)?, *v))).collect())
            .collect();
        VariationModel::new(&locations, self.axis_order.iter().filter_map(tag).collect())
    }
}

fn on_point_values(locations: &[VariationLocation]) -> BTreeMap<Tag, Vec<f64>> {
    let mut points: BTreeMap<Tag, Vec<f64>> = BTreeMap::new();
    for loc in locations {
        if loc.len() != 1 {
            continue;
        }
        for (axis, value) in loc {
            points.entry(*axis).or_insert_with(|| vec![0.0]).push(*value);
        }
    }
    points
}

fn sign(v: f64) -> i8 {
    if v < 0.0 {
        -1
    } else if v > 0.0 {
        1
    } else {
        0
    }
}

fn compare_locations(
    a: &VariationLocation,
    b: &VariationLocation,
    axis_points: &BTreeMap<Tag, Vec<f64>>,
    axis_order: &[Tag],
) -> Ordering {
    let on_points = |loc: &VariationLocation| {
        loc.iter()
            .filter(|(axis, value)| axis_points.get(*axis).is_some_and(|p| p.contains(*value)))
            .count()
    };
    let ordered_axes = |loc: &VariationLocation| {
        let mut axes: Vec<Tag> = axis_order.iter().filter(|a| loc.contains_key(*a)).copied().collect();
        axes.extend(loc.keys().filter(|a| !axis_order.contains(*a)));
        axes
    };
    let axis_rank = |axis: &Tag| {
        axis_order
            .iter()
            .position(|a| a == axis)
            .unwrap_or(0x10000)
    };
    let (axes_a, axes_b) = (ordered_axes(a), ordered_axes(b));
    a.len()
        .cmp(&b.len())
        .then_with(|| on_points(b).cmp(&on_points(a)))
        .then_with(|| {
            axes_a
                .iter()
                .map(axis_rank)
                .cmp(axes_b.iter().map(axis_rank))
        })
        .then_with(|| axes_a.cmp(&axes_b))
        .then_with(|| {
            axes_a
                .iter()
                .map(|t| sign(a[t]))
                .cmp(axes_b.iter().map(|t| sign(b[t])))
        })
        .then_with(|| {
            let abs_a: Vec<f64> = axes_a.iter().map(|t| a[t].abs()).collect();
            let abs_b: Vec<f64> = axes_b.iter().map(|t| b[t].abs()).collect();
            abs_a
                .iter()
                .zip(&abs_b)
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| abs_a.len().cmp(&abs_b.len()))
        })
}

fn compute_supports(locations: &[&VariationLocation]) -> Vec<Support> {
    let mut min_v: BTreeMap<Tag, f64> = BTreeMap::new();
    let mut max_v: BTreeMap<Tag, f64> = BTreeMap::new();
    for loc in locations {
        for (axis, &v) in loc.iter() {
            let lo = min_v.entry(*axis).or_insert(v);
            *lo = lo.min(v);
            let hi = max_v.entry(*axis).or_insert(v);
            *hi = hi.max(v);
        }
    }
    let regions: Vec<Support> = locations
        .iter()
        .map(|loc| {
            loc.iter()
                .map(|(axis, &v)| {
                    let region = if v > 0.0 {
                        (0.0, v, max_v[axis])
                    } else {
                        (min_v[axis], v, 0.0)
                    };
                    (*axis, region)
                })
                .collect()
        })
        .collect();

    let mut supports: Vec<Support> = Vec::with_capacity(regions.len());
    for (i, region) in regions.iter().enumerate() {
        let mut region = region.clone();
        let axes: BTreeSet<Tag> = region.keys().copied().collect();
        for prev in &regions[..i] {
            if prev.keys().copied().collect::<BTreeSet<Tag>>() != axes {
                continue;
            }
            let relevant = region.iter().all(|(axis, &(lower, peak, upper))| {
                let prev_peak = prev[axis].1;
                prev_peak == peak || (lower < prev_peak && prev_peak < upper)
            });
            if !relevant {
                continue;
            }
            let mut best_axes: BTreeMap<Tag, (f64, f64, f64)> = BTreeMap::new();
            let mut best_ratio = -1.0;
            for (axis, prev_triple) in prev {
                let val = prev_triple.1;
                let (lower, loc_v, upper) = region[axis];
                let (mut new_lower, mut new_upper) = (lower, upper);
                let ratio = if val < loc_v {
                    new_lower = val;
                    (val - loc_v) / (lower - loc_v)
                } else if loc_v < val {
                    new_upper = val;
                    (val - loc_v) / (upper - loc_v)
                } else {
                    continue;
                };
                if ratio > best_ratio {
                    best_axes.clear();
                    best_ratio = ratio;
                }
                if ratio == best_ratio {
                    best_axes.insert(*axis, (new_lower, loc_v, new_upper));
                }
            }
            region.extend(best_axes);
        }
        supports.push(region);
    }
    supports
}
