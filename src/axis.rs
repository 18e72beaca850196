use serde::{Deserialize, Serialize};

use crate::{tag_from_str, FontGogglesError, Tag};

/// A variation axis as the UI sees it, in user coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisInfo {
    pub name: String,
    pub min: f64,
    pub default: f64,
    pub max: f64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
}

impl AxisInfo {
    pub fn new(name: impl Into<String>, min: f64, default: f64, max: f64) -> Self {
        AxisInfo {
            name: name.into(),
            min: min.min(default),
            default,
            max: max.max(default),
            hidden: false,
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Map `value` through a piecewise-linear mapping given as sorted
/// `(input, output)` pairs, extrapolating flat beyond the ends.
pub fn piecewise_linear(map: &[(f64, f64)], value: f64) -> f64 {
    let (Some(first), Some(last)) = (map.first(), map.last()) else {
        return value;
    };
    if value <= first.0 {
        return first.1 + (value - first.0);
    }
    if value >= last.0 {
        return last.1 + (value - last.0);
    }
    for pair in map.windows(2) {
        let ((a_in, a_out), (b_in, b_out)) = (pair[0], pair[1]);
        if value >= a_in && value <= b_in {
            if b_in == a_in {
                return a_out;
            }
            return a_out + (b_out - a_out) * (value - a_in) / (b_in - a_in);
        }
    }
    value
}

/// Normalize `value` into `-1.0..=1.0` given `(min, default, max)`.
pub fn normalize_value(value: f64, (min, default, max): (f64, f64, f64)) -> f64 {
    let value = value.clamp(min.min(default), max.max(default));
    if value < default {
        if default == min {
            0.0
        } else {
            (value - default) / (default - min)
        }
    } else if value > default {
        if max == default {
            0.0
        } else {
            (value - default) / (max - default)
        }
    } else {
        0.0
    }
}

/// An axis of a designspace, with its user→design mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignAxis {
    pub name: String,
    pub tag: Tag,
    pub min: f64,
    pub default: f64,
    pub max: f64,
    /// `(user, design)` pairs sorted by user value; empty for an identity map.
    pub map: Vec<(f64, f64)>,
    pub hidden: bool,
}

impl DesignAxis {
    pub fn userspace_to_designspace(&self, value: f64) -> f64 {
        piecewise_linear(&self.map, value)
    }

    pub fn designspace_to_userspace(&self, value: f64) -> f64 {
        let mut inverse: Vec<(f64, f64)> = self.map.iter().map(|&(u, d)| (d, u)).collect();
        inverse.sort_by(|a, b| a.0.total_cmp(&b.0));
        piecewise_linear(&inverse, value)
    }

    /// The `(min, default, max)` triple in design coordinates.
    pub fn design_bounds(&self) -> (f64, f64, f64) {
        (
            self.userspace_to_designspace(self.min),
            self.userspace_to_designspace(self.default),
            self.userspace_to_designspace(self.max),
        )
    }

    pub fn normalize_userspace_value(&self, value: f64) -> f64 {
        self.normalize_designspace_value(self.userspace_to_designspace(value))
    }

    pub fn normalize_designspace_value(&self, value: f64) -> f64 {
        normalize_value(value, self.design_bounds())
    }

    /// The `avar` segment map for this axis, or `None` if the mapping is
    /// linear in normalized space.
    pub fn avar_segments(&self) -> Option<Vec<(f64, f64)>> {
        if self.map.is_empty() {
            return None;
        }
        let mut segments: Vec<(f64, f64)> = self
            .map
            .iter()
            .map(|&(user, design)| {
                (
                    normalize_value(user, (self.min, self.default, self.max)),
                    self.normalize_designspace_value(design),
                )
            })
            .collect();
        for required in [-1.0, 0.0, 1.0] {
            if !segments.iter().any(|(from, _)| *from == required) {
                segments.push((required, required));
            }
        }
        segments.sort_by(|a, b| a.0.total_cmp(&b.0));
        segments.dedup_by(|a, b| a.0 == b.0);
        if segments.iter().all(|(from, to)| (from - to).abs() < 1e-9) {
            return None;
        }
        Some(segments)
    }

    pub fn info(&self) -> AxisInfo {
        AxisInfo {
            name: self.name.clone(),
            min: self.min,
            default: self.default,
            max: self.max,
            hidden: self.hidden,
        }
    }
}

impl TryFrom<&norad::designspace::Axis> for DesignAxis {
    type Error = FontGogglesError;

    fn try_from(dsax: &norad::designspace::Axis) -> Result<Self, Self::Error> {
        let tag = tag_from_str(&dsax.tag).ok_or_else(|| FontGogglesError::IllDefinedAxis {
            axis_name: dsax.name.clone(),
            reason: format!("bad tag {:?}", dsax.tag),
        })?;
        let default = dsax.default as f64;
        let values: Vec<f64> = dsax
            .values
            .iter()
            .flatten()
            .map(|v| *v as f64)
            .collect();
        let min = dsax
            .minimum
            .map(|v| v as f64)
            .or_else(|| values.iter().copied().reduce(f64::min))
            .unwrap_or(default);
        let max = dsax
            .maximum
            .map(|v| v as f64)
            .or_else(|| values.iter().copied().reduce(f64::max))
            .unwrap_or(default);
        if !(min <= default && default <= max) {
            return Err(FontGogglesError::IllDefinedAxis {
                axis_name: dsax.name.clone(),
                reason: format!("default {default} outside {min}..{max}"),
            });
        }
        let mut map: Vec<(f64, f64)> = dsax
            .map
            .iter()
            .flatten()
            .map(|m| (m.input as f64, m.output as f64))
            .collect();
        map.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(DesignAxis {
            name: dsax.name.clone(),
            tag,
            min,
            default,
            max,
            map,
            hidden: dsax.hidden,
        })
    }
}
