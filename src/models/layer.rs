//! In-memory feature collections.
//!
//! A [`FeatureLayer`] is an ordered attribute table with one geometry per row.
//! Column order is significant: it is preserved through concatenation and is
//! what the schema refactorer uses to decide language slots.

use std::cmp::Ordering;

use chrono::NaiveDate;
use geo::{BoundingRect, Geometry, Rect};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// EPSG code of the canonical geographic reference.
pub const WGS84: u32 = 4326;

/// A single typed attribute value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    #[default]
    Null,
    Text(String),
    Int(i64),
    Real(f64),
    Date(NaiveDate),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; reals without a fractional part and numeric text count.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Real(r) if r.fract() == 0.0 => Some(*r as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// String form used for grouping and code comparisons. `None` for nulls.
    pub fn key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Real(r) => Some(r.to_string()),
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        }
    }

    /// Total order used when sorting a layer: nulls first, then by value.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Real(a), Value::Real(b)) => a.total_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (a, b) => a.key().cmp(&b.key()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

/// One administrative unit or boundary line
#[derive(Debug, Clone)]
pub struct Feature {
    /// One value per layer column, in column order
    pub properties: Vec<Value>,
    pub geometry: Geometry<f64>,
}

impl Feature {
    pub fn new(properties: Vec<Value>, geometry: Geometry<f64>) -> Self {
        Self {
            properties,
            geometry,
        }
    }
}

/// An ordered attribute table with geometries
#[derive(Debug, Clone)]
pub struct FeatureLayer {
    columns: Vec<String>,
    features: Vec<Feature>,
    /// EPSG code of the coordinates
    crs: u32,
}

impl FeatureLayer {
    pub fn new(columns: Vec<String>, crs: u32) -> Self {
        Self {
            columns,
            features: Vec::new(),
            crs,
        }
    }

    pub fn with_features(columns: Vec<String>, crs: u32, features: Vec<Feature>) -> Self {
        let mut layer = Self::new(columns, crs);
        for feature in features {
            layer.push(feature);
        }
        layer
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn features_mut(&mut self) -> &mut [Feature] {
        &mut self.features
    }

    /// Remove every row, keeping the schema.
    pub fn take_features(&mut self) -> Vec<Feature> {
        std::mem::take(&mut self.features)
    }

    pub fn into_features(self) -> Vec<Feature> {
        self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn crs(&self) -> u32 {
        self.crs
    }

    pub fn set_crs(&mut self, crs: u32) {
        self.crs = crs;
    }

    /// Append a feature, padding or truncating its properties to the schema.
    pub fn push(&mut self, mut feature: Feature) {
        feature.properties.resize(self.columns.len(), Value::Null);
        self.features.push(feature);
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Index of a column that must exist.
    pub fn require(&self, name: &str, context: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| PipelineError::missing_column(name, context))
    }

    /// Value of a named column for one row; `None` if the column is absent.
    pub fn value<'a>(&self, feature: &'a Feature, name: &str) -> Option<&'a Value> {
        self.column_index(name).map(|i| &feature.properties[i])
    }

    /// Set every row of a column to `fill`, creating the column if needed.
    pub fn fill_column(&mut self, name: &str, fill: Value) -> usize {
        let idx = match self.column_index(name) {
            Some(idx) => idx,
            None => {
                self.columns.push(name.to_string());
                for feature in &mut self.features {
                    feature.properties.push(Value::Null);
                }
                self.columns.len() - 1
            }
        };
        for feature in &mut self.features {
            feature.properties[idx] = fill.clone();
        }
        idx
    }

    /// Apply `f` to every value of a column.
    pub fn map_column<F>(&mut self, idx: usize, mut f: F)
    where
        F: FnMut(&mut Value),
    {
        for feature in &mut self.features {
            f(&mut feature.properties[idx]);
        }
    }

    pub fn drop_column(&mut self, name: &str) -> bool {
        let Some(idx) = self.column_index(name) else {
            return false;
        };
        self.columns.remove(idx);
        for feature in &mut self.features {
            feature.properties.remove(idx);
        }
        true
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }
        if self.has_column(to) {
            return Err(PipelineError::ColumnExists(to.to_string()));
        }
        let idx = self.require(from, "rename")?;
        self.columns[idx] = to.to_string();
        Ok(())
    }

    /// Copy `source` into a new or existing column `target`.
    pub fn duplicate_column(&mut self, source: &str, target: &str) -> Result<()> {
        let src = self.require(source, "duplicate")?;
        let dst = match self.column_index(target) {
            Some(idx) => idx,
            None => self.fill_column(target, Value::Null),
        };
        for feature in &mut self.features {
            feature.properties[dst] = feature.properties[src].clone();
        }
        Ok(())
    }

    pub fn lowercase_columns(&mut self) {
        for column in &mut self.columns {
            *column = column.to_lowercase();
        }
    }

    /// New layer restricted to `columns`, in that order.
    pub fn select(&self, columns: &[String]) -> Result<FeatureLayer> {
        let indices = columns
            .iter()
            .map(|c| self.require(c, "select"))
            .collect::<Result<Vec<_>>>()?;
        let features = self
            .features
            .iter()
            .map(|f| Feature {
                properties: indices.iter().map(|&i| f.properties[i].clone()).collect(),
                geometry: f.geometry.clone(),
            })
            .collect();
        Ok(FeatureLayer {
            columns: columns.to_vec(),
            features,
            crs: self.crs,
        })
    }

    /// Append another layer's rows, keeping this layer's column order.
    ///
    /// Columns missing from `other` become null; columns only `other` has are
    /// discarded.
    pub fn concat(&mut self, other: FeatureLayer) {
        let mapping: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| other.column_index(c))
            .collect();
        for feature in other.features {
            let properties = mapping
                .iter()
                .map(|m| m.map_or(Value::Null, |i| feature.properties[i].clone()))
                .collect();
            self.features.push(Feature {
                properties,
                geometry: feature.geometry,
            });
        }
    }

    /// Stable sort by one column.
    pub fn sort_by_column(&mut self, idx: usize) {
        self.features
            .sort_by(|a, b| a.properties[idx].compare(&b.properties[idx]));
    }

    pub fn retain<F>(&mut self, f: F)
    where
        F: FnMut(&Feature) -> bool,
    {
        self.features.retain(f);
    }

    /// Rows for which `keep` holds, as a new layer with the same schema.
    pub fn filtered<F>(&self, mut keep: F) -> FeatureLayer
    where
        F: FnMut(&Feature) -> bool,
    {
        FeatureLayer {
            columns: self.columns.clone(),
            features: self.features.iter().filter(|f| keep(f)).cloned().collect(),
            crs: self.crs,
        }
    }

    /// Bounding box over all geometries.
    pub fn bbox(&self) -> Option<Rect<f64>> {
        self.features
            .iter()
            .filter_map(|f| f.geometry.bounding_rect())
            .reduce(|a, b| {
                Rect::new(
                    geo::coord! { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
                    geo::coord! { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
                )
            })
    }
}
