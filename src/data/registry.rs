//! Ordered, position-stable mapping from sensor identity to CSV column.
//!
//! The header of a CSV file is written once, when the file is created, so every
//! row appended afterwards has to use the very same column order. The registry
//! guarantees that: columns are kept in an indexed `Vec` plus a lookup index,
//! never reordered, and the only mutation after seeding is the one-time
//! replacement of a box placeholder by the box's channels, in place.

use crate::config::{column_label, SensorKind, SensorSpec};
use crate::core::SensorIdentity;
use crate::error::{AppResult, LoggerError};
use std::collections::HashMap;

/// One output column: identity plus header label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    /// Identity whose values fill this column.
    pub identity: SensorIdentity,
    /// Header text.
    pub label: String,
}

impl Column {
    /// Create a column.
    pub fn new(identity: impl Into<SensorIdentity>, label: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            label: label.into(),
        }
    }
}

#[derive(Clone, Debug)]
enum BoxSlot {
    Unresolved { measurement: String },
    Resolved(Vec<SensorIdentity>),
}

/// Append-stable column registry.
#[derive(Clone, Debug, Default)]
pub struct ColumnRegistry {
    columns: Vec<Column>,
    index: HashMap<SensorIdentity, usize>,
    boxes: HashMap<SensorIdentity, BoxSlot>,
    generation: u64,
}

impl ColumnRegistry {
    /// Build the initial column list from static configuration.
    ///
    /// A box reserves a single placeholder slot under its own identity.
    pub fn seed<'a, I>(specs: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = &'a SensorSpec>,
    {
        let mut registry = Self::default();
        for spec in specs {
            if registry.index.contains_key(&spec.identity) {
                return Err(LoggerError::Configuration(format!(
                    "Duplicate sensor identity: {}",
                    spec.identity
                )));
            }
            registry
                .index
                .insert(spec.identity.clone(), registry.columns.len());
            registry
                .columns
                .push(Column::new(spec.identity.clone(), spec.label()));
            if spec.kind == SensorKind::Box {
                registry.boxes.insert(
                    spec.identity.clone(),
                    BoxSlot::Unresolved {
                        measurement: spec.measurement.clone(),
                    },
                );
            }
        }
        Ok(registry)
    }

    /// Replace a box placeholder with one column per channel, at the same position.
    ///
    /// Columns before the placeholder keep their index; columns after it keep
    /// their relative order. Callable exactly once per placeholder.
    pub fn resolve_box(
        &mut self,
        placeholder: &SensorIdentity,
        sub_identities: &[SensorIdentity],
    ) -> AppResult<()> {
        let measurement = match self.boxes.get(placeholder) {
            Some(BoxSlot::Unresolved { measurement }) => measurement.clone(),
            Some(BoxSlot::Resolved(_)) => {
                return Err(LoggerError::Configuration(format!(
                    "box {placeholder} has already been resolved"
                )))
            }
            None => {
                return Err(LoggerError::Configuration(format!(
                    "{placeholder} is not an unresolved box placeholder"
                )))
            }
        };

        if sub_identities.is_empty() {
            return Err(LoggerError::Configuration(format!(
                "box {placeholder} resolved without any channel"
            )));
        }
        for (i, sub) in sub_identities.iter().enumerate() {
            if sub_identities[..i].contains(sub) {
                return Err(LoggerError::Configuration(format!(
                    "box {placeholder} reported channel {sub} twice"
                )));
            }
            if sub != placeholder && self.index.contains_key(sub) {
                return Err(LoggerError::Configuration(format!(
                    "box {placeholder} channel {sub} collides with an existing column"
                )));
            }
        }

        let position = self.index.remove(placeholder).ok_or_else(|| {
            LoggerError::Configuration(format!("placeholder {placeholder} has no column"))
        })?;
        let replacement = sub_identities
            .iter()
            .map(|sub| Column::new(sub.clone(), column_label(&measurement, sub)));
        self.columns.splice(position..=position, replacement);

        self.rebuild_index();
        self.boxes.insert(
            placeholder.clone(),
            BoxSlot::Resolved(sub_identities.to_vec()),
        );
        self.generation += 1;
        Ok(())
    }

    /// Ordered `(identity, label)` sequence used for headers and row lookup.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Current position of `identity`, if it is a column.
    pub fn position(&self, identity: &SensorIdentity) -> Option<usize> {
        self.index.get(identity).copied()
    }

    /// Whether `identity` is a box that still occupies a placeholder slot.
    pub fn is_unresolved_box(&self, identity: &SensorIdentity) -> bool {
        matches!(self.boxes.get(identity), Some(BoxSlot::Unresolved { .. }))
    }

    /// Channels of a resolved box, in discovery order.
    pub fn sub_identities(&self, box_identity: &SensorIdentity) -> Option<&[SensorIdentity]> {
        match self.boxes.get(box_identity) {
            Some(BoxSlot::Resolved(subs)) => Some(subs),
            _ => None,
        }
    }

    /// Number of columns (excluding the timestamp).
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether no column is registered.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Incremented on every successful box resolution.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, column)| (column.identity.clone(), i))
            .collect();
    }
}
