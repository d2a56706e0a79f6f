//! Safe update planning for array-valued fields on canonical records.
//!
//! Account records accumulate evidence arrays (raw institution spellings,
//! source document ids) that multiple pipeline attempts may touch. Instead of
//! mutating arrays ad hoc, callers build an [`UpdatePlan`] describing the
//! intended operations, validate it, and hand it to the repository. A plan
//! that mixes conflicting operators on the same path is refused outright,
//! never silently reconciled.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// How an array-valued field should change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateMode {
    /// Overwrite the array wholesale.
    Replace { values: Vec<String> },
    /// Add entries that are not already present; existing entries are never
    /// dropped or reordered.
    AppendUnique { values: Vec<String> },
    /// Rewrite a single element matched by value.
    ElementUpdate {
        matching: String,
        replacement: String,
    },
}

/// Concrete operator carried by a planned op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayOperator {
    Set,
    AddUnique,
    SetElement { index: usize },
}

impl ArrayOperator {
    /// Operator family, ignoring positional detail. Two `SetElement` ops at
    /// different indices are the same family and may share a path.
    pub fn family(&self) -> &'static str {
        match self {
            ArrayOperator::Set => "set",
            ArrayOperator::AddUnique => "add_unique",
            ArrayOperator::SetElement { .. } => "set_element",
        }
    }
}

/// One planned operation against one array path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayOp {
    pub path: String,
    pub operator: ArrayOperator,
    pub values: Vec<String>,
}

impl ArrayOp {
    /// Apply this op to a current array value, producing the new array.
    pub fn apply(&self, current: &[String]) -> Result<Vec<String>> {
        match self.operator {
            ArrayOperator::Set => Ok(self.values.clone()),
            ArrayOperator::AddUnique => {
                let mut next = current.to_vec();
                for v in &self.values {
                    if !next.contains(v) {
                        next.push(v.clone());
                    }
                }
                Ok(next)
            }
            ArrayOperator::SetElement { index } => {
                let replacement = self.values.first().ok_or_else(|| {
                    Error::InvalidInput(format!("set_element on {} has no value", self.path))
                })?;
                if index >= current.len() {
                    return Err(Error::InvalidInput(format!(
                        "set_element index {} out of bounds for {} (len {})",
                        index,
                        self.path,
                        current.len()
                    )));
                }
                let mut next = current.to_vec();
                next[index] = replacement.clone();
                Ok(next)
            }
        }
    }
}

/// A validated-before-commit set of array operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdatePlan {
    pub ops: Vec<ArrayOp>,
}

impl UpdatePlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Fold another plan's ops into this one. The combined plan still has to
    /// pass [`UpdatePlan::validate`] before persistence.
    pub fn merge(mut self, other: UpdatePlan) -> UpdatePlan {
        self.ops.extend(other.ops);
        self
    }

    /// Reject plans that mix operator families on a single path.
    ///
    /// A `set` and an `add_unique` aimed at the same array have no defined
    /// combined meaning; surfacing the conflict at plan time is the whole
    /// point of planning updates.
    pub fn validate(&self) -> Result<()> {
        let mut families: HashMap<&str, &'static str> = HashMap::new();
        for op in &self.ops {
            let family = op.operator.family();
            match families.get(op.path.as_str()) {
                Some(existing) if *existing != family => {
                    return Err(Error::ConflictingUpdate(format!(
                        "path {} mixes {} with {}",
                        op.path, existing, family
                    )));
                }
                Some(_) => {}
                None => {
                    families.insert(op.path.as_str(), family);
                }
            }
        }
        Ok(())
    }

    /// Apply every op targeting `path`, in plan order, to `current`.
    pub fn apply_path(&self, path: &str, current: &[String]) -> Result<Vec<String>> {
        let mut value = current.to_vec();
        for op in self.ops.iter().filter(|op| op.path == path) {
            value = op.apply(&value)?;
        }
        Ok(value)
    }

    /// Paths touched by this plan, in first-seen order.
    pub fn paths(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.ops
            .iter()
            .filter(|op| seen.insert(op.path.as_str()))
            .map(|op| op.path.as_str())
            .collect()
    }
}

/// Build a plan for one array path under the given mode.
///
/// `Replace` and `AppendUnique` return an empty plan when there is nothing to
/// change, so callers can skip the write entirely. `ElementUpdate` errors
/// when the matched element is absent.
pub fn build_update(path: &str, current: &[String], mode: UpdateMode) -> Result<UpdatePlan> {
    match mode {
        UpdateMode::Replace { values } => {
            let deduped = dedupe(values);
            let current_set: HashSet<&String> = current.iter().collect();
            let next_set: HashSet<&String> = deduped.iter().collect();
            if current_set == next_set {
                return Ok(UpdatePlan::default());
            }
            Ok(UpdatePlan {
                ops: vec![ArrayOp {
                    path: path.to_string(),
                    operator: ArrayOperator::Set,
                    values: deduped,
                }],
            })
        }
        UpdateMode::AppendUnique { values } => {
            let mut additions = Vec::new();
            for v in dedupe(values) {
                if !current.contains(&v) {
                    additions.push(v);
                }
            }
            if additions.is_empty() {
                return Ok(UpdatePlan::default());
            }
            Ok(UpdatePlan {
                ops: vec![ArrayOp {
                    path: path.to_string(),
                    operator: ArrayOperator::AddUnique,
                    values: additions,
                }],
            })
        }
        UpdateMode::ElementUpdate {
            matching,
            replacement,
        } => {
            let index = current.iter().position(|v| *v == matching).ok_or_else(|| {
                Error::InvalidInput(format!("element {:?} not present in {}", matching, path))
            })?;
            Ok(UpdatePlan {
                ops: vec![ArrayOp {
                    path: path.to_string(),
                    operator: ArrayOperator::SetElement { index },
                    values: vec![replacement],
                }],
            })
        }
    }
}

fn dedupe(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values.into_iter().filter(|v| seen.insert(v.clone())).collect()
}
