//! Observations and the indexed model built from them.
//!
//! A [`Dataset`] is one batch of observed outputs, optionally tagged with the
//! items that went in. [`build_model`] turns a list of them into an item
//! universe (ordered by first appearance as an output) and, per dataset, a
//! dense count vector plus the [`InputMode`] used by the likelihood.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{InferenceError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCount {
    pub id: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputItem {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub items: Vec<ItemCount>,
    #[serde(default)]
    pub input_items: Option<Vec<InputItem>>,
}

impl Dataset {
    pub fn new(items: impl IntoIterator<Item = (impl Into<String>, u64)>) -> Self {
        Dataset {
            items: items
                .into_iter()
                .map(|(id, count)| ItemCount {
                    id: id.into(),
                    count,
                })
                .collect(),
            input_items: None,
        }
    }

    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.input_items = Some(
            inputs
                .into_iter()
                .map(|id| InputItem { id: id.into() })
                .collect(),
        );
        self
    }

    pub fn total_count(&self) -> u64 {
        self.items.iter().map(|item| item.count).sum()
    }
}

/// How the input of a dataset is treated by the likelihood.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InputMode {
    /// No input declared: every item is a possible output.
    Unknown,
    /// Exactly one declared input.
    Single { input: String },
    /// Several declared inputs. `inputs[0]` is recorded as used, but none of
    /// them is excluded: the likelihood treats the dataset like `Unknown`.
    Multiple {
        inputs: Vec<String>,
        #[serde(rename = "usesFirst")]
        uses_first: String,
    },
}

impl InputMode {
    fn from_inputs(inputs: Option<&[InputItem]>) -> Self {
        match inputs.unwrap_or_default() {
            [] => InputMode::Unknown,
            [single] => InputMode::Single {
                input: single.id.clone(),
            },
            many => InputMode::Multiple {
                inputs: many.iter().map(|item| item.id.clone()).collect(),
                uses_first: many[0].id.clone(),
            },
        }
    }

    /// The input recorded as used, if any.
    ///
    /// Only a `Single` input is excluded from the outputs, and only when it
    /// is part of the item universe.
    pub fn used_input(&self) -> Option<&str> {
        match self {
            InputMode::Unknown => None,
            InputMode::Single { input } => Some(input),
            InputMode::Multiple { uses_first, .. } => Some(uses_first),
        }
    }
}

/// A dataset resolved against the item universe.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub counts: Box<[u64]>,
    pub total: u64,
    pub mode: InputMode,
    /// Universe index of the excluded input for `Single` mode.
    pub excluded: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetAssumption {
    pub dataset: usize,
    pub mode: InputMode,
}

/// Which input assumption was made for every dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelAssumptions {
    pub datasets: Vec<DatasetAssumption>,
    pub single_input: usize,
    pub multiple_inputs: usize,
    pub unknown_input: usize,
    pub notes: Vec<String>,
}

impl ModelAssumptions {
    fn record(&mut self, dataset: usize, mode: &InputMode) {
        match mode {
            InputMode::Unknown => {
                self.unknown_input += 1;
                self.notes.push(format!(
                    "Dataset {dataset}: input unknown, all items treated as possible outputs"
                ));
            }
            InputMode::Single { .. } => self.single_input += 1,
            InputMode::Multiple { inputs, uses_first } => {
                self.multiple_inputs += 1;
                self.notes.push(format!(
                    "Dataset {dataset}: {} inputs declared, '{uses_first}' recorded as used, \
                     no input excluded from outputs",
                    inputs.len(),
                ));
            }
        }
        self.datasets.push(DatasetAssumption {
            dataset,
            mode: mode.clone(),
        });
    }
}

/// The indexed form of a batch of datasets.
#[derive(Debug, Clone)]
pub struct WeightModel {
    items: Vec<String>,
    observations: Vec<Observation>,
    assumptions: ModelAssumptions,
}

impl WeightModel {
    /// Item identifiers in universe order.
    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn dim(&self) -> usize {
        self.items.len()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn assumptions(&self) -> &ModelAssumptions {
        &self.assumptions
    }
}

/// Build the item universe and resolve every dataset against it.
///
/// Items that only ever appear as inputs are not part of the universe.
/// Fails with [`InferenceError::EmptyUniverse`] if no dataset has outputs.
pub fn build_model(datasets: &[Dataset]) -> Result<WeightModel> {
    let mut items: Vec<String> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for item in datasets.iter().flat_map(|dataset| dataset.items.iter()) {
        if !index.contains_key(item.id.as_str()) {
            index.insert(&item.id, items.len());
            items.push(item.id.clone());
        }
    }
    if items.is_empty() {
        return Err(InferenceError::EmptyUniverse);
    }

    let mut assumptions = ModelAssumptions::default();
    let observations = datasets
        .iter()
        .enumerate()
        .map(|(i, dataset)| {
            let mut counts = vec![0u64; items.len()];
            for item in dataset.items.iter() {
                counts[index[item.id.as_str()]] += item.count;
            }
            let mode = InputMode::from_inputs(dataset.input_items.as_deref());
            assumptions.record(i, &mode);
            let excluded = match &mode {
                InputMode::Single { input } => index.get(input.as_str()).copied(),
                _ => None,
            };
            Observation {
                total: counts.iter().sum(),
                counts: counts.into(),
                mode,
                excluded,
            }
        })
        .collect();

    Ok(WeightModel {
        items,
        observations,
        assumptions,
    })
}

/// Reject datasets without any observed output.
///
/// The sampler tolerates them, so this is for callers that want to refuse
/// such input up front.
pub fn validate_datasets(datasets: &[Dataset]) -> Result<()> {
    match datasets.iter().position(|dataset| dataset.total_count() == 0) {
        Some(dataset) => Err(InferenceError::InsufficientData { dataset }),
        None => Ok(()),
    }
}
