//! Flattens nested objects into rows of scalar fields.

use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};

use crate::cabinet::{BuildContext, StageJar};
use crate::definition::JarSpec;
use crate::error::FlowError;
use crate::flow::Flow;
use crate::item::Item;

/// A flat row: dotted path to scalar value.
pub type Row = Map<String, Value>;

/// One-to-many structural flatten.
///
/// Rows are produced lazily from each input item, so extra rows wait for
/// downstream demand.
pub struct FlattenStageJar;

impl StageJar for FlattenStageJar {
    fn new_stage(
        &self,
        spec: &JarSpec,
        _build: &BuildContext<'_>,
        input: Flow,
    ) -> Result<Flow, FlowError> {
        let prefix = spec.str_option("prefix")?.unwrap_or_default().to_string();

        Ok(input.transform(move |items, _| {
            let prefix = prefix.clone();
            items
                .flat_map(move |result| {
                    let outputs: Vec<Result<Item, FlowError>> = match result {
                        Ok(item) => flatten_item(item, &prefix).into_iter().map(Ok).collect(),
                        Err(e) => vec![Err(e)],
                    };
                    stream::iter(outputs)
                })
                .boxed()
        }))
    }
}

/// Flattens an item's payload, copying its metadata to every output.
///
/// Non-object payloads pass through unchanged.
pub fn flatten_item(item: Item, prefix: &str) -> Vec<Item> {
    match &item.data {
        Value::Object(object) => flatten(object, prefix)
            .into_iter()
            .map(|row| item.with_data(Value::Object(row)))
            .collect(),
        _ => vec![item],
    }
}

/// Flattens `object` into the cross product of its nested rows.
///
/// Scalars are collected first under their dotted path. Each nested object
/// is then crossed with the rows so far; each array contributes its object
/// elements as alternatives. Arrays without object elements are ignored.
pub fn flatten(object: &Map<String, Value>, prefix: &str) -> Vec<Row> {
    let mut scalars = Row::new();
    for (key, value) in object {
        if !matches!(value, Value::Object(_) | Value::Array(_)) {
            scalars.insert(path(prefix, key), value.clone());
        }
    }
    let mut rows = vec![scalars];

    for (key, value) in object {
        match value {
            Value::Object(nested) => {
                rows = cross(&rows, &flatten(nested, &path(prefix, key)));
            }
            Value::Array(elements) => {
                let nested_prefix = path(prefix, key);
                let alternatives: Vec<Row> = elements
                    .iter()
                    .filter_map(Value::as_object)
                    .flat_map(|element| flatten(element, &nested_prefix))
                    .collect();
                if !alternatives.is_empty() {
                    rows = cross(&rows, &alternatives);
                }
            }
            _ => {}
        }
    }

    rows
}

fn path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

/// Every left row combined with every right row; right wins on collision.
fn cross(left: &[Row], right: &[Row]) -> Vec<Row> {
    let mut combined = Vec::with_capacity(left.len() * right.len());
    for l in left {
        for r in right {
            let mut row = l.clone();
            for (key, value) in r {
                row.insert(key.clone(), value.clone());
            }
            combined.push(row);
        }
    }
    combined
}
