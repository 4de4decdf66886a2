//! Parameter trees: the nested numeric structures clients submit each round.
//!
//! Two schemas are supported:
//! - [`ModelParams`]: the fixed ten-field layout of a two-conv, three-fc CNN. Every field must have the
//!   same shape across submissions; a length mismatch at any depth is an error.
//! - [`DynamicParams`]: a schema-less tree discovered from the JSON itself. Sequences of different
//!   lengths are combined up to the shorter one and the excess is dropped.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AggregationError;

/// A tree of numeric leaves that can be summed and scaled elementwise.
pub trait ParameterTree: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Add `other` into `self`, leaf by leaf.
    fn accumulate(&mut self, other: &Self) -> Result<(), AggregationError>;
    /// Divide every leaf by `divisor`.
    fn divide_leaves(&mut self, divisor: f64);
}

/// Rectangular numeric arrays of any depth with exact shape checking.
trait Tensor {
    fn add_exact(&mut self, other: &Self) -> Result<(), AggregationError>;
    fn divide_all(&mut self, divisor: f64);
}

impl Tensor for f64 {
    fn add_exact(&mut self, other: &Self) -> Result<(), AggregationError> { *self += *other; Ok(()) }
    fn divide_all(&mut self, divisor: f64) { *self /= divisor; }
}

impl<T: Tensor> Tensor for Vec<T> {
    fn add_exact(&mut self, other: &Self) -> Result<(), AggregationError> {
        if self.len() != other.len() {
            return Err(AggregationError::ShapeMismatch { path: String::new(), expected: self.len(), found: other.len() });
        }
        for (i, (a, b)) in self.iter_mut().zip(other).enumerate() {
            a.add_exact(b).map_err(|e| e.within(&format!("[{i}]")))?;
        }
        Ok(())
    }

    fn divide_all(&mut self, divisor: f64) { self.iter_mut().for_each(|v| v.divide_all(divisor)); }
}

fn add_field<T: Tensor>(name: &str, total: &mut T, other: &T) -> Result<(), AggregationError> {
    total.add_exact(other).map_err(|e| e.within(name))
}

/// Fixed-schema parameters: two conv layers and three fully-connected layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    #[serde(rename = "conv1.bias")]
    pub conv1_bias: Vec<f64>,
    #[serde(rename = "conv1.weight")]
    pub conv1_weight: Vec<Vec<Vec<Vec<f64>>>>,
    #[serde(rename = "conv2.bias")]
    pub conv2_bias: Vec<f64>,
    #[serde(rename = "conv2.weight")]
    pub conv2_weight: Vec<Vec<Vec<Vec<f64>>>>,
    #[serde(rename = "fc1.bias")]
    pub fc1_bias: Vec<f64>,
    #[serde(rename = "fc1.weight")]
    pub fc1_weight: Vec<Vec<f64>>,
    #[serde(rename = "fc2.bias")]
    pub fc2_bias: Vec<f64>,
    #[serde(rename = "fc2.weight")]
    pub fc2_weight: Vec<Vec<f64>>,
    #[serde(rename = "fc3.bias")]
    pub fc3_bias: Vec<f64>,
    #[serde(rename = "fc3.weight")]
    pub fc3_weight: Vec<Vec<f64>>,
}

impl ParameterTree for ModelParams {
    fn accumulate(&mut self, other: &Self) -> Result<(), AggregationError> {
        add_field("conv1.bias", &mut self.conv1_bias, &other.conv1_bias)?;
        add_field("conv1.weight", &mut self.conv1_weight, &other.conv1_weight)?;
        add_field("conv2.bias", &mut self.conv2_bias, &other.conv2_bias)?;
        add_field("conv2.weight", &mut self.conv2_weight, &other.conv2_weight)?;
        add_field("fc1.bias", &mut self.fc1_bias, &other.fc1_bias)?;
        add_field("fc1.weight", &mut self.fc1_weight, &other.fc1_weight)?;
        add_field("fc2.bias", &mut self.fc2_bias, &other.fc2_bias)?;
        add_field("fc2.weight", &mut self.fc2_weight, &other.fc2_weight)?;
        add_field("fc3.bias", &mut self.fc3_bias, &other.fc3_bias)?;
        add_field("fc3.weight", &mut self.fc3_weight, &other.fc3_weight)
    }

    fn divide_leaves(&mut self, divisor: f64) {
        self.conv1_bias.divide_all(divisor);
        self.conv1_weight.divide_all(divisor);
        self.conv2_bias.divide_all(divisor);
        self.conv2_weight.divide_all(divisor);
        self.fc1_bias.divide_all(divisor);
        self.fc1_weight.divide_all(divisor);
        self.fc2_bias.divide_all(divisor);
        self.fc2_weight.divide_all(divisor);
        self.fc3_bias.divide_all(divisor);
        self.fc3_weight.divide_all(divisor);
    }
}

/// One node of a schema-less parameter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamNode {
    Leaf(f64),
    Sequence(Vec<ParamNode>),
    Object(BTreeMap<String, ParamNode>),
}

impl ParamNode {
    fn kind(&self) -> &'static str {
        match self {
            ParamNode::Leaf(_) => "number",
            ParamNode::Sequence(_) => "sequence",
            ParamNode::Object(_) => "object",
        }
    }

    /// Elementwise sum. Sequences are truncated to the shorter operand.
    pub fn add(&self, other: &ParamNode) -> Result<ParamNode, AggregationError> {
        match (self, other) {
            (ParamNode::Leaf(a), ParamNode::Leaf(b)) => Ok(ParamNode::Leaf(a + b)),
            (ParamNode::Sequence(a), ParamNode::Sequence(b)) => a
                .iter()
                .zip(b)
                .enumerate()
                .map(|(i, (x, y))| x.add(y).map_err(|e| e.within(&format!("[{i}]"))))
                .collect::<Result<Vec<_>, _>>()
                .map(ParamNode::Sequence),
            (ParamNode::Object(a), ParamNode::Object(b)) => {
                let mut merged = a.clone();
                merge_into(&mut merged, b)?;
                Ok(ParamNode::Object(merged))
            }
            (l, r) => Err(AggregationError::KindMismatch { path: String::new(), left: l.kind(), right: r.kind() }),
        }
    }

    pub fn divide(&mut self, divisor: f64) {
        match self {
            ParamNode::Leaf(v) => *v /= divisor,
            ParamNode::Sequence(items) => items.iter_mut().for_each(|n| n.divide(divisor)),
            ParamNode::Object(map) => map.values_mut().for_each(|n| n.divide(divisor)),
        }
    }
}

/// Keys present in both maps are summed; keys only in `other` are carried over as-is.
fn merge_into(total: &mut BTreeMap<String, ParamNode>, other: &BTreeMap<String, ParamNode>) -> Result<(), AggregationError> {
    for (key, value) in other {
        match total.get_mut(key) {
            Some(existing) => *existing = existing.add(value).map_err(|e| e.within(key))?,
            None => { total.insert(key.clone(), value.clone()); }
        }
    }
    Ok(())
}

/// Schema-less parameters keyed by layer name, e.g. `{"fc1.bias": [0.1, 0.2]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DynamicParams(pub BTreeMap<String, ParamNode>);

impl DynamicParams {
    pub fn get(&self, key: &str) -> Option<&ParamNode> { self.0.get(key) }
}

impl FromIterator<(String, ParamNode)> for DynamicParams {
    fn from_iter<I: IntoIterator<Item = (String, ParamNode)>>(iter: I) -> Self { Self(iter.into_iter().collect()) }
}

impl ParameterTree for DynamicParams {
    fn accumulate(&mut self, other: &Self) -> Result<(), AggregationError> { merge_into(&mut self.0, &other.0) }

    fn divide_leaves(&mut self, divisor: f64) { self.0.values_mut().for_each(|n| n.divide(divisor)); }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(values: &[f64]) -> ParamNode { ParamNode::Sequence(values.iter().copied().map(ParamNode::Leaf).collect()) }

    #[test]
    fn dynamic_decodes_nested_numbers() {
        let p: DynamicParams = serde_json::from_str(r#"{"fc1.bias":[1,2.5],"conv":[[[0.5]]],"meta":{"scale":3}}"#).unwrap();
        assert_eq!(p.get("fc1.bias"), Some(&seq(&[1.0, 2.5])));
        assert!(matches!(p.get("conv"), Some(ParamNode::Sequence(_))));
        assert!(matches!(p.get("meta"), Some(ParamNode::Object(_))));
    }

    #[test]
    fn dynamic_rejects_non_numeric_leaves() {
        assert!(serde_json::from_str::<DynamicParams>(r#"{"a":["x"]}"#).is_err());
        assert!(serde_json::from_str::<DynamicParams>(r#"{"a":null}"#).is_err());
    }

    #[test]
    fn sequence_sum_truncates_to_shorter() {
        let sum = seq(&[1.0, 2.0, 3.0]).add(&seq(&[10.0, 20.0])).unwrap();
        assert_eq!(sum, seq(&[11.0, 22.0]));
        let sum = seq(&[1.0]).add(&seq(&[10.0, 20.0, 30.0])).unwrap();
        assert_eq!(sum, seq(&[11.0]));
    }

    #[test]
    fn kind_mismatch_reports_path() {
        let a: DynamicParams = serde_json::from_str(r#"{"w":[[1,2],[3,4]]}"#).unwrap();
        let b: DynamicParams = serde_json::from_str(r#"{"w":[[1,2],5]}"#).unwrap();
        let mut acc = a.clone();
        let err = acc.accumulate(&b).unwrap_err();
        assert_eq!(err, AggregationError::KindMismatch { path: "w[1]".into(), left: "sequence", right: "number" });
    }

    #[test]
    fn keys_missing_on_one_side_are_carried() {
        let mut a: DynamicParams = serde_json::from_str(r#"{"x":[1]}"#).unwrap();
        let b: DynamicParams = serde_json::from_str(r#"{"x":[2],"y":[7]}"#).unwrap();
        a.accumulate(&b).unwrap();
        assert_eq!(a.get("x"), Some(&seq(&[3.0])));
        assert_eq!(a.get("y"), Some(&seq(&[7.0])));
    }

    #[test]
    fn nested_objects_recurse() {
        let mut a: DynamicParams = serde_json::from_str(r#"{"block":{"w":[1,1],"b":2}}"#).unwrap();
        let b: DynamicParams = serde_json::from_str(r#"{"block":{"w":[3,5],"b":4}}"#).unwrap();
        a.accumulate(&b).unwrap();
        a.divide_leaves(2.0);
        let expected: DynamicParams = serde_json::from_str(r#"{"block":{"w":[2,3],"b":3}}"#).unwrap();
        assert_eq!(a, expected);
    }

    #[test]
    fn fixed_schema_uses_dotted_field_names() {
        let p = ModelParams { conv1_bias: vec![1.0], fc3_weight: vec![vec![0.5, 0.25]], ..Default::default() };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["conv1.bias"], serde_json::json!([1.0]));
        assert_eq!(json["fc3.weight"], serde_json::json!([[0.5, 0.25]]));
        let back: ModelParams = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn fixed_schema_shape_mismatch_is_an_error() {
        let mut a = ModelParams { conv1_weight: vec![vec![vec![vec![1.0, 2.0]]]], ..Default::default() };
        let b = ModelParams { conv1_weight: vec![vec![vec![vec![1.0]]]], ..Default::default() };
        let err = a.accumulate(&b).unwrap_err();
        assert_eq!(err, AggregationError::ShapeMismatch { path: "conv1.weight[0][0][0]".into(), expected: 2, found: 1 });

        let mut c = ModelParams { fc2_bias: vec![1.0, 2.0], ..Default::default() };
        let d = ModelParams { fc2_bias: vec![1.0, 2.0, 3.0], ..Default::default() };
        assert!(matches!(c.accumulate(&d), Err(AggregationError::ShapeMismatch { ref path, .. }) if path == "fc2.bias"));
    }
}
