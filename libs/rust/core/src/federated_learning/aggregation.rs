//! Pure aggregation arithmetic over parameter trees.

use std::num::NonZeroUsize;

use crate::error::AggregationError;
use super::params::ParameterTree;

/// Elementwise sum of two trees. Neither input is modified.
pub fn sum<P: ParameterTree>(a: &P, b: &P) -> Result<P, AggregationError> {
    let mut total = a.clone();
    total.accumulate(b)?;
    Ok(total)
}

/// Scale every leaf by `1/n`. A zero count cannot be expressed.
pub fn divide<P: ParameterTree>(tree: &P, n: NonZeroUsize) -> P {
    let mut scaled = tree.clone();
    scaled.divide_leaves(n.get() as f64);
    scaled
}

/// Running FedAvg fold: the first tree seeds the total, later trees are added into it.
#[derive(Debug, Clone)]
pub struct Accumulator<P> {
    total: Option<P>,
    count: usize,
}

impl<P: ParameterTree> Default for Accumulator<P> {
    fn default() -> Self { Self { total: None, count: 0 } }
}

impl<P: ParameterTree> Accumulator<P> {
    pub fn new() -> Self { Self::default() }

    pub fn fold(&mut self, tree: P) -> Result<(), AggregationError> {
        match self.total.as_mut() {
            Some(total) => total.accumulate(&tree)?,
            None => self.total = Some(tree),
        }
        self.count += 1;
        Ok(())
    }

    /// Number of trees folded so far.
    pub fn count(&self) -> usize { self.count }

    /// Mean of every folded tree.
    pub fn finish(self) -> Result<P, AggregationError> {
        let (Some(mut total), Some(n)) = (self.total, NonZeroUsize::new(self.count)) else {
            return Err(AggregationError::NoSubmissions);
        };
        total.divide_leaves(n.get() as f64);
        Ok(total)
    }
}

/// Mean of `trees`, failing with [`AggregationError::NoSubmissions`] on an empty input.
pub fn mean<P: ParameterTree, I: IntoIterator<Item = P>>(trees: I) -> Result<P, AggregationError> {
    let mut acc = Accumulator::new();
    for tree in trees { acc.fold(tree)?; }
    acc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federated_learning::params::{DynamicParams, ModelParams, ParamNode};

    fn dy(json: &str) -> DynamicParams { serde_json::from_str(json).unwrap() }

    #[test]
    fn sum_is_order_independent() {
        let a = dy(r#"{"w":[1.0,2.0],"b":0.5}"#);
        let b = dy(r#"{"w":[3.0,4.0],"b":1.5}"#);
        let c = dy(r#"{"w":[5.0,6.0],"b":2.0}"#);
        let left = sum(&sum(&a, &b).unwrap(), &c).unwrap();
        let right = sum(&a, &sum(&c, &b).unwrap()).unwrap();
        assert_eq!(left, right);
        assert_eq!(left, dy(r#"{"w":[9.0,12.0],"b":4.0}"#));
        // inputs untouched
        assert_eq!(a, dy(r#"{"w":[1.0,2.0],"b":0.5}"#));
    }

    #[test]
    fn divide_scales_every_leaf() {
        let t = dy(r#"{"w":[[2.0,4.0],[6.0]],"b":8.0}"#);
        let out = divide(&t, NonZeroUsize::new(2).unwrap());
        assert_eq!(out, dy(r#"{"w":[[1.0,2.0],[3.0]],"b":4.0}"#));
    }

    #[test]
    fn mean_of_fixed_schema() {
        let trees = (1..=4).map(|i| ModelParams { conv1_bias: vec![i as f64], fc1_weight: vec![vec![i as f64, 0.0]], ..Default::default() });
        let avg = mean(trees).unwrap();
        assert_eq!(avg.conv1_bias, vec![2.5]);
        assert_eq!(avg.fc1_weight, vec![vec![2.5, 0.0]]);
    }

    #[test]
    fn empty_fold_never_divides() {
        let acc: Accumulator<DynamicParams> = Accumulator::new();
        assert_eq!(acc.count(), 0);
        assert_eq!(acc.finish().unwrap_err(), AggregationError::NoSubmissions);
        assert_eq!(mean(Vec::<ModelParams>::new()).unwrap_err(), AggregationError::NoSubmissions);
    }

    #[test]
    fn single_tree_mean_is_identity() {
        let t = dy(r#"{"w":[0.1,0.2,0.3]}"#);
        assert_eq!(mean(vec![t.clone()]).unwrap(), t);
    }

    #[test]
    fn mean_truncates_dynamic_sequences() {
        let avg = mean(vec![dy(r#"{"w":[2.0,4.0,6.0]}"#), dy(r#"{"w":[4.0,8.0]}"#)]).unwrap();
        assert_eq!(avg.get("w"), Some(&ParamNode::Sequence(vec![ParamNode::Leaf(3.0), ParamNode::Leaf(6.0)])));
    }
}
