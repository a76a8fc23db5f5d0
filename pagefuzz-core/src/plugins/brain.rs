//! Bundled brain modules

use super::Adapter;
use crate::protocol::{FuzzRecord, GenerateRequest, GeneratedBatch};
use serde_json::Value;

pub const NO_BRAIN_MODULE: &str = "noBrainModule";

/// Pass-through brain: asks every generator for a plain batch and fuzzes
/// every combination
#[derive(Debug, Default)]
pub struct NoBrain;

impl Adapter for NoBrain {
    fn name(&self) -> &str {
        "no Brainer"
    }

    fn description(&self) -> &str {
        "No treatment on fuzzing data sessions"
    }

    fn compatible_generators(&self) -> &[&str] {
        &["*"]
    }

    fn handle_generation(
        &mut self,
        generator_ids: &[usize],
        batch_size: usize,
        _previous_batch: Option<&[FuzzRecord]>,
    ) -> Vec<GenerateRequest> {
        generator_ids
            .iter()
            .map(|&id| GenerateRequest {
                id,
                batch_size,
                args: Vec::new(),
            })
            .collect()
    }

    fn assemble(&mut self, mut generated: Vec<GeneratedBatch>) -> Vec<Vec<Value>> {
        generated.sort_by_key(|g| g.id);
        let columns: Vec<Vec<Value>> = generated.into_iter().map(|g| g.batch).collect();
        cartesian_product(&columns)
    }
}

/// Every combination of one value per column, in row-major order
///
/// The last column varies fastest. No columns yield one empty tuple; an empty
/// column yields no tuples at all.
pub fn cartesian_product(columns: &[Vec<Value>]) -> Vec<Vec<Value>> {
    columns.iter().fold(vec![Vec::new()], |tuples, column| {
        tuples
            .iter()
            .flat_map(|prefix| {
                column.iter().map(move |value| {
                    let mut tuple = prefix.clone();
                    tuple.push(value.clone());
                    tuple
                })
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_product_is_row_major() {
        let columns = vec![vec![json!("a"), json!("b")], vec![json!(1), json!(2), json!(3)]];
        let tuples = cartesian_product(&columns);
        assert_eq!(tuples.len(), 6);
        assert!(tuples.iter().all(|t| t.len() == 2));
        assert_eq!(tuples[0], vec![json!("a"), json!(1)]);
        assert_eq!(tuples[2], vec![json!("a"), json!(3)]);
        assert_eq!(tuples[3], vec![json!("b"), json!(1)]);
        assert_eq!(tuples[5], vec![json!("b"), json!(3)]);
    }

    #[test]
    fn test_product_edge_shapes() {
        assert_eq!(cartesian_product(&[]), vec![Vec::<Value>::new()]);
        assert!(cartesian_product(&[vec![json!(1)], vec![]]).is_empty());
    }

    #[test]
    fn test_assemble_orders_columns_by_argument_position() {
        let generated = vec![
            GeneratedBatch {
                id: 1,
                batch: vec![json!("y")],
            },
            GeneratedBatch {
                id: 0,
                batch: vec![json!("x")],
            },
        ];
        assert_eq!(NoBrain.assemble(generated), vec![vec![json!("x"), json!("y")]]);
    }

    #[test]
    fn test_one_plain_request_per_generator() {
        let requests = NoBrain.handle_generation(&[0, 2], 5, None);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].id, 2);
        assert!(requests.iter().all(|r| r.batch_size == 5 && r.args.is_empty()));
        assert!(NoBrain.accepts("anyGenModule"));
    }
}
