use crate::etl::traits::Transformer;
use crate::types::{Payload, TransformOutcome};
use crate::Result;
use tracing::debug;

/// Runs transformers in declared order. The first `Drop` ends the chain.
pub struct TransformerChain {
    steps: Vec<Box<dyn Transformer>>,
}

impl TransformerChain {
    pub fn new(steps: Vec<Box<dyn Transformer>>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Transformer for TransformerChain {
    fn kind(&self) -> &str {
        "chain"
    }

    fn transform(&self, payload: &Payload) -> Result<TransformOutcome> {
        let mut current = payload.clone();
        for (index, step) in self.steps.iter().enumerate() {
            match step.transform(&current)? {
                TransformOutcome::Keep(record) => current = record,
                TransformOutcome::Drop => {
                    debug!("Chain step {} ({}) dropped the record", index, step.kind());
                    return Ok(TransformOutcome::Drop);
                }
            }
        }
        Ok(TransformOutcome::Keep(current))
    }
}
