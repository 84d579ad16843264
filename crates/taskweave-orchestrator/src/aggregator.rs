use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use taskweave_core::{
    AggregationStrategy, SubTaskResult, SynthesisInput, Synthesizer, TaskweaveError,
    TaskweaveResult,
};
use tracing::{debug, info};

/// Decides whether two outputs count as the same answer for consensus.
pub type EquivalenceFn = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Merges per-task results into one output.
#[derive(Clone, Default)]
pub struct ResultAggregator {
    synthesizer: Option<Arc<dyn Synthesizer>>,
    equivalence: Option<EquivalenceFn>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn with_equivalence(mut self, equivalence: EquivalenceFn) -> Self {
        self.equivalence = Some(equivalence);
        self
    }

    /// Merge `results` according to `strategy`.
    ///
    /// `results` must already be in execution order (layer, then input order
    /// within a layer); hierarchy aggregation hands them on as given.
    ///
    /// # Errors
    /// - [`TaskweaveError::NoSuccessfulResults`] when parallel or consensus
    ///   aggregation has nothing to work with.
    /// - [`TaskweaveError::Aggregation`] wrapping any other failure, including
    ///   synthesizer errors.
    pub async fn aggregate(
        &self,
        goal: &str,
        strategy: AggregationStrategy,
        results: &[SubTaskResult],
    ) -> TaskweaveResult<Value> {
        info!(
            strategy = %strategy,
            results = results.len(),
            "Aggregating results"
        );
        match strategy {
            AggregationStrategy::Parallel => parallel(results),
            AggregationStrategy::Hierarchy => self.hierarchy(goal, results).await,
            AggregationStrategy::Consensus => self.consensus(goal, results).await,
        }
    }

    async fn hierarchy(&self, goal: &str, results: &[SubTaskResult]) -> TaskweaveResult<Value> {
        let synthesizer = self.require_synthesizer(AggregationStrategy::Hierarchy)?;
        synthesizer
            .synthesize(SynthesisInput {
                goal,
                results,
                groups: &[],
            })
            .await
            .map_err(TaskweaveError::aggregation)
    }

    async fn consensus(&self, goal: &str, results: &[SubTaskResult]) -> TaskweaveResult<Value> {
        let successes: Vec<&SubTaskResult> = results.iter().filter(|r| r.is_success()).collect();
        if successes.is_empty() {
            return Err(TaskweaveError::NoSuccessfulResults);
        }

        let groups = self.partition(&successes);
        let group_ids: Vec<Vec<String>> = groups
            .iter()
            .map(|g| g.iter().map(|&i| successes[i].task_id.clone()).collect())
            .collect();

        let comparable = successes.iter().all(|r| is_scalar(&r.output));
        if self.equivalence.is_none() && !comparable {
            if let Some(synthesizer) = &self.synthesizer {
                debug!(groups = groups.len(), "Outputs not directly comparable, delegating to synthesizer");
                return synthesizer
                    .synthesize(SynthesisInput {
                        goal,
                        results,
                        groups: &group_ids,
                    })
                    .await
                    .map_err(TaskweaveError::aggregation);
            }
        }

        // Largest group wins; on a tie the group seen first is kept.
        let mut winner = 0;
        for (i, group) in groups.iter().enumerate().skip(1) {
            if group.len() > groups[winner].len() {
                winner = i;
            }
        }

        let representative = successes[groups[winner][0]];
        Ok(json!({
            "output": representative.output,
            "agreement": groups[winner].len(),
            "total": successes.len(),
            "task_ids": group_ids[winner],
        }))
    }

    /// Group successful results by equivalence, in first-seen order.
    fn partition(&self, successes: &[&SubTaskResult]) -> Vec<Vec<usize>> {
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (i, result) in successes.iter().enumerate() {
            let found = groups
                .iter_mut()
                .find(|g| self.equivalent(&successes[g[0]].output, &result.output));
            match found {
                Some(group) => group.push(i),
                None => groups.push(vec![i]),
            }
        }
        groups
    }

    fn equivalent(&self, a: &Value, b: &Value) -> bool {
        match &self.equivalence {
            Some(eq) => eq(a, b),
            None => a == b,
        }
    }

    fn require_synthesizer(
        &self,
        strategy: AggregationStrategy,
    ) -> TaskweaveResult<&Arc<dyn Synthesizer>> {
        self.synthesizer.as_ref().ok_or_else(|| {
            TaskweaveError::aggregation(TaskweaveError::Config(format!(
                "{strategy} aggregation requires a synthesizer"
            )))
        })
    }
}

impl std::fmt::Debug for ResultAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultAggregator")
            .field("synthesizer", &self.synthesizer.is_some())
            .field("equivalence", &self.equivalence.is_some())
            .finish()
    }
}

/// Key every successful output by task ID. Keys are sorted, so the same
/// results always serialize to the same bytes.
fn parallel(results: &[SubTaskResult]) -> TaskweaveResult<Value> {
    let merged: BTreeMap<&str, Value> = results
        .iter()
        .filter(|r| r.is_success())
        .map(|r| {
            (
                r.task_id.as_str(),
                json!({ "agent": r.agent_name, "output": r.output }),
            )
        })
        .collect();

    if merged.is_empty() {
        return Err(TaskweaveError::NoSuccessfulResults);
    }

    let object: Map<String, Value> = merged
        .into_iter()
        .map(|(id, entry)| (id.to_string(), entry))
        .collect();
    Ok(Value::Object(object))
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}
