//! Fan-out step expansion (§4.6): evaluate `collection` to a bounded
//! sequence, materialize one child step per element, and dispatch up to
//! `maxConcurrency` concurrently.

use crate::error::FlowError;
use crate::model::FanOutSpec;
use crate::template;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::future::Future;

/// Render `fanout.collection` against `context` and parse the result as a
/// JSON array, truncated to `maxItems`.
pub fn evaluate_collection(fanout: &FanOutSpec, context: &Value) -> Result<Vec<Value>, FlowError> {
    let rendered = template::render(&fanout.collection, context)?;
    let parsed: Value = serde_json::from_str(&rendered)
        .map_err(|e| FlowError::template_invalid(format!("collection did not render to JSON: {e}")))?;
    let array = parsed
        .as_array()
        .ok_or_else(|| FlowError::template_invalid("collection must render to a JSON array"))?
        .clone();
    Ok(array.into_iter().take(fanout.max_items as usize).collect())
}

/// One child step's materialized input: the template step substituted
/// with its index and element.
#[derive(Debug, Clone)]
pub struct FanoutChild {
    pub index: u32,
    pub element: Value,
}

pub fn materialize_children(elements: Vec<Value>) -> Vec<FanoutChild> {
    elements
        .into_iter()
        .enumerate()
        .map(|(index, element)| FanoutChild {
            index: index as u32,
            element,
        })
        .collect()
}

/// Dispatch `children` through `run_child` with at most `max_concurrency`
/// in flight at once, returning results in original index order (not
/// completion order) so aggregation under `storeResultsAs` is
/// deterministic. Generic over the child's output so callers can carry
/// back more than a bare `Result` (e.g. retry-attempt bookkeeping).
pub async fn dispatch<F, Fut, T>(children: Vec<FanoutChild>, max_concurrency: u32, run_child: F) -> Vec<T>
where
    F: Fn(FanoutChild) -> Fut,
    Fut: Future<Output = T>,
{
    stream::iter(children)
        .map(|child| run_child(child))
        .buffered(max_concurrency.max(1) as usize)
        .collect()
        .await
}
