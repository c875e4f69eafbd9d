//! Flow variable side effects
//!
//! Post-match code never writes flow variables directly; it queues
//! operations on the thread context, and the engine applies the pending
//! list to the flow after every record inspection. This keeps side effects
//! deterministic relative to record order.

use crate::flow::Flow;

/// One pending flow-variable operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowVarOp {
    pub key: String,
    pub value: String,
}

/// Apply and clear the pending operation list
pub fn process_flowvar_list(pending: &mut Vec<FlowVarOp>, flow: &mut Flow) {
    for op in pending.drain(..) {
        flow.vars.insert(op.key, op.value);
    }
}
