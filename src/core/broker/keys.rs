//! Broker key naming shared by the dispatcher, scheduler, and workers.

/// Global FIFO of pending task envelopes.
pub const PENDING: &str = "q:pending";

/// Bag of free concurrency-slot tokens; token value is the node id.
pub const SLOTS: &str = "slots:available";

/// Prefix of per-node capacity counters, scanned during slot-less dispatch.
pub const CAPACITY_PREFIX: &str = "cap:";

/// Per-node work queue.
pub fn node_queue(node: &str) -> String {
    format!("q:{node}")
}

/// Available CPU capacity units on a node.
pub fn capacity(node: &str) -> String {
    format!("cap:{node}")
}

/// Registered maximum CPU capacity units on a node.
pub fn capacity_total(node: &str) -> String {
    format!("cap_total:{node}")
}

/// In-flight task count on a node.
pub fn run_count(node: &str) -> String {
    format!("run_count:{node}")
}

/// Physical (logical) core count, published for reference.
pub fn physical_cores(node: &str) -> String {
    format!("phys:{node}")
}

/// Allocation ratio, published for reference.
pub fn allocation_ratio(node: &str) -> String {
    format!("ratio:{node}")
}

/// Extract the node id from a `cap:<node>` key.
pub fn node_of_capacity_key(key: &str) -> Option<&str> {
    key.strip_prefix(CAPACITY_PREFIX)
}
