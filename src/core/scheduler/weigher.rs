//! Host-selection weighers applied over the feasible node set.

use std::str::FromStr;

use crate::Result;
use crate::core::broker::{Broker, keys};
use crate::error::LoadtraceError;

/// Tie-breaking function over feasible nodes during dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Weigher {
    /// Lexicographically smallest node id.
    #[default]
    FirstFit,
    /// Rank by in-flight task count (`run_count`).
    Instances,
    /// Rank by used vCPU (`cap_total - cap`).
    Vcpu,
}

impl FromStr for Weigher {
    type Err = LoadtraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "first-fit" => Ok(Weigher::FirstFit),
            "instances" => Ok(Weigher::Instances),
            "vcpu" => Ok(Weigher::Vcpu),
            other => Err(LoadtraceError::config(format!(
                "unknown weigher: {other} (expected first-fit, instances, or vcpu)"
            ))),
        }
    }
}

/// Whether smaller or larger metric values win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeigherOrder {
    #[default]
    Min,
    Max,
}

impl FromStr for WeigherOrder {
    type Err = LoadtraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "min" => Ok(WeigherOrder::Min),
            "max" => Ok(WeigherOrder::Max),
            other => Err(LoadtraceError::config(format!(
                "unknown weigher order: {other} (expected min or max)"
            ))),
        }
    }
}

async fn metric(broker: &dyn Broker, weigher: Weigher, node: &str) -> Result<i64> {
    match weigher {
        Weigher::FirstFit => Ok(0),
        Weigher::Instances => broker.get_i64(&keys::run_count(node)).await,
        Weigher::Vcpu => {
            let total = broker.get_i64(&keys::capacity_total(node)).await?;
            if total <= 0 {
                return Ok(0);
            }
            let free = broker.get_i64(&keys::capacity(node)).await?;
            Ok((total - free).max(0))
        }
    }
}

/// Pick one node from `feasible` according to the configured weigher.
///
/// Ties always break toward the smallest node id.
pub async fn choose_host(
    broker: &dyn Broker,
    weigher: Weigher,
    order: WeigherOrder,
    feasible: &[String],
) -> Result<Option<String>> {
    if feasible.is_empty() {
        return Ok(None);
    }
    let mut hosts: Vec<&String> = feasible.iter().collect();
    hosts.sort();
    if weigher == Weigher::FirstFit {
        return Ok(Some(hosts[0].clone()));
    }
    let mut best: Option<(i64, &String)> = None;
    for node in hosts {
        let m = metric(broker, weigher, node).await?;
        let wins = match &best {
            None => true,
            Some((best_m, _)) => match order {
                WeigherOrder::Min => m < *best_m,
                WeigherOrder::Max => m > *best_m,
            },
        };
        if wins {
            best = Some((m, node));
        }
    }
    Ok(best.map(|(_, node)| node.clone()))
}
