//! Precomputed core pools for exclusive CPU binding.
//!
//! Pools of contiguous 1/2/4-core blocks are built once at startup;
//! executor slots rotate through them by slot index so concurrent tasks
//! land on disjoint blocks. Demands that match no pool fall back to a
//! contiguous block from core 0.

/// Immutable cpuset rotation groups for one node.
#[derive(Debug, Clone)]
pub struct CorePools {
    total: usize,
    groups_1: Vec<Vec<usize>>,
    groups_2: Vec<Vec<usize>>,
    groups_4: Vec<Vec<usize>>,
}

impl CorePools {
    pub fn new(total_cores: usize) -> Self {
        let total = total_cores.max(1);
        let groups_1 = (0..total).map(|i| vec![i]).collect();
        let groups_2 = if total >= 2 {
            (0..total - 1).step_by(2).map(|i| vec![i, i + 1]).collect()
        } else {
            vec![vec![0]]
        };
        let groups_4 = if total >= 4 {
            (0..total)
                .step_by(4)
                .map(|i| (i..(i + 4).min(total)).collect())
                .collect()
        } else {
            vec![(0..total.min(4)).collect()]
        };
        Self {
            total,
            groups_1,
            groups_2,
            groups_4,
        }
    }

    /// Total logical cores the pools were built for.
    pub fn total_cores(&self) -> usize {
        self.total
    }

    /// Cpuset string for a task demanding `units` vCPUs on executor
    /// slot `slot_idx`.
    pub fn cpuset_for(&self, units: u32, slot_idx: usize) -> String {
        let units = units.max(1) as usize;
        if units >= self.total {
            return format!("0-{}", self.total - 1);
        }
        match units {
            1 => {
                let group = &self.groups_1[slot_idx % self.groups_1.len()];
                group
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            }
            2 => {
                let group = &self.groups_2[slot_idx % self.groups_2.len()];
                format!("{}-{}", group[0], group[group.len() - 1])
            }
            4 => {
                let group = &self.groups_4[slot_idx % self.groups_4.len()];
                format!("{}-{}", group[0], group[group.len() - 1])
            }
            n => format!("0-{}", n.min(self.total) - 1),
        }
    }
}

/// Expand a cpuset string (`"0-3"`, `"0,2,5"`, or a mix) into core ids.
pub fn parse_cpuset(spec: &str) -> Vec<usize> {
    let mut cores = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((lo, hi)) = part.split_once('-') {
            if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<usize>(), hi.trim().parse::<usize>()) {
                if lo <= hi {
                    cores.extend(lo..=hi);
                }
            }
        } else if let Ok(core) = part.parse::<usize>() {
            cores.push(core);
        }
    }
    cores.sort_unstable();
    cores.dedup();
    cores
}
