use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::model::{ProcessRecord, sort_by_count};

/// Exec statistics for every process sharing one name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProcessStat {
    pub name: String,
    /// Sum of exec counts over all pids with this name.
    pub total_count: u64,
    /// Number of distinct pids seen with this name.
    pub executions: u64,
    /// Ascending.
    pub pids: Vec<u32>,
}

/// Group process records by name, busiest name first.
pub fn aggregate_by_name(records: &[ProcessRecord]) -> Vec<ProcessStat> {
    let mut by_name: FxHashMap<&str, ProcessStat> = FxHashMap::default();
    for rec in records {
        let stat = by_name
            .entry(rec.comm.as_str())
            .or_insert_with(|| ProcessStat {
                name: rec.comm.clone(),
                total_count: 0,
                executions: 0,
                pids: Vec::new(),
            });
        stat.total_count += rec.count;
        stat.executions += 1;
        stat.pids.push(rec.pid);
    }

    let mut stats: Vec<ProcessStat> = by_name.into_values().collect();
    for stat in &mut stats {
        stat.pids.sort_unstable();
    }
    sort_by_count(&mut stats, |s| s.total_count, |s| s.name.clone());
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(pid: u32, comm: &str, count: u64) -> ProcessRecord {
        ProcessRecord {
            pid,
            comm: comm.to_string(),
            count,
        }
    }

    // ut_aggregate_groups_by_name
    #[test]
    fn ut_aggregate_groups_by_name() {
        let stats = aggregate_by_name(&[
            rec(30, "sh", 2),
            rec(10, "sh", 3),
            rec(20, "curl", 1),
        ]);
        assert_eq!(stats.len(), 2);
        assert_eq!(
            stats[0],
            ProcessStat {
                name: "sh".to_string(),
                total_count: 5,
                executions: 2,
                pids: vec![10, 30],
            }
        );
        assert_eq!(stats[1].name, "curl");
    }

    // ut_aggregate_empty
    #[test]
    fn ut_aggregate_empty() {
        assert!(aggregate_by_name(&[]).is_empty());
    }

    // ut_aggregate_sorted_descending
    #[test]
    fn ut_aggregate_sorted_descending() {
        let stats = aggregate_by_name(&[rec(1, "a", 1), rec(2, "b", 9), rec(3, "c", 4)]);
        let names: Vec<&str> = stats.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }
}
