// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Grouping of queue rows into processing groups.
//!
//! A gap in event ids may be a transaction that has not committed yet, so
//! large polls are cut only between runs of contiguous ids.

use super::store::QueueRow;

/// Maximal run of contiguous event ids. Rows sharing an event id belong to
/// the same run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRun {
    rows: Vec<QueueRow>,
}

impl EventRun {
    fn new(row: QueueRow) -> Self {
        Self { rows: vec![row] }
    }

    fn accepts(&self, event_id: i64) -> bool {
        let last = self.last_event_id();
        event_id == last || event_id == last + 1
    }

    // runs are never empty
    fn first_event_id(&self) -> i64 {
        self.rows.first().map_or(0, |r| r.event_id)
    }

    fn last_event_id(&self) -> i64 {
        self.rows.last().map_or(0, |r| r.event_id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[QueueRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<QueueRow> {
        self.rows
    }
}

/// Split `rows` into runs of contiguous event ids, ordered by first id.
pub fn contiguous_runs(mut rows: Vec<QueueRow>) -> Vec<EventRun> {
    rows.sort_by_key(|r| r.event_id);

    let mut runs: Vec<EventRun> = Vec::new();
    for row in rows {
        match runs.last_mut() {
            Some(run) if run.accepts(row.event_id) => run.rows.push(row),
            _ => runs.push(EventRun::new(row)),
        }
    }
    runs
}

/// Plan the groups one poll processes, in order.
///
/// Fewer than `batch_size` rows form a single group. Otherwise whole runs
/// are accumulated and a group is closed once it holds more than
/// `batch_size` rows. With `max_batch_rows`, a group is also closed before
/// it would exceed the cap, and a single run longer than the cap is cut at
/// event-id boundaries.
pub fn plan_groups(
    mut rows: Vec<QueueRow>,
    batch_size: usize,
    max_batch_rows: Option<usize>,
) -> Vec<Vec<QueueRow>> {
    if rows.is_empty() {
        return Vec::new();
    }
    if rows.len() < batch_size {
        rows.sort_by_key(|r| r.event_id);
        return vec![rows];
    }

    let mut groups = Vec::new();
    let mut pending: Vec<QueueRow> = Vec::new();
    for run in contiguous_runs(rows) {
        if let Some(cap) = max_batch_rows {
            if !pending.is_empty() && pending.len() + run.len() > cap {
                groups.push(std::mem::take(&mut pending));
            }
            if run.len() > cap {
                log::debug!(
                    "[REPLICATION] run [{}-{}] of {} rows exceeds cap {}, splitting",
                    run.first_event_id(),
                    run.last_event_id(),
                    run.len(),
                    cap
                );
                groups.extend(split_run(run, cap));
                continue;
            }
        }

        pending.extend(run.into_rows());
        if pending.len() > batch_size {
            groups.push(std::mem::take(&mut pending));
        }
    }
    if !pending.is_empty() {
        groups.push(pending);
    }
    groups
}

// Chunks hold at least `cap` rows except the last; rows of one event id are
// never separated.
fn split_run(run: EventRun, cap: usize) -> Vec<Vec<QueueRow>> {
    let mut chunks = Vec::new();
    let mut chunk: Vec<QueueRow> = Vec::new();
    for row in run.into_rows() {
        let boundary = chunk.last().map_or(false, |last| last.event_id != row.event_id);
        if chunk.len() >= cap && boundary {
            chunks.push(std::mem::take(&mut chunk));
        }
        chunk.push(row);
    }
    if !chunk.is_empty() {
        chunks.push(chunk);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(ids: &[i64]) -> Vec<QueueRow> {
        ids.iter()
            .map(|&id| QueueRow::new(id, 1, "Order"))
            .collect()
    }

    fn ids(group: &[QueueRow]) -> Vec<i64> {
        group.iter().map(|r| r.event_id).collect()
    }

    #[test]
    fn test_runs_split_at_gaps() {
        let runs = contiguous_runs(rows(&[1, 2, 3, 5, 6, 7]));
        assert_eq!(runs.len(), 2);
        assert_eq!((runs[0].first_event_id(), runs[0].last_event_id()), (1, 3));
        assert_eq!((runs[1].first_event_id(), runs[1].last_event_id()), (5, 7));
    }

    #[test]
    fn test_runs_sorted_from_unordered_input() {
        let runs = contiguous_runs(rows(&[7, 1, 5, 3, 2, 6]));
        let bounds: Vec<_> = runs
            .iter()
            .map(|r| (r.first_event_id(), r.last_event_id()))
            .collect();
        assert_eq!(bounds, vec![(1, 3), (5, 7)]);
    }

    #[test]
    fn test_shared_event_id_stays_in_run() {
        let mut input = rows(&[4, 4, 5]);
        input[1].entity = "Trade".into();
        let runs = contiguous_runs(input);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].len(), 3);
    }

    #[test]
    fn test_small_poll_is_one_group() {
        let groups = plan_groups(rows(&[9, 1, 5]), 250, None);
        assert_eq!(groups.len(), 1);
        assert_eq!(ids(&groups[0]), vec![1, 5, 9]);
        assert!(plan_groups(Vec::new(), 250, None).is_empty());
    }

    #[test]
    fn test_threshold_never_splits_run() {
        // threshold crossed at the 5th row, but the run ends at the 6th
        let groups = plan_groups(rows(&[1, 2, 3, 4, 5, 6, 8, 9]), 4, None);
        assert_eq!(groups.len(), 2);
        assert_eq!(ids(&groups[0]), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(ids(&groups[1]), vec![8, 9]);
    }

    #[test]
    fn test_flush_at_each_run_boundary() {
        let groups = plan_groups(rows(&[1, 2, 3, 5, 6, 7]), 2, None);
        assert_eq!(groups.len(), 2);
        assert_eq!(ids(&groups[0]), vec![1, 2, 3]);
        assert_eq!(ids(&groups[1]), vec![5, 6, 7]);
    }

    #[test]
    fn test_runs_accumulate_below_threshold() {
        let groups = plan_groups(rows(&[1, 2, 3, 5, 6, 7]), 4, None);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 6);
    }

    #[test]
    fn test_cap_closes_group_before_overflow() {
        let groups = plan_groups(rows(&[1, 2, 3, 5, 6, 7]), 4, Some(5));
        assert_eq!(groups.len(), 2);
        assert_eq!(ids(&groups[0]), vec![1, 2, 3]);
        assert_eq!(ids(&groups[1]), vec![5, 6, 7]);
    }

    #[test]
    fn test_cap_splits_long_run_at_id_boundaries() {
        let groups = plan_groups(rows(&[1, 2, 3, 4, 5, 6, 7]), 2, Some(3));
        let sizes: Vec<_> = groups.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);

        let mut input = rows(&[1, 2, 3, 3, 3, 4]);
        input[3].entity = "Trade".into();
        input[4].entity = "Desk".into();
        let groups = plan_groups(input, 2, Some(2));
        assert_eq!(ids(&groups[0]), vec![1, 2]);
        assert_eq!(ids(&groups[1]), vec![3, 3, 3]);
        assert_eq!(ids(&groups[2]), vec![4]);
    }
}
