//! Merges expanded chunk groups that overlap in time or share content, so the
//! prompt builder never sees two near-duplicate groups from the same moment.

use crate::types::ExpandedChunkGroup;

const TIMESTAMP_TOLERANCE_SECONDS: i64 = 1;
const JACCARD_THRESHOLD: f64 = 0.3;

/// Two groups overlap when they reference the same message, or when their
/// timestamp intervals intersect (within a 1s tolerance) and their word-level
/// Jaccard similarity exceeds the threshold.
fn overlaps(a: &ExpandedChunkGroup, b: &ExpandedChunkGroup) -> bool {
    if a.message_id == b.message_id {
        return true;
    }

    let (Some(a_ts), Some(b_ts)) = (a.earliest_timestamp(), b.earliest_timestamp()) else {
        return false;
    };

    let diff = (a_ts - b_ts).num_seconds().abs();
    if diff > TIMESTAMP_TOLERANCE_SECONDS {
        return false;
    }

    jaccard(&a.combined_text(), &b.combined_text()) > JACCARD_THRESHOLD
}

fn jaccard(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;

    let words_a: HashSet<String> = a.split_whitespace().map(|w| w.to_lowercase()).collect();
    let words_b: HashSet<String> = b.split_whitespace().map(|w| w.to_lowercase()).collect();

    if words_a.is_empty() && words_b.is_empty() {
        return 0.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Merge two overlapping groups into one, combining chunks (deduplicated by
/// `(message_id, chunk_index)`, re-sorted by `(created_at, chunk_index)`) and
/// keeping the earlier message id as the representative.
fn merge_pair(a: ExpandedChunkGroup, b: ExpandedChunkGroup) -> ExpandedChunkGroup {
    let (message_id, role) = if a.earliest_timestamp() <= b.earliest_timestamp() {
        (a.message_id.clone(), a.role)
    } else {
        (b.message_id.clone(), b.role)
    };

    let mut chunks = a.chunks;
    for c in b.chunks {
        if !chunks
            .iter()
            .any(|existing| existing.message_id == c.message_id && existing.chunk_index == c.chunk_index)
        {
            chunks.push(c);
        }
    }
    chunks.sort_by(|x, y| x.created_at.cmp(&y.created_at).then(x.chunk_index.cmp(&y.chunk_index)));

    ExpandedChunkGroup { message_id, role, chunks }
}

/// Partitions groups into connected components under `overlaps`, merging each
/// component into a single group. Order among merged groups follows earliest
/// timestamp ascending; groups with no timestamp sort last, in input order.
pub fn merge_groups(groups: Vec<ExpandedChunkGroup>) -> Vec<ExpandedChunkGroup> {
    if groups.len() <= 1 {
        return groups;
    }

    let n = groups.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], x: usize) -> usize {
        if parent[x] != x {
            parent[x] = find(parent, parent[x]);
        }
        parent[x]
    }

    fn union(parent: &mut [usize], a: usize, b: usize) {
        let ra = find(parent, a);
        let rb = find(parent, b);
        if ra != rb {
            parent[ra] = rb;
        }
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if overlaps(&groups[i], &groups[j]) {
                union(&mut parent, i, j);
            }
        }
    }

    let mut components: std::collections::HashMap<usize, Vec<usize>> = std::collections::HashMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        components.entry(root).or_default().push(i);
    }

    let mut groups: Vec<Option<ExpandedChunkGroup>> = groups.into_iter().map(Some).collect();
    let mut merged: Vec<ExpandedChunkGroup> = Vec::new();

    for (_, members) in components {
        let mut iter = members.into_iter();
        let first_idx = iter.next().expect("component is non-empty");
        let mut acc = groups[first_idx].take().expect("group taken exactly once");
        for idx in iter {
            let next = groups[idx].take().expect("group taken exactly once");
            acc = merge_pair(acc, next);
        }
        merged.push(acc);
    }

    merged.sort_by(|a, b| match (a.earliest_timestamp(), b.earliest_timestamp()) {
        (Some(ta), Some(tb)) => ta.cmp(&tb),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkEmbedding, Role};
    use chrono::{DateTime, Utc};

    fn group(message_id: &str, text: &str, ts: DateTime<Utc>) -> ExpandedChunkGroup {
        ExpandedChunkGroup {
            message_id: message_id.to_string(),
            role: Role::User,
            chunks: vec![ChunkEmbedding {
                id: 0,
                message_id: message_id.to_string(),
                session_id: "s1".into(),
                chunk_index: 0,
                chunk_text: text.to_string(),
                embedding_vector: vec![1.0],
                created_at: ts,
            }],
        }
    }

    #[test]
    fn no_overlap_keeps_groups_separate() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::hours(1);
        let groups = vec![
            group("m1", "the quick brown fox jumps", t0),
            group("m2", "completely unrelated discussion about weather", t1),
        ];
        let merged = merge_groups(groups);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn same_message_id_always_merges() {
        let t0 = Utc::now();
        let groups = vec![group("m1", "a", t0), group("m1", "b", t0)];
        let merged = merge_groups(groups);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].chunks.len(), 2);
    }

    #[test]
    fn close_timestamps_with_high_overlap_merge() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::milliseconds(500);
        let groups = vec![
            group("m1", "the project deadline is next friday afternoon", t0),
            group("m2", "the project deadline is next friday evening", t1),
        ];
        let merged = merge_groups(groups);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn distant_timestamps_never_merge_even_if_identical_text() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::hours(2);
        let groups = vec![
            group("m1", "identical duplicate text here", t0),
            group("m2", "identical duplicate text here", t1),
        ];
        let merged = merge_groups(groups);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn empty_and_singleton_inputs_are_passthrough() {
        assert!(merge_groups(Vec::new()).is_empty());
        let single = vec![group("m1", "only one", Utc::now())];
        assert_eq!(merge_groups(single).len(), 1);
    }
}
