use std::cmp::Reverse;

use crate::models::{LeaderboardEntry, RankAssignment};

/// Dense ranking over `(user_id, total_score)` pairs.
///
/// Highest total gets rank 1, equal totals share a rank and the next lower
/// total gets the following integer. Ties are ordered by ascending user id so
/// the returned order (and any top-N cut taken from it) is reproducible.
///
/// The result is in rank order.
pub fn compute_ranks(entries: &[(i64, i64)]) -> Vec<RankAssignment> {
    let mut sorted = entries.to_vec();
    sorted.sort_unstable_by_key(|&(user_id, total)| (Reverse(total), user_id));

    let mut ranks = Vec::with_capacity(sorted.len());
    let mut current_rank = 0u32;
    let mut previous_score: Option<i64> = None;

    for (user_id, total) in sorted {
        match previous_score {
            Some(prev) if total >= prev => {}
            _ => current_rank += 1,
        }

        ranks.push(RankAssignment { user_id, rank: current_rank });
        previous_score = Some(total);
    }

    ranks
}

/// Convenience wrapper for ranking persisted entries directly.
pub fn rank_entries(entries: &[LeaderboardEntry]) -> Vec<RankAssignment> {
    let totals: Vec<(i64, i64)> = entries
        .iter()
        .map(|e| (e.user_id, e.total_score))
        .collect();

    compute_ranks(&totals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank_of(ranks: &[RankAssignment], user_id: i64) -> u32 {
        ranks.iter().find(|r| r.user_id == user_id).unwrap().rank
    }

    #[test]
    fn test_empty_input_yields_no_ranks() {
        assert!(compute_ranks(&[]).is_empty());
    }

    #[test]
    fn test_distinct_scores_rank_one_to_n() {
        let ranks = compute_ranks(&[(1, 50), (2, 300), (3, 120), (4, -10)]);

        let order: Vec<i64> = ranks.iter().map(|r| r.user_id).collect();
        let values: Vec<u32> = ranks.iter().map(|r| r.rank).collect();

        assert_eq!(order, vec![2, 3, 1, 4]);
        assert_eq!(values, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_ties_share_rank_and_next_is_dense() {
        let ranks = compute_ranks(&[(1, 300), (2, 200), (3, 200), (4, 200), (5, 100)]);

        assert_eq!(rank_of(&ranks, 1), 1);
        assert_eq!(rank_of(&ranks, 2), 2);
        assert_eq!(rank_of(&ranks, 3), 2);
        assert_eq!(rank_of(&ranks, 4), 2);
        // dense: not 5
        assert_eq!(rank_of(&ranks, 5), 3);
    }

    #[test]
    fn test_tie_break_orders_lower_user_id_first() {
        let first = compute_ranks(&[(5, 10), (2, 10)]);
        let second = compute_ranks(&[(2, 10), (5, 10)]);

        assert_eq!(first, second);
        assert_eq!(first[0], RankAssignment { user_id: 2, rank: 1 });
        assert_eq!(first[1], RankAssignment { user_id: 5, rank: 1 });
    }

    #[test]
    fn test_all_equal_scores_share_rank_one() {
        let ranks = compute_ranks(&[(3, 0), (1, 0), (2, 0)]);

        assert!(ranks.iter().all(|r| r.rank == 1));
        let order: Vec<i64> = ranks.iter().map(|r| r.user_id).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_rank_entries_ignores_stale_ranks() {
        let entries = vec![
            LeaderboardEntry { user_id: 1, total_score: 100, rank: Some(1) },
            LeaderboardEntry { user_id: 2, total_score: 150, rank: Some(2) },
            LeaderboardEntry { user_id: 3, total_score: 5, rank: None },
        ];

        let ranks = rank_entries(&entries);

        assert_eq!(rank_of(&ranks, 2), 1);
        assert_eq!(rank_of(&ranks, 1), 2);
        assert_eq!(rank_of(&ranks, 3), 3);
    }
}
