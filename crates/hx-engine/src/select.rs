use hx_config::SelectionStrategy;

use crate::types::MatchedRule;

/// Narrow raw matches per the model's selection strategy. Purely a
/// post-filter: earlier stages never prune on it. Input order (ascending
/// combination id) is preserved.
pub(crate) fn apply(strategy: SelectionStrategy, matches: &mut Vec<MatchedRule>) {
    match strategy {
        SelectionStrategy::AllMatches => {}
        SelectionStrategy::FirstMatch => matches.truncate(1),
        SelectionStrategy::HighestPriority => {
            if let Some(max) = matches.iter().map(|m| m.priority).max() {
                matches.retain(|m| m.priority == max);
            }
        }
    }
}
