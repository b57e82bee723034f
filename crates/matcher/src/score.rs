//! Scoring primitives shared by stages 1 and 2 (§4.H).

use std::collections::HashSet;

/// Jaccard similarity between two token sets, plus a small bonus (capped at
/// 1.0) when the message preserves the keyword set's relative order.
#[must_use]
pub fn token_set_ratio(message_tokens: &[String], keyword_tokens: &HashSet<String>) -> f32 {
    if keyword_tokens.is_empty() {
        return 0.0;
    }
    let message_set: HashSet<&String> = message_tokens.iter().collect();
    let keyword_set: HashSet<&String> = keyword_tokens.iter().collect();
    let intersection = message_set.intersection(&keyword_set).count();
    let union = message_set.union(&keyword_set).count();
    if union == 0 {
        return 0.0;
    }
    let jaccard = intersection as f32 / union as f32;
    let bonus = if preserves_order(message_tokens, keyword_tokens) {
        0.05
    } else {
        0.0
    };
    (jaccard + bonus).min(1.0)
}

fn preserves_order(message_tokens: &[String], keyword_tokens: &HashSet<String>) -> bool {
    let mut last_index = None;
    for token in message_tokens {
        if !keyword_tokens.contains(token) {
            continue;
        }
        let position = message_tokens.iter().position(|t| t == token);
        if let (Some(last), Some(current)) = (last_index, position)
            && current < last
        {
            return false;
        }
        last_index = position;
    }
    true
}

#[must_use]
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 { 0.0 } else { intersection as f32 / union as f32 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_sets_score_one() {
        let tokens: HashSet<String> = ["hello".into(), "world".into()].into_iter().collect();
        let message = vec!["hello".to_string(), "world".to_string()];
        assert!(token_set_ratio(&message, &tokens) >= 0.99);
    }

    #[test]
    fn disjoint_sets_score_zero() {
        let tokens: HashSet<String> = ["hello".into()].into_iter().collect();
        let message = vec!["goodbye".to_string()];
        assert_eq!(token_set_ratio(&message, &tokens), 0.0);
    }

    #[test]
    fn jaccard_of_empty_sets_is_zero() {
        let empty = HashSet::new();
        assert_eq!(jaccard(&empty, &empty), 0.0);
    }
}
