//! Backend-independent helpers for turning raw logits into tokens and spans.

/// Index of the largest logit. NaNs never win.
pub fn argmax(logits: &[f32]) -> Option<usize> {
    logits
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}

/// Softmax over the logits at `positions`, in the same order.
pub fn softmax_at(logits: &[f32], positions: &[usize]) -> Vec<f32> {
    let max = positions
        .iter()
        .map(|&p| logits[p])
        .fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = positions.iter().map(|&p| (logits[p] - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        return vec![0.0; positions.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}

/// A chosen answer span, in token positions (inclusive).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub score: f32,
}

/// Picks the most probable `start..=end` span among `candidates`.
///
/// `candidates` are the token positions belonging to the context, in
/// ascending order. A span may cover at most `max_len` tokens.
pub fn best_span(
    start_logits: &[f32],
    end_logits: &[f32],
    candidates: &[usize],
    max_len: usize,
) -> Option<Span> {
    if candidates.is_empty() || max_len == 0 {
        return None;
    }

    let start_probs = softmax_at(start_logits, candidates);
    let end_probs = softmax_at(end_logits, candidates);

    let mut best: Option<Span> = None;
    for (i, &start) in candidates.iter().enumerate() {
        for (j, &end) in candidates.iter().enumerate().skip(i) {
            if end - start + 1 > max_len {
                break;
            }
            let score = start_probs[i] * end_probs[j];
            if best.map_or(true, |b| score > b.score) {
                best = Some(Span { start, end, score });
            }
        }
    }
    best
}
