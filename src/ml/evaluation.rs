use crate::ml::models::{ConfusionMatrix, ModelMetrics};

/// Held-out metrics for a binary classifier.
///
/// `predicted` are hard labels, `scores` the positive-class probabilities
/// used for ROC-AUC. Undefined ratios (no predicted positives, no actual
/// positives) are reported as 0.0.
pub fn evaluate(actual: &[usize], predicted: &[usize], scores: &[f64]) -> ModelMetrics {
    let confusion_matrix = confusion_matrix(actual, predicted);
    let tp = confusion_matrix.true_positives as f64;
    let fp = confusion_matrix.false_positives as f64;
    let fn_ = confusion_matrix.false_negatives as f64;
    let tn = confusion_matrix.true_negatives as f64;

    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1_score = ratio(2.0 * precision * recall, precision + recall);
    let accuracy = ratio(tp + tn, confusion_matrix.total() as f64);

    ModelMetrics {
        precision,
        recall,
        f1_score,
        roc_auc: roc_auc(actual, scores),
        accuracy,
        confusion_matrix,
    }
}

pub fn confusion_matrix(actual: &[usize], predicted: &[usize]) -> ConfusionMatrix {
    let mut matrix = ConfusionMatrix::default();
    for (&a, &p) in actual.iter().zip(predicted) {
        match (a == 1, p == 1) {
            (false, false) => matrix.true_negatives += 1,
            (false, true) => matrix.false_positives += 1,
            (true, false) => matrix.false_negatives += 1,
            (true, true) => matrix.true_positives += 1,
        }
    }
    matrix
}

/// Rank-based (Mann-Whitney) ROC-AUC with average ranks for ties.
///
/// Returns 0.5 when only one class is present.
pub fn roc_auc(actual: &[usize], scores: &[f64]) -> f64 {
    let n = actual.len().min(scores.len());
    let positives = actual[..n].iter().filter(|&&a| a == 1).count();
    let negatives = n - positives;
    if positives == 0 || negatives == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; n];
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based; tied block shares the mean rank
        let mean_rank = (start + end + 1) as f64 / 2.0;
        for &i in &order[start..end] {
            ranks[i] = mean_rank;
        }
        start = end;
    }

    let positive_rank_sum: f64 = (0..n).filter(|&i| actual[i] == 1).map(|i| ranks[i]).sum();
    let p = positives as f64;
    (positive_rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64)
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}
