//! Text similarity used to decide whether two OCR readings are the same line.
//!
//! The score is the indel ratio: `1 - d / (len_a + len_b)` where `d` is the
//! minimum number of single-character insertions and deletions turning one
//! string into the other. Equivalently `2 * lcs / (len_a + len_b)`.

/// Removes ASCII spaces. Recognizers disagree on word spacing far more often
/// than on the characters themselves.
pub fn strip_spaces(text: &str) -> String {
    text.chars().filter(|c| *c != ' ').collect()
}

/// Similarity in `[0, 1]`, symmetric, `1.0` for identical input (including two empty strings).
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let lcs = longest_common_subsequence(&a, &b);
    (2 * lcs) as f64 / total as f64
}

/// `ratio` after stripping spaces from both sides, compared inclusively against `threshold`.
pub fn is_similar(a: &str, b: &str, threshold: f64) -> bool {
    ratio(&strip_spaces(a), &strip_spaces(b)) >= threshold
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return 0;
    }
    let mut previous = vec![0usize; short.len() + 1];
    let mut current = vec![0usize; short.len() + 1];
    for &lc in long {
        for (j, &sc) in short.iter().enumerate() {
            current[j + 1] = if lc == sc {
                previous[j] + 1
            } else {
                current[j].max(previous[j + 1])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[short.len()]
}
