use std::collections::HashMap;

/// Canonical short form of a tile label: lowercase, cut at the first `,` `;` `/`,
/// first whitespace-separated word only, alphanumerics only.
pub fn normalize_label(label: &str) -> String {
    let s = label.trim().to_lowercase();
    let head = s
        .split(',')
        .next()
        .and_then(|p| p.split(';').next())
        .and_then(|p| p.split('/').next())
        .unwrap_or("");
    let word = head.split_whitespace().next().unwrap_or("");
    word.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Fuzzy label equivalence: equal, mutual containment (both ≥ 3 chars), or a
/// gestalt similarity ratio of at least 0.8. Empty labels never match.
pub fn labels_similar(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    if a.chars().count() >= 3 && b.chars().count() >= 3 && (a.contains(b) || b.contains(a)) {
        return true;
    }
    similarity_ratio(a, b) >= 0.8
}

/// Ratcliff/Obershelp ratio `2·M / (|a| + |b|)` over characters.
///
/// The longest-match recursion breaks ties by position, which makes the raw
/// algorithm order dependent; the pair is ordered first so the ratio is symmetric.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let a: Vec<char> = first.chars().collect();
    let b: Vec<char> = second.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, c) in b.iter().enumerate() {
        b2j.entry(*c).or_default().push(j);
    }

    let mut matched = 0;
    let mut queue = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, k) = longest_match(a, &b2j, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            queue.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]`, earliest in `a` on ties.
fn longest_match(
    a: &[char],
    b2j: &HashMap<char, Vec<usize>>,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0);
    // run length of the match ending at b[j], for the previous row of a
    let mut j2len: HashMap<usize, usize> = HashMap::new();
    for (i, c) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b2j.get(c) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = j.checked_sub(1).and_then(|p| j2len.get(&p)).copied().unwrap_or(0) + 1;
                next.insert(j, k);
                if k > best_k {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_k = k;
                }
            }
        }
        j2len = next;
    }
    (best_i, best_j, best_k)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "",
        "   ",
        "Sparrow, small bird",
        "  Кот/кошка",
        "t-shirt; clothing",
        "BIRD HOUSE",
        "Ёлка!!",
        "İstanbul",
        "42 cats",
        "a/b,c;d",
        "🐦 bird",
        "ǅemal",
    ];

    #[test]
    fn normalize_examples() {
        assert_eq!(normalize_label("Sparrow, small bird"), "sparrow");
        assert_eq!(normalize_label("  Кот/кошка"), "кот");
        assert_eq!(normalize_label("t-shirt; clothing"), "tshirt");
        assert_eq!(normalize_label("BIRD HOUSE"), "bird");
        assert_eq!(normalize_label(""), "");
        assert_eq!(normalize_label("🐦 bird"), "");
    }

    #[test]
    fn normalize_is_idempotent_and_clean() {
        for s in SAMPLES {
            let once = normalize_label(s);
            assert_eq!(normalize_label(&once), once, "not idempotent for {s:?}");
            assert!(once.chars().all(|c| c.is_alphanumeric()), "{once:?}");
            assert_eq!(once.to_lowercase(), once, "{once:?}");
        }
    }

    #[test]
    fn similarity_branches() {
        assert!(labels_similar("bird", "bird"));
        assert!(labels_similar("sparrow", "sparrows"));
        assert!(!labels_similar("воробей", "воробьи"));
        assert!(labels_similar("pigeon", "pidgeon"));
        assert!(labels_similar("ox", "box"));
        assert!(!labels_similar("ox", "oxygen"));
        assert!(!labels_similar("cat", "dog"));
        assert!(!labels_similar("", ""));
        assert!(!labels_similar("bird", ""));
    }

    #[test]
    fn ratio_matches_gestalt_definition() {
        assert!((similarity_ratio("abcd", "bcde") - 0.75).abs() < 1e-9);
        assert_eq!(similarity_ratio("abc", "abc"), 1.0);
        assert_eq!(similarity_ratio("abc", "xyz"), 0.0);
        assert_eq!(similarity_ratio("", ""), 1.0);
    }

    #[test]
    fn similarity_is_symmetric() {
        let words = [
            "abcab", "bcabc", "sparrow", "parrot", "aab", "aba", "кот", "котёнок", "tit", "titmouse",
            "ab", "ba", "mouse", "house",
        ];
        for a in words {
            for b in words {
                assert_eq!(labels_similar(a, b), labels_similar(b, a), "{a} / {b}");
                assert_eq!(similarity_ratio(a, b), similarity_ratio(b, a), "{a} / {b}");
            }
        }
    }
}
