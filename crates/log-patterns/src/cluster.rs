//! TF-IDF Vectorization and Density Clustering

use std::collections::HashMap;

/// Vocabulary cap for the TF-IDF projection
pub(crate) const MAX_TERMS: usize = 100;

/// Lowercased unigram + bigram terms of a message.
///
/// Purely numeric tokens are dropped so request ids and counters do not
/// pull otherwise identical messages apart.
pub(crate) fn tokenize(message: &str) -> Vec<String> {
    let lower = message.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 2 && !w.chars().all(|c| c.is_ascii_digit()))
        .collect();

    let mut terms: Vec<String> = words.iter().map(|w| w.to_string()).collect();
    for pair in words.windows(2) {
        terms.push(format!("{} {}", pair[0], pair[1]));
    }
    terms
}

/// Project tokenized documents onto the top terms by document frequency.
/// Returns the vocabulary and one L2-normalized TF-IDF vector per doc.
pub(crate) fn vectorize(docs: &[Vec<String>]) -> (Vec<String>, Vec<Vec<f64>>) {
    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for doc in docs {
        let mut seen: Vec<&str> = doc.iter().map(String::as_str).collect();
        seen.sort_unstable();
        seen.dedup();
        for term in seen {
            *doc_freq.entry(term).or_insert(0) += 1;
        }
    }

    // Deterministic vocabulary: by descending document frequency, then
    // alphabetically.
    let mut ranked: Vec<(&str, usize)> = doc_freq.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(MAX_TERMS);

    let vocab: Vec<String> = ranked.iter().map(|(t, _)| t.to_string()).collect();
    let index: HashMap<&str, usize> = vocab
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_str(), i))
        .collect();
    let n_docs = docs.len() as f64;

    let vectors = docs
        .iter()
        .map(|doc| {
            let mut vector = vec![0.0; vocab.len()];
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for term in doc {
                *counts.entry(term.as_str()).or_insert(0) += 1;
            }
            for (term, count) in counts {
                if let Some(&i) = index.get(term) {
                    let df = ranked[i].1 as f64;
                    let idf = ((1.0 + n_docs) / (1.0 + df)).ln() + 1.0;
                    vector[i] = count as f64 * idf;
                }
            }
            let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                for v in &mut vector {
                    *v /= norm;
                }
            }
            vector
        })
        .collect();

    (vocab, vectors)
}

/// Cosine distance between L2-normalized vectors
pub(crate) fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    (1.0 - dot).max(0.0)
}

/// DBSCAN over normalized vectors. Returns one cluster assignment per
/// input; `None` marks noise.
pub(crate) fn dbscan(vectors: &[Vec<f64>], eps: f64, min_pts: usize) -> Vec<Option<usize>> {
    let n = vectors.len();
    let mut assignment: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut next_cluster = 0;

    let neighbors = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| cosine_distance(&vectors[i], &vectors[j]) <= eps)
            .collect()
    };

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let seed = neighbors(i);
        if seed.len() < min_pts {
            continue; // noise unless claimed by a later cluster expansion
        }

        let cluster = next_cluster;
        next_cluster += 1;
        assignment[i] = Some(cluster);

        let mut queue = seed;
        while let Some(j) = queue.pop() {
            if assignment[j].is_none() {
                assignment[j] = Some(cluster);
            }
            if visited[j] {
                continue;
            }
            visited[j] = true;

            let expansion = neighbors(j);
            if expansion.len() >= min_pts {
                queue.extend(expansion);
            }
        }
    }

    assignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_drops_numbers_and_short_tokens() {
        let terms = tokenize("Request 12345 to /api failed: x");
        assert!(terms.contains(&"request".to_string()));
        assert!(terms.contains(&"failed".to_string()));
        assert!(!terms.iter().any(|t| t == "12345"));
        assert!(!terms.iter().any(|t| t == "x"));
    }

    #[test]
    fn test_tokenize_emits_bigrams() {
        let terms = tokenize("connection refused upstream");
        assert!(terms.contains(&"connection refused".to_string()));
        assert!(terms.contains(&"refused upstream".to_string()));
    }

    #[test]
    fn test_vectors_are_normalized() {
        let docs: Vec<Vec<String>> = vec![
            tokenize("database connection lost"),
            tokenize("database connection restored"),
        ];
        let (_, vectors) = vectorize(&docs);
        for vector in &vectors {
            let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_dbscan_groups_similar_messages() {
        let mut docs: Vec<Vec<String>> = Vec::new();
        for i in 0..4 {
            docs.push(tokenize(&format!(
                "payment provider declined transaction attempt {}",
                i
            )));
        }
        for i in 0..4 {
            docs.push(tokenize(&format!("cache shard {} evicted under pressure", i)));
        }
        docs.push(tokenize("totally unrelated single message"));

        let (_, vectors) = vectorize(&docs);
        let assignment = dbscan(&vectors, 0.4, 3);

        assert_eq!(assignment[0], assignment[1]);
        assert_eq!(assignment[0], assignment[3]);
        assert_eq!(assignment[4], assignment[7]);
        assert_ne!(assignment[0], assignment[4]);
        assert_eq!(assignment[8], None);
        assert!(assignment[0].is_some());
        assert!(assignment[4].is_some());
    }

    #[test]
    fn test_dbscan_all_noise_when_dissimilar() {
        let docs: Vec<Vec<String>> = vec![
            tokenize("alpha beta gamma"),
            tokenize("delta epsilon zeta"),
            tokenize("eta theta iota"),
        ];
        let (_, vectors) = vectorize(&docs);
        let assignment = dbscan(&vectors, 0.3, 2);
        assert!(assignment.iter().all(Option::is_none));
    }
}
