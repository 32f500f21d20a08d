//! Fuzzy title/author similarity used to match imported rows to catalog songs.

use crate::crm_store::Song;

/// Calculate the Levenshtein (edit) distance between two strings.
/// Returns the minimum number of single-character edits (insertions,
/// deletions, or substitutions) required to change one string into the other.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    // Two rows instead of the full matrix
    let mut prev_row: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr_row: Vec<usize> = vec![0; b_chars.len() + 1];

    for (i, a_char) in a_chars.iter().enumerate() {
        curr_row[0] = i + 1;

        for (j, b_char) in b_chars.iter().enumerate() {
            let cost = usize::from(a_char != b_char);

            curr_row[j + 1] = (prev_row[j + 1] + 1) // deletion
                .min(curr_row[j] + 1) // insertion
                .min(prev_row[j] + cost); // substitution
        }

        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b_chars.len()]
}

/// Lowercases, turns every non-alphanumeric character into a space and
/// collapses runs of whitespace.
pub fn normalize(s: &str) -> String {
    let replaced: String = s
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized edit similarity in `[0, 1]`. Two strings that normalize to
/// nothing are considered identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(&a, &b) as f64 / max_len as f64
}

const TITLE_WEIGHT: f64 = 0.8;
const AUTHOR_WEIGHT: f64 = 0.2;

/// Scores a row against a catalog song. The author only contributes when
/// both sides have one.
pub fn score_song(title: &str, author: &str, song: &Song) -> f64 {
    let title_score = similarity(title, &song.title);
    if author.trim().is_empty() || song.author.trim().is_empty() {
        return title_score;
    }
    TITLE_WEIGHT * title_score + AUTHOR_WEIGHT * similarity(author, &song.author)
}

/// Index and score of the best scoring song. Ties keep the earliest song.
pub fn best_match(title: &str, author: &str, candidates: &[Song]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (index, song) in candidates.iter().enumerate() {
        let score = score_song(title, author, song);
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((index, score));
        }
    }
    best
}

pub fn round_score(score: f64) -> f64 {
    (score * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn song(title: &str, author: &str) -> Song {
        Song {
            id: format!("id-{}", title),
            title: title.to_string(),
            author: author.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", ""), 3);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("wonderwall", "wonderwal"), 1);
        assert_eq!(levenshtein_distance("żółw", "zolw"), 3);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Hey,   Jude! "), "hey jude");
        assert_eq!(normalize("Sweet Child O' Mine"), "sweet child o mine");
        assert_eq!(normalize("---"), "");
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("Wonderwall", "wonderwall"), 1.0);
        assert_eq!(similarity("", "!!"), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        let s = similarity("Wonderwal", "Wonderwall");
        assert!((s - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_author_only_counts_when_both_present() {
        let catalog = song("Wonderwall", "Oasis");
        assert_eq!(score_song("Wonderwall", "", &catalog), 1.0);
        let with_wrong_author = score_song("Wonderwall", "Blur", &catalog);
        assert!(with_wrong_author < 1.0);
        assert!(with_wrong_author >= 0.8);

        let unknown = song("Wonderwall", "  ");
        assert_eq!(score_song("Wonderwall", "Blur", &unknown), 1.0);
    }

    #[test]
    fn test_best_match_prefers_first_on_tie() {
        let candidates = vec![song("Hey Jude", "A"), song("Hey Jude", "B")];
        let (index, score) = best_match("hey jude", "", &candidates).unwrap();
        assert_eq!(index, 0);
        assert_eq!(score, 1.0);
        assert!(best_match("anything", "", &[]).is_none());
    }

    #[test]
    fn test_round_score() {
        assert_eq!(round_score(0.123456), 0.123);
        assert_eq!(round_score(0.8889), 0.889);
    }
}
