//! Remote path spellings tried when fetching cached content.
//!
//! Paths recorded in metadata do not always match what the backend stores:
//! some writers percent-encoded segments, some stored decomposed Unicode.

use unicode_normalization::UnicodeNormalization;

/// Spellings of `path` in fetch order: as recorded, percent-decoded,
/// re-encoded per segment, NFC-normalized. Duplicates are dropped.
pub fn path_variants(path: &str) -> Vec<String> {
    let mut variants: Vec<String> = Vec::with_capacity(4);
    let mut push = |candidate: String| {
        if !candidate.is_empty() && !variants.contains(&candidate) {
            variants.push(candidate);
        }
    };

    push(path.to_string());

    let decoded = urlencoding::decode(path)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| path.to_string());
    push(decoded.clone());

    let reencoded = decoded
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    push(reencoded);

    push(decoded.nfc().collect());

    variants
}

/// Variants of every candidate path, primary path first.
pub fn fetch_candidates(repo_path: &str, preview_repo_path: Option<&str>) -> Vec<String> {
    let mut candidates = path_variants(repo_path);
    if let Some(preview) = preview_repo_path {
        for variant in path_variants(preview) {
            if !candidates.contains(&variant) {
                candidates.push(variant);
            }
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path_has_single_variant() {
        assert_eq!(path_variants("images/Trip/a.jpg"), vec!["images/Trip/a.jpg"]);
    }

    #[test]
    fn test_encoded_path_variants() {
        let variants = path_variants("images/My%20Trip/a.jpg");
        assert_eq!(
            variants,
            vec!["images/My%20Trip/a.jpg", "images/My Trip/a.jpg"]
        );
    }

    #[test]
    fn test_decomposed_unicode_gets_nfc_variant() {
        let decomposed = "images/Cafe\u{301}/a.jpg";
        let variants = path_variants(decomposed);

        assert_eq!(
            variants,
            vec![
                decomposed.to_string(),
                "images/Cafe%CC%81/a.jpg".to_string(),
                "images/Caf\u{e9}/a.jpg".to_string(),
            ]
        );
    }

    #[test]
    fn test_candidates_fall_back_to_preview_path() {
        let candidates = fetch_candidates("images/a.jpg", Some("previews/a.jpg"));
        assert_eq!(candidates, vec!["images/a.jpg", "previews/a.jpg"]);
    }
}
