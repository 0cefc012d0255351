//! Reconciles OCR output with the classifier's label list.
//!
//! Every detection is compared against every label with a case-insensitive
//! Levenshtein distance. A detection longer than a label (in words) is scored
//! by its best run of adjacent words with the label's word count, so a line
//! like `GROUND BLACK PEPPER` still lines up with `black pepper`. A detection
//! is matched to its closest label only when the distance is within
//! `levenshtein_threshold` and the OCR confidence is at least `ocr_threshold`.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// A piece of text recognized in the image.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrDetection {
    pub text: String,
    /// Normalized to `0.0..=1.0`.
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
}

impl OcrDetection {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            bbox: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchThresholds {
    pub ocr_threshold: f32,
    pub levenshtein_threshold: usize,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            ocr_threshold: 0.5,
            levenshtein_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrMatch {
    pub text: String,
    pub confidence: f32,
    #[serde(rename = "match")]
    pub matched: Option<String>,
    /// Distance to the closest label, `None` when there are no labels.
    pub distance: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

pub fn edit_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let m = a_chars.len();
    let n = b_chars.len();

    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for (i, &a_ch) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &b_ch) in b_chars.iter().enumerate() {
            let cost = usize::from(a_ch != b_ch);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

fn normalized_words(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Distance from `label` to the closest run of `words` with as many words as the label.
fn label_distance(words: &[String], label: &str) -> usize {
    let label_words = normalized_words(label);
    let label = label_words.join(" ");
    let span = label_words.len().max(1);

    if words.len() <= span {
        return edit_distance(&words.join(" "), &label);
    }
    words
        .windows(span)
        .map(|window| edit_distance(&window.join(" "), &label))
        .min()
        .unwrap_or(usize::MAX)
}

/// Closest label by edit distance. Ties keep the earliest label.
fn closest_label<'a>(words: &[String], labels: &'a [String]) -> Option<(&'a String, usize)> {
    let mut best: Option<(&String, usize)> = None;
    for label in labels.iter().filter(|label| !label.trim().is_empty()) {
        let distance = label_distance(words, label);
        match best {
            Some((_, best_distance)) if best_distance <= distance => {}
            _ => best = Some((label, distance)),
        }
    }
    best
}

pub fn get_ocr_matches(
    detections: &[OcrDetection],
    labels: &[String],
    thresholds: &MatchThresholds,
) -> Vec<OcrMatch> {
    detections
        .iter()
        .filter_map(|detection| {
            let text = detection.text.trim();
            if text.is_empty() {
                return None;
            }

            let closest = closest_label(&normalized_words(text), labels);
            let confident = detection.confidence >= thresholds.ocr_threshold;
            let matched = closest
                .filter(|(_, distance)| confident && *distance <= thresholds.levenshtein_threshold)
                .map(|(label, _)| label.clone());

            Some(OcrMatch {
                text: text.to_string(),
                confidence: detection.confidence,
                matched,
                distance: closest.map(|(_, distance)| distance),
                bbox: detection.bbox,
            })
        })
        .collect()
}

/// Whether any matched OCR row agrees with `label`.
pub fn confirms(matches: &[OcrMatch], label: &str) -> bool {
    let label = label.to_lowercase();
    matches.iter().any(|m| {
        m.matched
            .as_deref()
            .is_some_and(|matched| matched.to_lowercase() == label)
    })
}
