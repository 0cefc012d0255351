//! Text recognition on uploaded images.
//!
//! The production reader shells out to the `tesseract` CLI, streaming the raw
//! upload on stdin and parsing its TSV report.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::debug;

use crate::matching::{BoundingBox, OcrDetection};

/// Word-level rows in tesseract's TSV output.
const WORD_LEVEL: &str = "5";

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("failed to run OCR engine: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("OCR engine exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("malformed OCR output: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait OcrReader: Send + Sync {
    async fn read_text(&self, image_data: &[u8]) -> Result<Vec<OcrDetection>, OcrError>;
}

pub struct TesseractReader {
    binary: String,
    language: String,
}

impl TesseractReader {
    pub fn new(binary: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            language: language.into(),
        }
    }
}

#[async_trait]
impl OcrReader for TesseractReader {
    async fn read_text(&self, image_data: &[u8]) -> Result<Vec<OcrDetection>, OcrError> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", self.language.as_str(), "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Write stdin from its own task while stdout is drained.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| OcrError::Malformed("stdin unavailable".into()))?;
        let input = image_data.to_vec();
        let writer = tokio::spawn(async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        });

        let output = child.wait_with_output().await?;
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(error = %err, "writing image to OCR engine failed"),
            Err(err) => debug!(error = %err, "OCR stdin writer task failed"),
        }

        if !output.status.success() {
            return Err(OcrError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let detections = parse_tsv(&String::from_utf8_lossy(&output.stdout))?;
        debug!(lines = detections.len(), "OCR finished");
        Ok(detections)
    }
}

/// Parses `tesseract ... tsv` output into one detection per text line.
///
/// Columns: level, page_num, block_num, par_num, line_num, word_num,
/// left, top, width, height, conf, text. Words of a line are joined with
/// spaces; the line's confidence is the mean word confidence and its box the
/// union of the word boxes.
pub fn parse_tsv(tsv: &str) -> Result<Vec<OcrDetection>, OcrError> {
    let mut lines = tsv.lines();
    match lines.next() {
        Some(header) if header.starts_with("level") => {}
        Some(other) => return Err(OcrError::Malformed(format!("unexpected header {other:?}"))),
        None => return Ok(Vec::new()),
    }

    let mut detections = Vec::new();
    let mut current: Option<(LineKey, Vec<OcrDetection>)> = None;

    for line in lines.filter(|l| !l.trim().is_empty()) {
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() < 11 {
            return Err(OcrError::Malformed(format!("short row {line:?}")));
        }
        if columns[0] != WORD_LEVEL {
            continue;
        }

        let text = columns.get(11).map(|t| t.trim()).unwrap_or_default();
        let conf: f32 = columns[10]
            .trim()
            .parse()
            .map_err(|_| OcrError::Malformed(format!("bad confidence in {line:?}")))?;
        if text.is_empty() || conf < 0.0 {
            continue;
        }

        let key = (columns[1], columns[2], columns[3], columns[4]);
        let word = OcrDetection {
            bbox: parse_bbox(&columns[6..10]),
            ..OcrDetection::new(text, (conf / 100.0).min(1.0))
        };

        match current.as_mut() {
            Some((current_key, words)) if *current_key == key => words.push(word),
            _ => {
                if let Some((_, words)) = current.replace((key, vec![word])) {
                    detections.push(join_words(words));
                }
            }
        }
    }
    if let Some((_, words)) = current {
        detections.push(join_words(words));
    }

    Ok(detections)
}

/// page, block, paragraph, line
type LineKey<'a> = (&'a str, &'a str, &'a str, &'a str);

fn join_words(words: Vec<OcrDetection>) -> OcrDetection {
    let text = words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let confidence = words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32;
    let bbox = words
        .iter()
        .map(|w| w.bbox)
        .reduce(|a, b| Some(union(a?, b?)))
        .flatten();

    OcrDetection {
        bbox,
        ..OcrDetection::new(text, confidence)
    }
}

fn union(a: BoundingBox, b: BoundingBox) -> BoundingBox {
    let left = a.left.min(b.left);
    let top = a.top.min(b.top);
    let right = a.left.saturating_add(a.width).max(b.left.saturating_add(b.width));
    let bottom = a.top.saturating_add(a.height).max(b.top.saturating_add(b.height));
    BoundingBox {
        left,
        top,
        width: right - left,
        height: bottom - top,
    }
}

fn parse_bbox(columns: &[&str]) -> Option<BoundingBox> {
    let mut values = columns.iter().map(|c| c.trim().parse::<u32>().ok());
    Some(BoundingBox {
        left: values.next()??,
        top: values.next()??,
        width: values.next()??,
        height: values.next()??,
    })
}
