use std::fs::File;
use std::io::Read;
use std::path::Path;

use image::{imageops::FilterType, DynamicImage};
use serde::{Deserialize, Serialize};
use tensorflow::{Graph, ImportGraphDefOptions, Session, SessionOptions, SessionRunArgs, Tensor};
use tracing::{debug, info};

const INPUT_OPERATION: &str = "x";
const OUTPUT_OPERATION: &str = "Identity";

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read model files: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid image: {0}")]
    Image(#[from] image::ImageError),
    #[error("tensorflow: {0}")]
    Tensorflow(#[from] tensorflow::Status),
    #[error("operation '{0}' not found in graph")]
    MissingOperation(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class: String,
    pub probability: f32,
}

/// Image classifier over a fixed label set.
pub trait Classifier: Send {
    fn labels(&self) -> &[String];

    /// Predictions sorted by descending probability (percent).
    fn predict(&self, image_data: &[u8]) -> Result<Vec<Prediction>, ModelError>;
}

pub struct Model {
    session: Session,
    graph: Graph,
    labels: Vec<String>,
    width: u32,
    height: u32,
}

impl Model {
    pub fn new(
        model_path: &Path,
        labels_path: &Path,
        (width, height): (u32, u32),
    ) -> Result<Self, ModelError> {
        let mut graph = Graph::new();
        let mut model_file = File::open(model_path)?;
        let mut model_bytes = Vec::new();
        model_file.read_to_end(&mut model_bytes)?;

        graph.import_graph_def(&model_bytes, &ImportGraphDefOptions::new())?;

        let session = Session::new(&SessionOptions::new(), &graph)?;

        let labels = read_labels(&std::fs::read_to_string(labels_path)?);
        info!(classes = labels.len(), width, height, "model loaded");

        Ok(Model {
            session,
            graph,
            labels,
            width,
            height,
        })
    }

    fn preprocess_image(&self, image_data: &[u8]) -> Result<Tensor<f32>, ModelError> {
        let img = image::load_from_memory(image_data)?;
        let values = normalize_pixels(&img, self.width, self.height);

        let mut tensor = Tensor::new(&[1, u64::from(self.height), u64::from(self.width), 3]);
        tensor.copy_from_slice(&values);

        Ok(tensor)
    }
}

impl Classifier for Model {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn predict(&self, image_data: &[u8]) -> Result<Vec<Prediction>, ModelError> {
        let input_tensor = self.preprocess_image(image_data)?;

        let mut args = SessionRunArgs::new();

        let input_operation = self
            .graph
            .operation_by_name(INPUT_OPERATION)?
            .ok_or(ModelError::MissingOperation(INPUT_OPERATION))?;

        let output_operation = self
            .graph
            .operation_by_name(OUTPUT_OPERATION)?
            .ok_or(ModelError::MissingOperation(OUTPUT_OPERATION))?;

        args.add_feed(&input_operation, 0, &input_tensor);
        let output_token = args.request_fetch(&output_operation, 0);
        self.session.run(&mut args)?;
        let output_tensor: Tensor<f32> = args.fetch(output_token)?;

        let predictions = rank_predictions(&output_tensor.to_vec(), &self.labels);
        debug!(top = ?predictions.first(), "classified image");
        Ok(predictions)
    }
}

/// One label per non-blank line.
pub fn read_labels(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Resizes to exactly `width x height`, drops alpha and scales channels to `[-1, 1]`.
/// Output is row-major HWC.
pub fn normalize_pixels(image: &DynamicImage, width: u32, height: u32) -> Vec<f32> {
    let resized = image
        .resize_exact(width, height, FilterType::CatmullRom)
        .to_rgb8();

    resized
        .pixels()
        .flat_map(|pixel| pixel.0)
        .map(|channel| f32::from(channel) / 127.5 - 1.0)
        .collect()
}

pub fn rank_predictions(probabilities: &[f32], labels: &[String]) -> Vec<Prediction> {
    let mut prediction_result: Vec<Prediction> = probabilities
        .iter()
        .enumerate()
        .filter(|(_, &prob)| (prob * 10000.0).round() > 0.0)
        .map(|(i, &prob)| {
            let percentage = (prob * 100.0 * 100.0).round() / 100.0;
            Prediction {
                class: labels
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| "Unknown".to_string()),
                probability: percentage,
            }
        })
        .collect();

    prediction_result.sort_by(|a, b| {
        b.probability
            .partial_cmp(&a.probability)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    prediction_result
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    use super::*;

    fn assert_close(actual: &[f32], expected: &[f32]) {
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 0.01, "{actual:?} != {expected:?}");
        }
    }

    fn labels() -> Vec<String> {
        read_labels("cumin\npaprika\n\n turmeric \n")
    }

    #[test]
    fn reads_labels_skipping_blank_lines() {
        assert_eq!(labels(), vec!["cumin", "paprika", "turmeric"]);
    }

    #[test]
    fn ranks_by_probability() {
        let ranked = rank_predictions(&[0.1, 0.85, 0.05], &labels());

        let classes: Vec<_> = ranked.iter().map(|p| p.class.as_str()).collect();
        assert_eq!(classes, vec!["paprika", "cumin", "turmeric"]);
        assert_eq!(ranked[0].probability, 85.0);
    }

    #[test]
    fn drops_negligible_probabilities() {
        let ranked = rank_predictions(&[0.99994, 0.00004, 0.00002], &labels());

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].class, "cumin");
    }

    #[test]
    fn unknown_class_index() {
        let ranked = rank_predictions(&[0.0, 0.0, 0.0, 1.0], &labels());

        assert_eq!(ranked[0].class, "Unknown");
    }

    #[test]
    fn normalizes_to_unit_range() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([0, 255, 0])));

        let values = normalize_pixels(&image, 2, 3);

        assert_eq!(values.len(), 2 * 3 * 3);
        for pixel in values.chunks(3) {
            assert_close(pixel, &[-1.0, 1.0, -1.0]);
        }
    }

    #[test]
    fn drops_alpha_channel() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 0])));

        let values = normalize_pixels(&image, 4, 4);

        assert_eq!(values.len(), 4 * 4 * 3);
        for pixel in values.chunks(3) {
            assert_close(pixel, &[1.0, 1.0, 1.0]);
        }
    }
}
