//! Output decoding and non-max suppression.
//!
//! The model emits a channel-major tensor: every center-x, then every center-y,
//! then widths, heights, and one score channel per class, each channel
//! `num_predictions` long. Indexing is `output[channel * num_predictions + i]`.

use crate::detect::config::ModelConfig;
use crate::detect::error::DetectorError;
use crate::detect::letterbox::LetterboxParams;
use crate::detect::result::{BoundingBox, Detection};

/// Box parameters ahead of the class scores.
pub const BOX_CHANNELS: usize = 4;

/// Prediction slots across the stride-8, stride-16 and stride-32 heads.
pub fn prediction_count(width: u32, height: u32) -> usize {
    [8, 16, 32]
        .iter()
        .map(|stride| (width / stride) as usize * (height / stride) as usize)
        .sum()
}

/// Expected shape of the raw output for a given configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputLayout {
    pub num_predictions: usize,
    pub num_classes: usize,
    pub single_class: bool,
}

impl OutputLayout {
    pub fn for_config(config: &ModelConfig) -> Self {
        Self {
            num_predictions: prediction_count(config.input_width, config.input_height),
            num_classes: config.class_count(),
            single_class: config.single_class,
        }
    }

    /// Channels per prediction: box parameters plus class scores.
    pub fn channels(&self) -> usize {
        BOX_CHANNELS + self.num_classes
    }

    pub fn expected_len(&self) -> usize {
        self.channels() * self.num_predictions
    }

    /// Reject outputs that cannot be indexed with this layout.
    pub fn check(&self, shape: &[usize], output: &[f32]) -> Result<(), DetectorError> {
        if shape.is_empty() {
            return Err(DetectorError::MalformedOutput("output shape is empty".into()));
        }
        let declared: usize = shape.iter().product();
        if declared == 0 || output.is_empty() {
            return Err(DetectorError::MalformedOutput(format!(
                "output tensor has zero size (shape {:?})",
                shape
            )));
        }
        if declared != output.len() {
            return Err(DetectorError::MalformedOutput(format!(
                "shape {:?} declares {} values, buffer holds {}",
                shape,
                declared,
                output.len()
            )));
        }
        if output.len() != self.expected_len() {
            return Err(DetectorError::MalformedOutput(format!(
                "expected {} values ({} channels x {} predictions), got {}",
                self.expected_len(),
                self.channels(),
                self.num_predictions,
                output.len()
            )));
        }
        Ok(())
    }
}

/// Turn the raw tensor into detections in original-image coordinates,
/// dropping anything below `confidence_threshold`.
pub fn decode_predictions(
    output: &[f32],
    layout: &OutputLayout,
    letterbox: &LetterboxParams,
    confidence_threshold: f32,
) -> Vec<Detection> {
    let n = layout.num_predictions;
    let mut detections = Vec::new();

    for i in 0..n {
        let (confidence, class_id) = if layout.single_class {
            (output[BOX_CHANNELS * n + i], 0)
        } else {
            let mut best = (0.0f32, 0u32);
            for c in 0..layout.num_classes {
                let score = output[(BOX_CHANNELS + c) * n + i];
                if score > best.0 {
                    best = (score, c as u32);
                }
            }
            best
        };

        if confidence.is_nan() || confidence < confidence_threshold {
            continue;
        }

        let cx = output[i];
        let cy = output[n + i];
        let w = output[2 * n + i];
        let h = output[3 * n + i];
        detections.push(Detection {
            bbox: letterbox.box_to_original(cx, cy, w, h),
            confidence,
            class_id,
        });
    }

    detections
}

/// Intersection over union. Degenerate unions yield 0.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let intersection = a.intersection_area(b);
    let union = a.area() + b.area() - intersection;
    if union <= f32::EPSILON {
        return 0.0;
    }
    (intersection / union).clamp(0.0, 1.0)
}

/// Greedy per-class suppression, highest confidence first.
///
/// A detection survives only if its IoU with every kept detection of the same
/// class is at most `iou_threshold`. Different classes never suppress each
/// other.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.len() < 2 {
        return detections;
    }
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len().min(64));
    for candidate in detections {
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, size: f32, confidence: f32, class_id: u32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x, y, size, size),
            confidence,
            class_id,
        }
    }

    fn identity() -> LetterboxParams {
        LetterboxParams::compute(64, 64, 64, 64)
    }

    #[test]
    fn prediction_count_matches_three_strides() {
        assert_eq!(prediction_count(640, 640), 8400);
        assert_eq!(prediction_count(1024, 1024), 21504);
        assert_eq!(prediction_count(64, 64), 64 + 16 + 4);
    }

    #[test]
    fn iou_identities() {
        let a = BoundingBox::new(10.0, 10.0, 20.0, 20.0);
        let b = BoundingBox::new(20.0, 15.0, 20.0, 10.0);
        let far = BoundingBox::new(100.0, 100.0, 5.0, 5.0);

        assert_eq!(iou(&a, &a), 1.0);
        assert_eq!(iou(&a, &far), 0.0);
        assert_eq!(iou(&a, &b), iou(&b, &a));
    }

    #[test]
    fn iou_of_degenerate_boxes_is_zero() {
        let point = BoundingBox::new(5.0, 5.0, 0.0, 0.0);
        let value = iou(&point, &point);
        assert_eq!(value, 0.0);
        assert!(!value.is_nan());
    }

    #[test]
    fn nms_keeps_highest_confidence_of_overlapping_pair() {
        let kept = non_max_suppression(
            vec![det(0.0, 0.0, 10.0, 0.6, 0), det(1.0, 1.0, 10.0, 0.9, 0)],
            0.4,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn nms_never_suppresses_across_classes() {
        let kept = non_max_suppression(
            vec![det(0.0, 0.0, 10.0, 0.9, 0), det(0.0, 0.0, 10.0, 0.8, 1)],
            0.4,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn nms_output_has_no_same_class_overlap_above_threshold() {
        let mut input = Vec::new();
        for i in 0..40 {
            let offset = (i % 10) as f32 * 3.0;
            input.push(det(offset, offset, 12.0, 0.5 + i as f32 * 0.01, (i % 2) as u32));
        }
        let kept = non_max_suppression(input, 0.45);
        for (i, a) in kept.iter().enumerate() {
            for b in kept.iter().skip(i + 1) {
                if a.class_id == b.class_id {
                    assert!(iou(&a.bbox, &b.bbox) <= 0.45);
                }
            }
        }
        assert!(kept.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn single_class_decode_filters_by_threshold() {
        let layout = OutputLayout {
            num_predictions: 3,
            num_classes: 1,
            single_class: true,
        };
        #[rustfmt::skip]
        let output = vec![
            10.0, 20.0, 30.0, // cx
            10.0, 20.0, 30.0, // cy
            4.0, 4.0, 4.0,    // w
            4.0, 4.0, 4.0,    // h
            0.9, 0.2, 0.5,    // confidence
        ];
        let dets = decode_predictions(&output, &layout, &identity(), 0.5);
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].bbox, BoundingBox::new(8.0, 8.0, 4.0, 4.0));
        assert_eq!(dets[1].confidence, 0.5);
        assert!(dets.iter().all(|d| d.class_id == 0));
    }

    #[test]
    fn nan_scores_never_pass_the_threshold() {
        let layout = OutputLayout {
            num_predictions: 2,
            num_classes: 1,
            single_class: true,
        };
        #[rustfmt::skip]
        let output = vec![
            10.0, 20.0,
            10.0, 20.0,
            4.0, 4.0,
            4.0, 4.0,
            f32::NAN, 0.7,
        ];
        let dets = decode_predictions(&output, &layout, &identity(), 0.5);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].confidence, 0.7);
        assert!(decode_predictions(&output, &layout, &identity(), 0.0)
            .iter()
            .all(|d| !d.confidence.is_nan()));
    }

    #[test]
    fn multi_class_decode_uses_argmax() {
        let layout = OutputLayout {
            num_predictions: 2,
            num_classes: 3,
            single_class: false,
        };
        #[rustfmt::skip]
        let output = vec![
            5.0, 15.0,
            5.0, 15.0,
            2.0, 2.0,
            2.0, 2.0,
            0.1, 0.3, // class 0
            0.7, 0.2, // class 1
            0.2, 0.1, // class 2
        ];
        let dets = decode_predictions(&output, &layout, &identity(), 0.25);
        assert_eq!(dets.len(), 2);
        assert_eq!((dets[0].class_id, dets[0].confidence), (1, 0.7));
        assert_eq!((dets[1].class_id, dets[1].confidence), (0, 0.3));
    }

    #[test]
    fn decode_maps_back_through_letterbox() {
        let letterbox = LetterboxParams::compute(1280, 720, 640, 640);
        let layout = OutputLayout {
            num_predictions: 1,
            num_classes: 1,
            single_class: true,
        };
        let (mx, my) = letterbox.to_model(900.0, 300.0);
        let output = vec![mx, my, 10.0, 10.0, 0.8];
        let dets = decode_predictions(&output, &layout, &letterbox, 0.5);
        let (cx, cy) = dets[0].bbox.center();
        assert!((cx - 900.0).abs() < 1e-3);
        assert!((cy - 300.0).abs() < 1e-3);
        assert!((dets[0].bbox.width - 20.0).abs() < 1e-4);
    }

    #[test]
    fn layout_check_rejects_mismatched_outputs() {
        let layout = OutputLayout {
            num_predictions: 4,
            num_classes: 1,
            single_class: true,
        };
        assert!(layout.check(&[1, 5, 4], &[0.0; 20]).is_ok());
        assert!(layout.check(&[], &[0.0; 20]).is_err());
        assert!(layout.check(&[1, 5, 0], &[]).is_err());
        assert!(layout.check(&[1, 5, 3], &[0.0; 20]).is_err());
        assert!(layout.check(&[1, 84, 4], &[0.0; 336]).is_err());
    }
}
