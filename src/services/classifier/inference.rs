use crate::error::AppError;
use crate::models::classify_types::Prediction;
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::Value;

const CROP_PCT: f32 = 0.875;

// ImageNet normalization constants
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resizes the shortest edge to `ceil(crop_size / 0.875)`, center-crops to
/// `crop_size` square and returns a normalized NCHW tensor.
pub fn preprocess_image(img: &DynamicImage, crop_size: u32) -> Result<Array4<f32>, AppError> {
    let (w, h) = (img.width(), img.height());
    if w == 0 || h == 0 {
        return Err(AppError::ImageDecode(format!("Image has no pixels ({}x{})", w, h)));
    }

    let resize_size = (crop_size as f32 / CROP_PCT).ceil() as u32;
    let (new_w, new_h) = if w < h {
        (resize_size, ((h as f32 / w as f32) * resize_size as f32).round() as u32)
    } else {
        (((w as f32 / h as f32) * resize_size as f32).round() as u32, resize_size)
    };
    let resized = img.resize_exact(new_w, new_h, image::imageops::FilterType::Triangle);

    let crop_x = (new_w.saturating_sub(crop_size)) / 2;
    let crop_y = (new_h.saturating_sub(crop_size)) / 2;
    let cropped = resized.crop_imm(crop_x, crop_y, crop_size, crop_size);
    let rgb = cropped.to_rgb8();

    // Pass 1: normalize pixels sequentially (reads and writes are contiguous).
    let raw = rgb.into_raw();
    let hw = (crop_size * crop_size) as usize;
    let mut interleaved = vec![0f32; 3 * hw];
    for (i, pixel) in raw.chunks_exact(3).enumerate() {
        let off = i * 3;
        for c in 0..3 {
            interleaved[off + c] = (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c];
        }
    }

    // Pass 2: transpose HWC -> CHW in tiles so source and the three
    // destination planes stay in L1.
    let mut data = vec![0f32; 3 * hw];
    const TILE: usize = 1024;
    for base in (0..hw).step_by(TILE) {
        let end = (base + TILE).min(hw);
        for i in base..end {
            let src = i * 3;
            data[i] = interleaved[src];
            data[hw + i] = interleaved[src + 1];
            data[2 * hw + i] = interleaved[src + 2];
        }
    }

    Array4::from_shape_vec((1, 3, crop_size as usize, crop_size as usize), data)
        .map_err(|e| AppError::Inference(format!("Failed to create tensor: {}", e)))
}

/// Softmax over raw logits, then the `top_k` best labels in descending order.
pub fn rank_logits(logits: &[f32], labels: &[String], top_k: usize) -> Vec<Prediction> {
    if logits.is_empty() {
        return Vec::new();
    }

    let max_logit = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exp_sum: f32 = logits.iter().map(|&x| (x - max_logit).exp()).sum();

    let mut indexed: Vec<(usize, f32)> = logits
        .iter()
        .map(|&x| (x - max_logit).exp() / exp_sum)
        .enumerate()
        .collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    indexed.truncate(top_k);

    indexed
        .into_iter()
        .map(|(idx, confidence)| {
            let identifier = labels
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("class_{}", idx));
            Prediction {
                identifier,
                confidence,
            }
        })
        .collect()
}

pub fn run_inference_with_model(
    model: &mut Session,
    input: Array4<f32>,
    labels: &[String],
    top_k: usize,
) -> Result<Vec<Prediction>, AppError> {
    let input_name = model
        .inputs()
        .first()
        .map(|input| input.name().to_string())
        .ok_or_else(|| AppError::Inference("Model declares no inputs".to_string()))?;

    let input_tensor = Value::from_array(input)
        .map_err(|e| AppError::Inference(format!("Failed to create tensor value: {}", e)))?;

    let outputs = model
        .run(ort::inputs![input_name.as_str() => input_tensor])
        .map_err(|e| AppError::Inference(format!("Inference failed: {}", e)))?;

    let output_value = outputs
        .values()
        .next()
        .ok_or_else(|| AppError::Inference("Model produced no outputs".to_string()))?;

    let (_, data) = output_value
        .try_extract_tensor::<f32>()
        .map_err(|e| AppError::Inference(format!("Failed to extract output tensor: {}", e)))?;

    Ok(rank_logits(data, labels, top_k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn preprocess_produces_nchw_crop() {
        let tensor = preprocess_image(&solid(640, 480, [255, 0, 0]), 224).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);

        let red = (1.0 - MEAN[0]) / STD[0];
        let green = (0.0 - MEAN[1]) / STD[1];
        assert!((tensor[[0, 0, 112, 112]] - red).abs() < 1e-4);
        assert!((tensor[[0, 1, 0, 0]] - green).abs() < 1e-4);
    }

    #[test]
    fn preprocess_center_crops_wide_images() {
        // Left and right thirds blue, middle third white: the crop keeps only white.
        let mut img = ImageBuffer::from_pixel(900, 300, Rgb([255u8, 255, 255]));
        for (x, _, pixel) in img.enumerate_pixels_mut() {
            if x < 300 || x >= 600 {
                *pixel = Rgb([0, 0, 255]);
            }
        }
        let tensor = preprocess_image(&DynamicImage::ImageRgb8(img), 224).unwrap();

        let white_red = (1.0 - MEAN[0]) / STD[0];
        for x in [20, 112, 200] {
            assert!((tensor[[0, 0, 112, x]] - white_red).abs() < 1e-3, "column {x}");
        }
    }

    #[test]
    fn preprocess_rejects_empty_images() {
        let empty = DynamicImage::new_rgb8(0, 0);
        assert!(matches!(
            preprocess_image(&empty, 224),
            Err(AppError::ImageDecode(_))
        ));
    }

    #[test]
    fn rank_applies_softmax_and_sorts() {
        let labels = vec!["tabby cat".to_string(), "Egyptian cat".to_string()];
        let preds = rank_logits(&[1.0, 3.0, 2.0], &labels, 5);

        assert_eq!(preds.len(), 3);
        assert_eq!(preds[0].identifier, "Egyptian cat");
        assert_eq!(preds[1].identifier, "class_2");
        assert_eq!(preds[2].identifier, "tabby cat");

        let total: f32 = preds.iter().map(|p| p.confidence).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(preds.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn rank_truncates_to_top_k() {
        let logits: Vec<f32> = (0..1000).map(|i| i as f32 / 100.0).collect();
        let preds = rank_logits(&logits, &[], 5);
        assert_eq!(preds.len(), 5);
        assert_eq!(preds[0].identifier, "class_999");
    }

    #[test]
    fn rank_of_nothing_is_empty() {
        assert!(rank_logits(&[], &[], 5).is_empty());
    }
}
