use std::path::Path;

use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};

use super::{ConvertError, ConvertRequest, Converter};

/// `image` クレートによる変換実装。デコード・リサイズはブロッキングスレッドで行う。
#[derive(Debug, Default, Clone)]
pub struct ImageConverter;

impl ImageConverter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Converter for ImageConverter {
    async fn convert(&self, request: &ConvertRequest) -> Result<(), ConvertError> {
        let request = request.clone();
        tokio::task::spawn_blocking(move || convert_blocking(&request))
            .await
            .map_err(|e| ConvertError::Task(e.to_string()))?
    }
}

/// 出力フォーマット名を `ImageFormat` に変換する
pub fn output_format(format: &str) -> Result<ImageFormat, ConvertError> {
    match format.to_ascii_lowercase().as_str() {
        "png" => Ok(ImageFormat::Png),
        "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
        "webp" => Ok(ImageFormat::WebP),
        other => Err(ConvertError::UnsupportedFormat(other.to_string())),
    }
}

fn convert_blocking(request: &ConvertRequest) -> Result<(), ConvertError> {
    if request.scale == 0 {
        return Err(ConvertError::InvalidScale(request.scale));
    }
    let format = output_format(&request.format)?;

    let (width, height) = read_dimensions(&request.original_path)?;
    let target = (
        width.saturating_mul(request.scale),
        height.saturating_mul(request.scale),
    );

    // ワーカーは拡張子に関係なく PNG を書くため、中身からフォーマットを判定する
    let upscaled = ImageReader::open(&request.upscaled_path)?
        .with_guessed_format()?
        .decode()
        .map_err(|source| ConvertError::Decode {
            path: request.upscaled_path.display().to_string(),
            source,
        })?;

    log::debug!(
        "Scaling {}x{} -> {}x{} ({:?})",
        upscaled.width(),
        upscaled.height(),
        target.0,
        target.1,
        format
    );

    let resized = if (upscaled.width(), upscaled.height()) == target {
        upscaled
    } else {
        upscaled.resize_exact(target.0, target.1, FilterType::Lanczos3)
    };

    let encoded = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(resized.to_rgb8()),
        ImageFormat::WebP => DynamicImage::ImageRgba8(resized.to_rgba8()),
        _ => resized,
    };

    encoded
        .save_with_format(&request.output_path, format)
        .map_err(|source| ConvertError::Encode {
            path: request.output_path.display().to_string(),
            source,
        })?;

    if request.upscaled_path != request.output_path {
        if let Err(e) = std::fs::remove_file(&request.upscaled_path) {
            log::warn!(
                "Failed to remove intermediate {}: {e}",
                request.upscaled_path.display()
            );
        }
    }

    Ok(())
}

fn read_dimensions(path: &Path) -> Result<(u32, u32), ConvertError> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .into_dimensions()
        .map_err(|source| ConvertError::Decode {
            path: path.display().to_string(),
            source,
        })
}
