mod image_converter;

pub use image_converter::{output_format, ImageConverter};

use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::error::AppError;

/// 変換・リサイズの要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertRequest {
    /// 元画像（アップスケール前）。目標サイズの基準
    pub original_path: PathBuf,
    /// ワーカーが書き出した画像
    pub upscaled_path: PathBuf,
    /// 最終出力パス
    pub output_path: PathBuf,
    /// 要求倍率
    pub scale: u32,
    /// 出力フォーマット（png / jpg / jpeg / webp）
    pub format: String,
}

/// 変換エラー
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),
    #[error("Invalid scale: {0}")]
    InvalidScale(u32),
    #[error("Failed to read image {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("Failed to write image {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Conversion task failed: {0}")]
    Task(String),
}

impl From<ConvertError> for AppError {
    fn from(e: ConvertError) -> Self {
        AppError::convert(e.to_string())
    }
}

/// 変換ステージ trait
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, request: &ConvertRequest) -> Result<(), ConvertError>;
}
