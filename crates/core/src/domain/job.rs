use serde::{Deserialize, Serialize};

use super::error::AppError;
use super::settings::UpscaleSettings;

/// 同梱モデル。これ以外はカスタムモデルフォルダから読み込む
pub const DEFAULT_MODELS: &[&str] = &[
    "realesrgan-x4plus",
    "realesrgan-x4plus-anime",
    "remacri",
    "ultramix_balanced",
    "ultrasharp",
];

/// ワーカーに渡す中間フォーマット
pub const INTERMEDIATE_FORMAT: &str = "png";

/// 要求倍率の上限。変換ステージのメモリ使用量を抑える
pub const MAX_SCALE: u32 = 16;

/// 変換ステージが書き出せるフォーマット
pub const OUTPUT_FORMATS: &[&str] = &["png", "jpg", "jpeg", "webp"];

const SEPARATORS: &[char] = &['/', '\\'];

// ─── JobRequest ──────────────────────────────────────────────────

/// UI から渡される単一画像のアップスケール要求。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    /// 入力画像の絶対パス
    pub image_path: String,
    /// 出力ディレクトリ（None なら入力ディレクトリ）
    #[serde(default)]
    pub output_path: Option<String>,
    /// モデル名。"x2" / "x3" を含むとモデル倍率が変わる
    pub model: String,
    /// GPU ID（空なら自動選択）
    #[serde(default)]
    pub gpu_id: String,
    /// 出力フォーマット（png / jpg / webp）
    pub save_image_as: String,
    /// 最終的にユーザーが望む倍率
    pub scale: u32,
    /// 既存の出力を上書きするか
    #[serde(default)]
    pub overwrite: bool,
}

impl JobRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.image_path.trim().is_empty() {
            return Err(AppError::invalid_request("No image selected"));
        }
        if !std::path::Path::new(&self.image_path).has_root() {
            return Err(AppError::invalid_request(format!(
                "Image path must be absolute: {}",
                self.image_path
            )));
        }
        if self.model.trim().is_empty() {
            return Err(AppError::invalid_request("No model selected"));
        }
        if self.scale == 0 || self.scale > MAX_SCALE {
            return Err(AppError::invalid_request(format!(
                "Scale must be between 1 and {MAX_SCALE}: {}",
                self.scale
            )));
        }
        let format = self.save_image_as.to_ascii_lowercase();
        if !OUTPUT_FORMATS.contains(&format.as_str()) {
            return Err(AppError::invalid_request(format!(
                "Unsupported output format: {}",
                self.save_image_as
            )));
        }
        Ok(())
    }
}

// ─── JobDescriptor ───────────────────────────────────────────────

/// JobRequest から一度だけ導出される、ジョブのファイル名・パス情報。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    /// 入力ディレクトリ（区切り文字がなければ空文字）
    pub input_dir: String,
    /// 入力ファイル名（拡張子込み）
    pub file_name: String,
    /// 拡張子を除いたファイル名
    pub file_stem: String,
    /// 入力拡張子（ドットなし）
    pub file_ext: String,
    pub output_dir: String,
    pub model: String,
    /// モデル固有の倍率（2 / 3 / 4）。ワーカーの -s に渡す
    pub model_scale: u32,
    /// 要求倍率。出力ファイル名と変換ステージで使う
    pub requested_scale: u32,
    pub output_format: String,
    pub gpu_id: String,
    /// 最終出力パス
    pub output_file: String,
    pub is_default_model: bool,
    /// ワーカーに渡すモデルフォルダ
    pub models_dir: String,
}

impl JobDescriptor {
    pub fn resolve(request: &JobRequest, settings: &UpscaleSettings) -> Self {
        let (input_dir, file_name) = split_path(&request.image_path);
        let (file_stem, file_ext) = split_extension(file_name);

        let output_dir = settings
            .fixed_output_folder()
            .or(settings.last_output_folder())
            .or(request.output_path.as_deref().filter(|p| !p.is_empty()))
            .unwrap_or(input_dir)
            .to_string();

        let output_file = join_path(
            &output_dir,
            &format!(
                "{file_stem}_upscayl_{}x_{}.{}",
                request.scale, request.model, request.save_image_as
            ),
        );

        let is_default_model = is_default_model(&request.model);
        let models_dir = if is_default_model {
            settings.models_path.clone()
        } else {
            settings
                .custom_models_path
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| settings.models_path.clone())
        };

        Self {
            input_dir: input_dir.to_string(),
            file_name: file_name.to_string(),
            file_stem: file_stem.to_string(),
            file_ext: file_ext.to_string(),
            output_dir,
            model: request.model.clone(),
            model_scale: resolve_model_scale(&request.model),
            requested_scale: request.scale,
            output_format: request.save_image_as.clone(),
            gpu_id: request.gpu_id.clone(),
            output_file,
            is_default_model,
            models_dir,
        }
    }

    /// 元画像のパス（入力ディレクトリ + ファイル名）
    pub fn input_path(&self) -> String {
        join_path(&self.input_dir, &self.file_name)
    }

    /// ワーカーが書き出した画像を読むパス。
    /// アルファチャンネルありの場合は出力パスに ".png" を付けたもの。
    pub fn intermediate_path(&self, has_alpha: bool) -> String {
        if has_alpha {
            format!("{}.{INTERMEDIATE_FORMAT}", self.output_file)
        } else {
            self.output_file.clone()
        }
    }
}

/// モデル名から倍率を判定する。大文字小文字は区別する
pub fn resolve_model_scale(model: &str) -> u32 {
    if model.contains("x2") {
        2
    } else if model.contains("x3") {
        3
    } else {
        4
    }
}

pub fn is_default_model(model: &str) -> bool {
    DEFAULT_MODELS.contains(&model)
}

/// 最後の区切り文字で (ディレクトリ, ファイル名) に分割する
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind(SEPARATORS) {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

/// 最後のドットで (stem, 拡張子) に分割する。先頭ドットのみのファイルは拡張子なし
pub fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => (&file_name[..idx], &file_name[idx + 1..]),
        _ => (file_name, ""),
    }
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_string();
    }
    format!("{dir}{}{name}", std::path::MAIN_SEPARATOR)
}

// ─── JobPhase / JobState ─────────────────────────────────────────

/// ジョブの状態遷移
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Created,
    SkippedDone,
    Spawned,
    FailedDuringRun,
    ClosedClean,
    Done,
    Error,
    Cancelled,
}

impl JobPhase {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::SkippedDone => "skipped_done",
            Self::Spawned => "spawned",
            Self::FailedDuringRun => "failed_during_run",
            Self::ClosedClean => "closed_clean",
            Self::Done => "done",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::SkippedDone | Self::Done | Self::Error | Self::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobPhase) -> bool {
        use JobPhase::*;
        matches!(
            (self, next),
            (Created, SkippedDone)
                | (Created, Spawned)
                | (Created, FailedDuringRun)
                | (Spawned, FailedDuringRun)
                | (Spawned, ClosedClean)
                | (Spawned, Cancelled)
                | (ClosedClean, Done)
                | (ClosedClean, Error)
                | (FailedDuringRun, Error)
        )
    }
}

/// 実行中ジョブの可変状態。ジョブのハンドラだけが所有する
#[derive(Debug, Clone)]
pub struct JobState {
    phase: JobPhase,
    has_alpha: bool,
    failed: bool,
    last_progress: Option<f64>,
}

impl JobState {
    pub fn new() -> Self {
        Self {
            phase: JobPhase::Created,
            has_alpha: false,
            failed: false,
            last_progress: None,
        }
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn last_progress(&self) -> Option<f64> {
        self.last_progress
    }

    /// 失敗フラグを立てる。新たに立った場合のみ true
    pub fn mark_failed(&mut self) -> bool {
        !std::mem::replace(&mut self.failed, true)
    }

    /// アルファフラグを立てる。新たに立った場合のみ true
    pub fn mark_alpha(&mut self) -> bool {
        !std::mem::replace(&mut self.has_alpha, true)
    }

    pub fn record_progress(&mut self, value: f64) {
        self.last_progress = Some(value);
    }

    pub fn advance(&mut self, next: JobPhase) -> Result<(), AppError> {
        if !self.phase.can_transition_to(next) {
            return Err(AppError::invalid_state(format!(
                "{} から {} へは遷移できません",
                self.phase.as_str(),
                next.as_str()
            )));
        }
        self.phase = next;
        Ok(())
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}

// ─── JobOutcome ──────────────────────────────────────────────────

/// ジョブの最終結果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    /// 既存の出力を再利用した
    Skipped { output_path: String },
    Done { output_path: String },
    Failed { message: String },
    Cancelled,
    /// UI が閉じられたため何も報告せず終了した
    Abandoned,
}

// ─── JobInfo ─────────────────────────────────────────────────────

/// ジョブ状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
    Canceled,
}

/// ジョブメタデータ
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub job_id: String,
    pub image_path: String,
    pub status: JobStatus,
    pub created_at: String,
    pub error: Option<String>,
}

impl JobInfo {
    pub fn new(job_id: String, image_path: String, now: String) -> Self {
        Self {
            job_id,
            image_path,
            status: JobStatus::Queued,
            created_at: now,
            error: None,
        }
    }
}
