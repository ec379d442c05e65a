use serde::Serialize;

/// イベント名定数
pub const UPSCAYL_PROGRESS: &str = "upscayl-progress";
pub const SCALING_AND_CONVERTING: &str = "scaling-and-converting";
pub const UPSCAYL_DONE: &str = "upscayl-done";
pub const UPSCAYL_ERROR: &str = "upscayl-error";
pub const UPSCAYL_CANCELLED: &str = "upscayl-cancelled";
pub const PROGRESS_BAR: &str = "progress-bar";

/// プログレスバーの不定状態（リセット・完了・エラー時）
pub const PROGRESS_INDETERMINATE: f64 = -1.0;

/// UI に送るイベント
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum UiEvent {
    /// ワーカー出力の生テキスト
    Progress(String),
    /// 変換ステージへの移行通知
    ScalingAndConverting,
    /// 完了（ファイル名部分はパーセントエンコード済み）
    Done(String),
    /// 失敗（ユーザー向け固定メッセージ）
    Error(String),
    /// 停止要求により中断
    Cancelled,
    /// ホストのプログレスバー値。[0, 1] または -1
    ProgressBar(f64),
}

impl UiEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Progress(_) => UPSCAYL_PROGRESS,
            Self::ScalingAndConverting => SCALING_AND_CONVERTING,
            Self::Done(_) => UPSCAYL_DONE,
            Self::Error(_) => UPSCAYL_ERROR,
            Self::Cancelled => UPSCAYL_CANCELLED,
            Self::ProgressBar(_) => PROGRESS_BAR,
        }
    }

    /// ジョブの終端イベントかどうか
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error(_) | Self::Cancelled)
    }
}
