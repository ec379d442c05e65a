use crate::infra::sink::UiSink;

/// 変換ステージ失敗時のユーザー向けメッセージ。元のエラーはログにのみ残す
pub const CONVERT_ERROR_MESSAGE: &str = "Error processing (scaling and converting) the image. Please report this error on Upscayl GitHub Issues page.";

/// ワーカー失敗時のユーザー向けメッセージ
pub const WORKER_ERROR_MESSAGE: &str =
    "Error upscaling the image. Check the selected GPU and model, then try again.";

/// 終端イベント（done / error / cancelled）を 1 ジョブにつき 1 回だけ送る
pub struct ResultReporter<'a> {
    sink: &'a dyn UiSink,
    reported: bool,
}

impl<'a> ResultReporter<'a> {
    pub fn new(sink: &'a dyn UiSink) -> Self {
        Self {
            sink,
            reported: false,
        }
    }

    /// 完了を通知する。パスの最後の要素はパーセントエンコードされる
    pub fn done(&mut self, output_path: &str) -> bool {
        let encoded = encode_output_path(output_path);
        self.emit(|sink| sink.done(&encoded))
    }

    pub fn error(&mut self, message: &str) -> bool {
        self.emit(|sink| sink.error(message))
    }

    pub fn cancelled(&mut self) -> bool {
        self.emit(|sink| sink.cancelled())
    }

    fn emit(&mut self, send: impl FnOnce(&dyn UiSink)) -> bool {
        if self.reported {
            log::warn!("Terminal event already reported, dropping");
            return false;
        }
        if !self.sink.is_available() {
            return false;
        }
        self.reported = true;
        send(self.sink);
        true
    }
}

/// パスの最後の要素（ファイル名）だけをパーセントエンコードする
pub fn encode_output_path(path: &str) -> String {
    let name_start = path.rfind(&['/', '\\'][..]).map_or(0, |idx| idx + 1);
    let (dir, name) = path.split_at(name_start);
    format!("{dir}{}", urlencoding::encode(name))
}
