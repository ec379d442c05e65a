use tokio::sync::mpsc;

use crate::domain::event::UiEvent;

/// UI 通知先 trait（送りっぱなし、応答なし）。
///
/// ハンドラは送信前に `is_available` を確認し、UI が閉じていれば黙って中断する。
pub trait UiSink: Send + Sync {
    /// 通知先がまだ生きているか
    fn is_available(&self) -> bool {
        true
    }

    /// ホストのプログレスバーを更新する（[0, 1] または -1）
    fn set_progress_bar(&self, value: f64);

    fn progress(&self, text: &str);

    fn scaling_and_converting(&self);

    fn done(&self, path: &str);

    fn error(&self, message: &str);

    fn cancelled(&self);
}

/// mpsc チャンネルへ `UiEvent` を流す実装。受信側が閉じると利用不可になる
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<UiEvent>) -> Self {
        Self { tx }
    }

    /// 送信側と受信側をまとめて作る
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, event: UiEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            log::debug!("UI event dropped, receiver closed [{name}]");
        }
    }
}

impl UiSink for ChannelSink {
    fn is_available(&self) -> bool {
        !self.tx.is_closed()
    }

    fn set_progress_bar(&self, value: f64) {
        self.send(UiEvent::ProgressBar(value));
    }

    fn progress(&self, text: &str) {
        self.send(UiEvent::Progress(text.to_string()));
    }

    fn scaling_and_converting(&self) {
        self.send(UiEvent::ScalingAndConverting);
    }

    fn done(&self, path: &str) {
        self.send(UiEvent::Done(path.to_string()));
    }

    fn error(&self, message: &str) {
        self.send(UiEvent::Error(message.to_string()));
    }

    fn cancelled(&self) {
        self.send(UiEvent::Cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.progress("12.00%");
        sink.set_progress_bar(0.12);
        sink.done("/out/a.png");

        assert_eq!(rx.try_recv().unwrap(), UiEvent::Progress("12.00%".into()));
        assert_eq!(rx.try_recv().unwrap(), UiEvent::ProgressBar(0.12));
        assert_eq!(rx.try_recv().unwrap(), UiEvent::Done("/out/a.png".into()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_receiver_makes_sink_unavailable() {
        let (sink, rx) = ChannelSink::channel();
        assert!(sink.is_available());
        drop(rx);
        assert!(!sink.is_available());
        // 送信は黙って捨てられる
        sink.error("ignored");
    }
}
