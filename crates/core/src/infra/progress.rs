//! ワーカーの stderr 出力（自由形式テキスト）の分類。

/// ワーカー失敗を示すトークン
const FAILURE_TOKENS: &[&str] = &["invalid gpu", "failed"];
/// アルファチャンネル検出を示すトークン
const ALPHA_TOKEN: &str = "has alpha channel";

/// 出力チャンクから得られるシグナル。
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerSignal {
    /// 進捗率 (0.0–1.0)
    Progress(f64),
    /// 入力画像にアルファチャンネルがある
    AlphaDetected,
    /// ワーカーが失敗を報告した（チャンク全体）
    Failure(String),
    /// どれにも該当しない
    Unrecognized(String),
}

/// チャンクを分類する。1 チャンクから複数のシグナルが出ることがある。
///
/// 判定は大文字小文字を区別する部分一致。
pub fn classify(chunk: &str) -> Vec<WorkerSignal> {
    let mut signals = Vec::new();

    if let Some(percent) = parse_leading_float(chunk) {
        signals.push(WorkerSignal::Progress((percent / 100.0).clamp(0.0, 1.0)));
    }
    if FAILURE_TOKENS.iter().any(|token| chunk.contains(token)) {
        signals.push(WorkerSignal::Failure(chunk.to_string()));
    }
    if chunk.contains(ALPHA_TOKEN) {
        signals.push(WorkerSignal::AlphaDetected);
    }

    if signals.is_empty() {
        signals.push(WorkerSignal::Unrecognized(chunk.to_string()));
    }
    signals
}

/// 先頭の数値部分を浮動小数点として読む（"45.00%" → 45.0）。
fn parse_leading_float(text: &str) -> Option<f64> {
    let text = text.trim_start();
    let end = text
        .char_indices()
        .take_while(|&(i, c)| c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+')))
        .count();

    // 数値として読める最長の接頭辞を探す
    let mut candidate = &text[..end];
    while !candidate.is_empty() {
        if let Ok(value) = candidate.parse::<f64>() {
            if value.is_finite() {
                return Some(value);
            }
        }
        candidate = &candidate[..candidate.len() - 1];
    }
    None
}
