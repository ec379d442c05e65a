use serde::{Deserialize, Serialize};

/// アップスケール設定（UI 側で永続化され、ジョブからは読み取り専用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpscaleSettings {
    /// 既存の出力ファイルを上書きするか
    pub overwrite: bool,
    /// 固定出力フォルダを使うか
    pub save_output_folder: bool,
    /// 固定出力フォルダ
    pub output_folder_path: Option<String>,
    /// 最後に使った出力フォルダ（要求の出力先より優先）
    pub folder_path: Option<String>,
    /// カスタムモデルのフォルダ
    pub custom_models_path: Option<String>,
    /// 同梱モデルのフォルダ
    pub models_path: String,
    /// アップスケールワーカーのバイナリ
    pub worker_binary: String,
}

impl UpscaleSettings {
    /// 固定出力フォルダが有効かつ設定済みならそれを返す
    pub fn fixed_output_folder(&self) -> Option<&str> {
        if !self.save_output_folder {
            return None;
        }
        self.output_folder_path
            .as_deref()
            .filter(|path| !path.is_empty())
    }

    /// 最後に使った出力フォルダ。空文字は未設定扱い
    pub fn last_output_folder(&self) -> Option<&str> {
        self.folder_path.as_deref().filter(|path| !path.is_empty())
    }
}

impl Default for UpscaleSettings {
    fn default() -> Self {
        let models_path = dirs::data_local_dir()
            .map(|dir| dir.join("upscayl").join("models"))
            .unwrap_or_else(|| std::path::PathBuf::from("models"));
        Self {
            overwrite: false,
            save_output_folder: false,
            output_folder_path: None,
            folder_path: None,
            custom_models_path: None,
            models_path: models_path.to_string_lossy().into_owned(),
            worker_binary: "upscayl-bin".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_output_folder_requires_toggle() {
        let settings = UpscaleSettings {
            output_folder_path: Some("/out".into()),
            ..Default::default()
        };
        assert_eq!(settings.fixed_output_folder(), None);

        let settings = UpscaleSettings {
            save_output_folder: true,
            ..settings
        };
        assert_eq!(settings.fixed_output_folder(), Some("/out"));
    }

    #[test]
    fn fixed_output_folder_ignores_empty_path() {
        let settings = UpscaleSettings {
            save_output_folder: true,
            output_folder_path: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(settings.fixed_output_folder(), None);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let settings: UpscaleSettings = serde_json::from_str(r#"{"overwrite": true}"#).unwrap();
        assert!(settings.overwrite);
        assert_eq!(settings.worker_binary, "upscayl-bin");
        assert!(settings.custom_models_path.is_none());
    }
}
