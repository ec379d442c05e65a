use rusqlite::{params, Connection};

use crate::domain::error::AppError;
use crate::domain::settings::UpscaleSettings;

/// SQLite 設定ストア（key-value）
pub struct SettingsStore {
    conn: Connection,
}

impl SettingsStore {
    /// 新規接続（ファイルパス指定）
    pub fn open(path: &str) -> Result<Self, AppError> {
        let conn = Connection::open(path)
            .map_err(|e| AppError::storage(format!("DB接続に失敗: {e}")))?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// in-memory DB（テスト用）
    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::storage(format!("in-memory DB作成に失敗: {e}")))?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), AppError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS settings (
                    key   TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
                ",
            )
            .map_err(|e| AppError::storage(format!("マイグレーション失敗: {e}")))?;
        Ok(())
    }

    pub fn get_settings(&self) -> Result<UpscaleSettings, AppError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM settings")
            .map_err(|e| AppError::storage(format!("クエリ準備失敗: {e}")))?;

        let rows: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| AppError::storage(format!("クエリ実行失敗: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::storage(format!("行読み取り失敗: {e}")))?;

        if rows.is_empty() {
            return Ok(UpscaleSettings::default());
        }

        // key-value をJSONに組み立ててデシリアライズ
        let mut map = serde_json::Map::new();
        for (key, value) in rows {
            // JSONとして解析可能ならそのまま、そうでなければ文字列として
            let parsed = match serde_json::from_str::<serde_json::Value>(&value) {
                Ok(v) => v,
                Err(_) => serde_json::Value::String(value),
            };
            map.insert(key, parsed);
        }

        // 欠けているキーはデフォルト値になる
        serde_json::from_value::<UpscaleSettings>(serde_json::Value::Object(map)).or_else(|e| {
            log::warn!("設定の読み込みに失敗、デフォルトを使用: {e}");
            Ok(UpscaleSettings::default())
        })
    }

    pub fn save_settings(&self, settings: &UpscaleSettings) -> Result<(), AppError> {
        let json = serde_json::to_value(settings)
            .map_err(|e| AppError::internal(format!("settings serialize: {e}")))?;

        if let Some(obj) = json.as_object() {
            for (key, value) in obj {
                self.put(key, value)?;
            }
        }
        Ok(())
    }

    /// 上書き設定だけを更新する
    pub fn set_overwrite(&self, overwrite: bool) -> Result<(), AppError> {
        self.put("overwrite", &serde_json::Value::Bool(overwrite))
    }

    fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), AppError> {
        self.conn
            .execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value.to_string()],
            )
            .map_err(|e| AppError::storage(format!("設定保存失敗: {e}")))?;
        Ok(())
    }
}
