mod repository;

pub use repository::SettingsStore;
