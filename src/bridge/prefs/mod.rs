pub mod dao;
pub mod models;

pub use dao::PrefsDao;
pub use models::{keys, MessagePrefs, PrivacySettings, Visibility};
