pub mod settings;

pub use settings::{
    Settings, AppSettings, Environment, DatabaseSettings, CacheSettings, LeaderboardSettings,
};
