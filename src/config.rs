//! Environment-driven configuration.
use crate::logging::log_warning;
use crate::registry::PublisherConfig;

pub const DEFAULT_MQTT_URL: &str = "ws://xvm-190-41.dc0.ghst.net:8885/mqtt";
pub const DEFAULT_MQTT_CLIENT_ID: &str = "exmg-mqtt-ffmpeg-default-client-id";
pub const DEFAULT_MQTT_USER: &str = "user1";
pub const DEFAULT_MQTT_PASSWD: &str = "liverymqtt123";
pub const DEFAULT_MQTT_TOPIC: &str = "/mqtt";

const DEFAULT_KEY_PUBLISH_DELAY_SECS: f64 = 10.0;

/// Session-level configuration, read once at `Session::init` time.
#[derive(Debug, Clone)]
pub struct Config {
    pub is_dry_run: bool,
    pub is_encryption_enabled: bool,
    pub fs_pub_basepath: Option<String>,
    pub mqtt_enabled: bool,
    pub mqtt_url: String,
    pub mqtt_config: PublisherConfig,
    pub publish_delay_secs: f64,
    pub fragments_per_key: u32,
    pub key_index_max_window: i64,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        let is_dry_run = std::env::var_os("FF_EXMG_SECURE_SYNC_DRY_RUN").is_some();
        let is_encryption_enabled = std::env::var_os("FF_EXMG_SECURE_SYNC_NO_ENCRYPTION").is_none();
        let fs_pub_basepath = std::env::var("FF_EXMG_SECURE_SYNC_FS_PUB_BASEPATH").ok();
        let mqtt_enabled = std::env::var_os("FF_EXMG_SECURE_SYNC_MQTT_PUB").is_some();

        let publish_delay_secs = match std::env::var("FF_EXMG_SECURE_SYNC_KEY_PUBLISH_DELAY") {
            Ok(raw) => raw.parse::<f64>().unwrap_or_else(|_| {
                log_warning!("SECURESYNC", "invalid FF_EXMG_SECURE_SYNC_KEY_PUBLISH_DELAY, using default");
                DEFAULT_KEY_PUBLISH_DELAY_SECS
            }),
            Err(_) => {
                log_warning!("SECURESYNC", "using default value for FF_EXMG_SECURE_SYNC_KEY_PUBLISH_DELAY");
                DEFAULT_KEY_PUBLISH_DELAY_SECS
            }
        };

        let fragments_per_key = match std::env::var("FF_EXMG_SECURE_SYNC_FRAGMENTS_PER_KEY") {
            Ok(raw) => {
                let parsed = raw.parse::<u32>().unwrap_or(0);
                if parsed == 0 {
                    1
                } else {
                    parsed
                }
            }
            Err(_) => {
                log_warning!("SECURESYNC", "using default value 1 for FF_EXMG_SECURE_SYNC_FRAGMENTS_PER_KEY");
                1
            }
        };

        let key_index_max_window = match std::env::var("FF_EXMG_SECURE_SYNC_KEY_INDEX_MAX_WINDOW") {
            Ok(raw) => raw.parse::<i64>().unwrap_or(-1),
            Err(_) => -1,
        };
        if key_index_max_window < 0 {
            log_warning!(
                "SECURESYNC",
                "setting key-index maximum window size to unlimited (negative int value)"
            );
        }

        Config {
            is_dry_run,
            is_encryption_enabled,
            fs_pub_basepath,
            mqtt_enabled,
            mqtt_url: DEFAULT_MQTT_URL.to_string(),
            mqtt_config: PublisherConfig {
                client_id: DEFAULT_MQTT_CLIENT_ID.to_string(),
                user: DEFAULT_MQTT_USER.to_string(),
                passwd: DEFAULT_MQTT_PASSWD.to_string(),
                topic: DEFAULT_MQTT_TOPIC.to_string(),
            },
            publish_delay_secs,
            fragments_per_key,
            key_index_max_window,
        }
    }
}

