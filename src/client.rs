use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::debounce::{Debouncer, DEBOUNCE_WINDOW};
use crate::device::DeviceBinding;
use crate::discovery::{DeviceDiscoveryCache, EventCallback, RecordSink};
use crate::gateway::CommandGateway;
use crate::logger::{MessageLogMode, MessageLogger};
use crate::session::{Endpoint, SessionManager, AUTH_GUARD, REFRESH_MARGIN};
use crate::store::CapabilityStore;
use crate::types::*;
use crate::{Error, Result};

/// Default period of the background discovery refresh.
pub const RESYNC_INTERVAL: Duration = Duration::from_millis(905_000);

pub struct CloudClientBuilder {
    credentials: Option<Credentials>,
    base_url: Option<String>,
    auth_guard: Duration,
    refresh_margin: Duration,
    resync_interval: Duration,
    debounce_window: Duration,
    lookup_max_age: Option<Duration>,
    event_callbacks: Vec<EventCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl Default for CloudClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudClientBuilder {
    pub fn new() -> Self {
        Self {
            credentials: None,
            base_url: None,
            auth_guard: AUTH_GUARD,
            refresh_margin: REFRESH_MARGIN,
            resync_interval: RESYNC_INTERVAL,
            debounce_window: DEBOUNCE_WINDOW,
            lookup_max_age: None,
            event_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Send every request to `url` instead of the region's host.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn auth_guard(mut self, guard: Duration) -> Self {
        self.auth_guard = guard;
        self
    }

    pub fn refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    pub fn debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    /// Let `list_all`, `list_by_type` and `get_by_id` answer from the cache
    /// while it is younger than `max_age`.
    pub fn lookup_max_age(mut self, max_age: Duration) -> Self {
        self.lookup_max_age = Some(max_age);
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<CloudClient> {
        let http = reqwest::Client::builder().build()?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(MessageLogger::new(mode, &path)?.shared()),
            _ => None,
        };

        let endpoint = match self.base_url {
            Some(url) => Endpoint::Fixed(url),
            None => Endpoint::Regional,
        };
        let mut session = SessionManager::new(
            http,
            endpoint,
            self.auth_guard,
            self.refresh_margin,
            logger.clone(),
        );
        if let Some(credentials) = self.credentials {
            credentials.validate()?;
            session = session.with_credentials(credentials);
        }
        let session = Arc::new(session);

        let discovery = Arc::new(DeviceDiscoveryCache::new(
            Arc::clone(&session),
            self.event_callbacks,
            self.lookup_max_age,
        ));
        let gateway = CommandGateway::new(Arc::clone(&session), logger);

        Ok(CloudClient {
            session,
            discovery,
            gateway,
            resync_interval: self.resync_interval,
            debounce_window: self.debounce_window,
            resync_task: Mutex::new(None),
        })
    }
}

/// One cloud account: session, device cache and command path.
///
/// Independent clients share nothing, so several accounts can run side by side.
pub struct CloudClient {
    session: Arc<SessionManager>,
    discovery: Arc<DeviceDiscoveryCache>,
    gateway: CommandGateway,
    resync_interval: Duration,
    debounce_window: Duration,
    resync_task: Mutex<Option<JoinHandle<()>>>,
}

impl CloudClient {
    pub fn builder() -> CloudClientBuilder {
        CloudClientBuilder::new()
    }

    /// Replace the credentials. Clears any fatal session error.
    pub async fn initialize(&self, credentials: Credentials) -> Result<()> {
        self.session.initialize(credentials).await
    }

    /// Authenticate, run a first discovery and (re)start the periodic resync.
    ///
    /// Calling this again replaces the running resync timer instead of adding one.
    /// Missing credentials and rejected credentials fail without a timer. Any
    /// other authentication failure is returned too, but the resync timer is
    /// started so a later tick can recover.
    pub async fn connect(&self) -> Result<Vec<DeviceRecord>> {
        if let Err(e) = self.session.ensure_valid_token().await {
            if matches!(e, Error::Config(_) | Error::Session { fatal: true, .. }) {
                return Err(e);
            }
            warn!(error = %e, "authentication failed, leaving recovery to resync");
            self.start_resync();
            return Err(e);
        }
        self.start_resync();
        let devices = self.discovery.discover().await;
        info!(count = devices.len(), "connected to cloud");
        Ok(devices)
    }

    /// Stop the periodic resync. The session itself is kept.
    pub fn disconnect(&self) {
        if let Some(task) = self.lock_task().take() {
            task.abort();
            debug!("resync stopped");
        }
    }

    pub fn is_resyncing(&self) -> bool {
        self.lock_task()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub async fn resync(&self) -> Vec<DeviceRecord> {
        self.discovery.discover().await
    }

    pub async fn list_all(&self) -> Vec<DeviceRecord> {
        self.discovery.list_all().await
    }

    pub async fn list_by_type(&self, dev_type: &str) -> Vec<DeviceRecord> {
        self.discovery.list_by_type(dev_type).await
    }

    pub async fn get_by_id(&self, id: &str) -> Option<DeviceRecord> {
        self.discovery.get_by_id(id).await
    }

    pub fn cached(&self) -> Vec<DeviceRecord> {
        self.discovery.cached()
    }

    pub async fn send(&self, device_id: &str, commands: &[Command]) -> Result<()> {
        self.gateway.send(device_id, commands).await
    }

    /// Bind a discovered device to a capability store.
    ///
    /// While the returned binding is alive, every successful discovery
    /// (including the periodic resync) applies the device's fresh record to it.
    pub async fn bind<S: CapabilityStore>(
        &self,
        record: &DeviceRecord,
        settings: &DeviceSettings,
        store: Arc<S>,
    ) -> Result<Arc<DeviceBinding<S>>> {
        let binding = Arc::new(
            DeviceBinding::new(record, settings, store, self.gateway.clone()).await?,
        );
        let sink: Arc<dyn RecordSink> = binding.clone();
        self.discovery.register(binding.device_id(), Arc::downgrade(&sink));
        Ok(binding)
    }

    /// Coalescing listener that feeds local edits to `binding`.
    pub fn listener<S: CapabilityStore>(
        &self,
        binding: Arc<DeviceBinding<S>>,
    ) -> Debouncer<DeviceBinding<S>> {
        Debouncer::new(self.debounce_window, binding)
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn discovery(&self) -> &Arc<DeviceDiscoveryCache> {
        &self.discovery
    }

    pub fn gateway(&self) -> &CommandGateway {
        &self.gateway
    }

    fn start_resync(&self) {
        let discovery = Arc::clone(&self.discovery);
        let session = Arc::clone(&self.session);
        let period = self.resync_interval;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick completes immediately
            loop {
                interval.tick().await;
                if !session.has_credentials().await {
                    debug!("no credentials, skipping resync");
                    continue;
                }
                let devices = discovery.discover().await;
                debug!(count = devices.len(), "periodic resync");
            }
        });
        if let Some(previous) = self.lock_task().replace(task) {
            previous.abort();
        }
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.resync_task.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for CloudClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}
