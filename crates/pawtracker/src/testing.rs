//! In-memory fakes shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

use crate::coordinate::{Coordinate, DeliveryRecord};
use crate::platform::{
    LocationPlatform, PermissionStatus, PlatformError, SampleSender, SubscriptionHandle,
    UpdateConfig,
};
use crate::session::UserIdentity;
use crate::sink::{
    Delivered, DeliveryError, DeliveryResult, HttpRequest, HttpResponse, HttpTransport, Sink,
    TransportError,
};

#[derive(Debug, Clone)]
enum Reply {
    Respond(u16, String),
    Unreachable,
}

/// Transport that records every request and answers with a canned reply.
#[derive(Debug)]
pub(crate) struct RecordingTransport {
    requests: Mutex<Vec<HttpRequest>>,
    reply: Mutex<Reply>,
}

impl RecordingTransport {
    fn with_reply(reply: Reply) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            reply: Mutex::new(reply),
        }
    }

    pub(crate) fn ok() -> Self {
        Self::responding(200, r#"{"ok":true}"#)
    }

    pub(crate) fn responding(status: u16, body: &str) -> Self {
        Self::with_reply(Reply::Respond(status, body.to_string()))
    }

    pub(crate) fn unreachable() -> Self {
        Self::with_reply(Reply::Unreachable)
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl HttpTransport for RecordingTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        match self.reply.lock().unwrap().clone() {
            Reply::Respond(status, body) => Ok(HttpResponse { status, body }),
            Reply::Unreachable => Err(TransportError::Request("connection refused".to_string())),
        }
    }
}

/// Sink that records every attempt and can be switched to fail.
#[derive(Debug)]
pub(crate) struct RecordingSink {
    attempts: Mutex<Vec<(DeliveryRecord, UserIdentity)>>,
    fail_status: Mutex<Option<u16>>,
    requires_identity: bool,
    notify: Notify,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self {
            attempts: Mutex::new(Vec::new()),
            fail_status: Mutex::new(None),
            requires_identity: false,
            notify: Notify::new(),
        }
    }

    /// A sink that, like the realtime store, refuses anonymous records.
    pub(crate) fn requiring_identity() -> Self {
        Self {
            requires_identity: true,
            ..Self::new()
        }
    }

    pub(crate) fn fail_with(&self, status: Option<u16>) {
        *self.fail_status.lock().unwrap() = status;
    }

    pub(crate) fn attempts(&self) -> Vec<(DeliveryRecord, UserIdentity)> {
        self.attempts.lock().unwrap().clone()
    }

    pub(crate) fn records(&self) -> Vec<DeliveryRecord> {
        self.attempts().into_iter().map(|(r, _)| r).collect()
    }

    /// Wait until at least `n` attempts have been made.
    pub(crate) async fn wait_for(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.notify.notified();
                if self.attempts.lock().unwrap().len() >= n {
                    break;
                }
                notified.await;
            }
        })
        .await
        .expect("timed out waiting for deliveries");
    }
}

#[async_trait::async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn requires_identity(&self) -> bool {
        self.requires_identity
    }

    async fn deliver(&self, record: &DeliveryRecord, identity: &UserIdentity) -> DeliveryResult {
        self.attempts
            .lock()
            .unwrap()
            .push((record.clone(), identity.clone()));
        self.notify.notify_waiters();

        if self.requires_identity && !identity.is_authenticated() {
            return Err(DeliveryError::NotAuthenticated);
        }
        match *self.fail_status.lock().unwrap() {
            Some(status) => Err(DeliveryError::Http {
                status,
                message: "simulated failure".to_string(),
            }),
            None => Ok(Delivered {
                status: 200,
                body: serde_json::Value::Null,
            }),
        }
    }
}

/// Scriptable location platform.
#[derive(Debug)]
pub(crate) struct FakePlatform {
    foreground: PermissionStatus,
    background: PermissionStatus,
    fail_subscribe: bool,
    fix: Option<Coordinate>,
    on_start: Option<Coordinate>,
    permission_delay: Duration,
    registered: AtomicBool,
    sender: Mutex<Option<SampleSender>>,
    last_config: Mutex<Option<UpdateConfig>>,
    pub(crate) starts: AtomicUsize,
    pub(crate) resumes: AtomicUsize,
    pub(crate) stops: AtomicUsize,
    pub(crate) foreground_prompts: AtomicUsize,
    pub(crate) background_prompts: AtomicUsize,
}

impl FakePlatform {
    /// Grants everything; the one-shot fix is at Bogotá.
    pub(crate) fn granting() -> Self {
        Self {
            foreground: PermissionStatus::Granted,
            background: PermissionStatus::Granted,
            fail_subscribe: false,
            fix: Some(Coordinate::now(4.6, -74.1)),
            on_start: None,
            permission_delay: Duration::ZERO,
            registered: AtomicBool::new(false),
            sender: Mutex::new(None),
            last_config: Mutex::new(None),
            starts: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            foreground_prompts: AtomicUsize::new(0),
            background_prompts: AtomicUsize::new(0),
        }
    }

    pub(crate) fn deny_foreground(mut self) -> Self {
        self.foreground = PermissionStatus::Denied;
        self
    }

    pub(crate) fn deny_background(mut self) -> Self {
        self.background = PermissionStatus::Denied;
        self
    }

    pub(crate) fn failing_subscribe(mut self) -> Self {
        self.fail_subscribe = true;
        self
    }

    pub(crate) fn without_fix(mut self) -> Self {
        self.fix = None;
        self
    }

    /// Push `sample` from inside `start_updates`, the way a platform with a
    /// cached fix reports it as soon as the subscription is registered.
    pub(crate) fn emitting_on_start(mut self, sample: Coordinate) -> Self {
        self.on_start = Some(sample);
        self
    }

    pub(crate) fn slow_permissions(mut self, delay: Duration) -> Self {
        self.permission_delay = delay;
        self
    }

    /// Pretend an earlier process left a subscription registered.
    pub(crate) fn already_registered(self) -> Self {
        self.registered.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn last_config(&self) -> Option<UpdateConfig> {
        self.last_config.lock().unwrap().clone()
    }

    /// Push a sample as the platform would; false if nobody is listening.
    pub(crate) async fn emit(&self, sample: Coordinate) -> bool {
        let sender = self.sender.lock().unwrap().clone();
        match sender {
            Some(tx) => tx.send(sample).await.is_ok(),
            None => false,
        }
    }

    async fn prompt(&self, answer: PermissionStatus) -> PermissionStatus {
        if !self.permission_delay.is_zero() {
            tokio::time::sleep(self.permission_delay).await;
        }
        answer
    }
}

#[async_trait::async_trait]
impl LocationPlatform for FakePlatform {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn request_foreground_permission(&self) -> Result<PermissionStatus, PlatformError> {
        self.foreground_prompts.fetch_add(1, Ordering::SeqCst);
        Ok(self.prompt(self.foreground).await)
    }

    async fn request_background_permission(&self) -> Result<PermissionStatus, PlatformError> {
        self.background_prompts.fetch_add(1, Ordering::SeqCst);
        Ok(self.prompt(self.background).await)
    }

    async fn current_location(&self) -> Result<Coordinate, PlatformError> {
        self.fix
            .ok_or_else(|| PlatformError::Unavailable("no fix yet".to_string()))
    }

    async fn start_updates(
        &self,
        config: &UpdateConfig,
        tx: SampleSender,
    ) -> Result<SubscriptionHandle, PlatformError> {
        if self.fail_subscribe {
            return Err(PlatformError::SubscriptionFailed(
                "location services disabled".to_string(),
            ));
        }
        let id = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(sample) = self.on_start {
            tx.try_send(sample).unwrap();
        }
        *self.sender.lock().unwrap() = Some(tx);
        *self.last_config.lock().unwrap() = Some(config.clone());
        self.registered.store(true, Ordering::SeqCst);
        Ok(SubscriptionHandle::new(id as u64))
    }

    async fn resume_updates(
        &self,
        config: &UpdateConfig,
        tx: SampleSender,
    ) -> Result<Option<SubscriptionHandle>, PlatformError> {
        if !self.registered.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.resumes.fetch_add(1, Ordering::SeqCst);
        *self.sender.lock().unwrap() = Some(tx);
        *self.last_config.lock().unwrap() = Some(config.clone());
        Ok(Some(SubscriptionHandle::new(99)))
    }

    fn stop_updates(&self, _handle: SubscriptionHandle) -> Result<(), PlatformError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.sender.lock().unwrap().take();
        if self.registered.swap(false, Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PlatformError::NotRegistered)
        }
    }

    fn has_active_subscription(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }
}
