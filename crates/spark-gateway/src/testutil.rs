use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Result, bail};
use axum::http::{HeaderMap, HeaderValue, header};
use chrono::{Duration, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use spark_db::{Database, Store};
use spark_types::events::ServerEvent;
use spark_types::models::{
    Conversation, Message, NewMessage, NewNotification, Notification, SessionRecord, User,
    UserUpdate,
};

use crate::dispatcher::Dispatcher;
use crate::lifecycle::Connection;
use crate::registry::Outbound;
use crate::session::{SessionSigner, SessionVerifier};

pub const COOKIE_NAME: &str = "spark.sid";

/// Database-backed store whose writes can be made to fail, or to stall,
/// on demand.
pub struct FlakyStore {
    db: Arc<Database>,
    fail_sessions: AtomicBool,
    fail_messages: AtomicBool,
    fail_notifications: AtomicBool,
    online_delay_ms: AtomicU64,
    offline_delay_ms: AtomicU64,
}

impl FlakyStore {
    pub fn fail_sessions(&self, fail: bool) {
        self.fail_sessions.store(fail, Ordering::SeqCst);
    }

    pub fn fail_messages(&self, fail: bool) {
        self.fail_messages.store(fail, Ordering::SeqCst);
    }

    pub fn fail_notifications(&self, fail: bool) {
        self.fail_notifications.store(fail, Ordering::SeqCst);
    }

    /// Makes every presence write that sets `is_online == online` sleep
    /// for `delay` before it reaches the database.
    pub fn delay_presence_writes(&self, online: bool, delay: std::time::Duration) {
        let slot = if online { &self.online_delay_ms } else { &self.offline_delay_ms };
        slot.store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Store for FlakyStore {
    fn get_session(&self, token: &str) -> Result<Option<SessionRecord>> {
        if self.fail_sessions.load(Ordering::SeqCst) {
            bail!("session store unavailable");
        }
        Store::get_session(self.db.as_ref(), token)
    }

    fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Store::get_user(self.db.as_ref(), id)
    }

    fn update_user(&self, id: Uuid, update: &UserUpdate) -> Result<()> {
        let delay_ms = match update.is_online {
            Some(true) => self.online_delay_ms.load(Ordering::SeqCst),
            Some(false) => self.offline_delay_ms.load(Ordering::SeqCst),
            None => 0,
        };
        if delay_ms > 0 {
            // runs on the blocking pool
            std::thread::sleep(std::time::Duration::from_millis(delay_ms));
        }
        Store::update_user(self.db.as_ref(), id, update)
    }

    fn get_conversation(&self, a: Uuid, b: Uuid) -> Result<Option<Conversation>> {
        Store::get_conversation(self.db.as_ref(), a, b)
    }

    fn create_conversation(&self, a: Uuid, b: Uuid) -> Result<Conversation> {
        Store::create_conversation(self.db.as_ref(), a, b)
    }

    fn create_message(&self, message: &NewMessage) -> Result<Message> {
        if self.fail_messages.load(Ordering::SeqCst) {
            bail!("disk full");
        }
        Store::create_message(self.db.as_ref(), message)
    }

    fn create_notification(&self, notification: &NewNotification) -> Result<Notification> {
        if self.fail_notifications.load(Ordering::SeqCst) {
            bail!("disk full");
        }
        Store::create_notification(self.db.as_ref(), notification)
    }
}

pub struct TestEnv {
    pub db: Arc<Database>,
    pub store: Arc<FlakyStore>,
    pub signer: SessionSigner,
    pub dispatcher: Dispatcher,
}

impl TestEnv {
    pub fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = Arc::new(FlakyStore {
            db: db.clone(),
            fail_sessions: AtomicBool::new(false),
            fail_messages: AtomicBool::new(false),
            fail_notifications: AtomicBool::new(false),
            online_delay_ms: AtomicU64::new(0),
            offline_delay_ms: AtomicU64::new(0),
        });
        let signer = SessionSigner::new(b"test-secret").unwrap();
        let store_dyn: Arc<dyn Store> = store.clone();
        let verifier = SessionVerifier::new(store_dyn.clone(), signer.clone(), COOKIE_NAME);
        let dispatcher = Dispatcher::new(store_dyn, verifier);
        Self {
            db,
            store,
            signer,
            dispatcher,
        }
    }

    pub fn verifier(&self) -> &SessionVerifier {
        self.dispatcher.sessions()
    }

    /// Creates a user whose display name is the capitalized username.
    pub fn user(&self, name: &str) -> User {
        let mut display = name.to_string();
        if let Some(first) = display.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        self.db.create_user(name, "hash", &display, None).unwrap()
    }

    /// Issues a session for `user` and returns handshake headers carrying it.
    pub fn login(&self, user: &User) -> HeaderMap {
        let token = Uuid::new_v4().simple().to_string();
        self.db
            .create_session(&token, Some(user.id), Utc::now() + Duration::hours(1))
            .unwrap();
        cookie_headers(&self.signer.sign(&token))
    }

    pub async fn connect(&self, user: &User) -> (Connection, mpsc::UnboundedReceiver<Outbound>) {
        let headers = self.login(user);
        match Connection::open(&self.dispatcher, &headers).await {
            Ok(opened) => opened,
            Err(e) => panic!("connect failed: {e}"),
        }
    }
}

pub fn cookie_headers(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::COOKIE,
        HeaderValue::from_str(&format!("theme=dark; {COOKIE_NAME}={value}")).unwrap(),
    );
    headers
}

/// Drains every queued event, skipping close requests.
pub fn events(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<ServerEvent> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Outbound::Event(event) = msg {
            out.push(event);
        }
    }
    out
}
