//! Sesiones de chat y su registro.
//!
//! Cada sesión tiene su propia memoria de conversación y como máximo una
//! respuesta en curso. Los errores de una consulta nunca tumban la sesión:
//! se convierten en un único mensaje visible para el usuario.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ChatError;
use crate::llm::TOKEN_CHANNEL_CAPACITY;
use crate::memory::ConversationMemory;
use crate::models::Turn;
use crate::rag::ChatEngine;

pub const WELCOME_MESSAGE: &str = "# 🛍️ Flipkart Customer Chatbot

👋 **Hello!** How can I help you with your shopping today? Ask me about:
* 📦 Order Tracking
* 💸 Refunds & Returns
* 💳 Payments & EMI";

pub const NOT_INITIALIZED_MESSAGE: &str = "⚠️ Chat engine not initialized. Please refresh.";
pub const BUSY_MESSAGE: &str = "⏳ Please wait for the current answer to finish.";
pub const CLOSED_MESSAGE: &str = "This conversation has ended. Please start a new chat.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready,
    Responding,
    Failed(String),
    Closed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Ready => "ready",
            SessionState::Responding => "responding",
            SessionState::Failed(_) => "failed",
            SessionState::Closed => "closed",
        }
    }
}

/// Identificador opaco de una sesión.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionHandle(Uuid);

impl SessionHandle {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub struct ChatSession {
    handle: SessionHandle,
    engine: Arc<ChatEngine>,
    state: Mutex<SessionState>,
    memory: Mutex<ConversationMemory>,
    task: Mutex<Option<JoinHandle<()>>>,
    last_activity: Mutex<Instant>,
}

/// Canal con un único mensaje ya encolado.
fn single_reply(message: impl Into<String>) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(1);
    let _ = tx.try_send(message.into());
    rx
}

impl ChatSession {
    /// Crea la sesión y verifica el vector store. Si falla, la sesión queda
    /// en `Failed` y responde siempre con el mensaje de inicialización.
    pub async fn start(engine: Arc<ChatEngine>, memory_token_limit: usize) -> Arc<Self> {
        let session = Arc::new(Self {
            handle: SessionHandle::new(Uuid::new_v4()),
            engine,
            state: Mutex::new(SessionState::Uninitialized),
            memory: Mutex::new(ConversationMemory::new(memory_token_limit)),
            task: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
        });

        let next = match session.engine.store().ensure_collection().await {
            Ok(()) => {
                info!("Sesión {} lista.", session.handle);
                SessionState::Ready
            }
            Err(err) => {
                error!("Sesión {}: error conectando al vector store: {}", session.handle, err);
                SessionState::Failed(ChatError::Retrieval(err).user_message())
            }
        };
        session.set_state(next);
        session
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn state(&self) -> SessionState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .turns()
    }

    /// Tiempo transcurrido desde el último mensaje o respuesta.
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Lanza la respuesta a `text` y devuelve de inmediato el receptor de
    /// tokens. El receptor se cierra al terminar la respuesta.
    pub fn on_user_message(self: &Arc<Self>, text: &str) -> mpsc::Receiver<String> {
        self.touch();
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match &*state {
                SessionState::Ready => *state = SessionState::Responding,
                SessionState::Responding => return single_reply(BUSY_MESSAGE),
                SessionState::Closed => return single_reply(CLOSED_MESSAGE),
                SessionState::Uninitialized | SessionState::Failed(_) => {
                    return single_reply(NOT_INITIALIZED_MESSAGE)
                }
            }
        }

        let history = {
            let mut memory = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
            let history = memory.turns();
            if !text.trim().is_empty() {
                memory.push(Turn::user(text.trim()));
            }
            history
        };

        let (tx, rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);
        let session = Arc::clone(self);
        let text = text.to_string();
        let task = tokio::spawn(async move { session.run_turn(history, text, tx).await });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        rx
    }

    async fn run_turn(&self, history: Vec<Turn>, text: String, tx: mpsc::Sender<String>) {
        match self.engine.respond(&history, &text, &tx).await {
            Ok(answer) => {
                if self.state() != SessionState::Closed {
                    self.memory
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(Turn::assistant(answer));
                }
            }
            Err(ChatError::Cancelled) => {
                info!("Sesión {}: respuesta cancelada por el cliente.", self.handle);
            }
            Err(err) => {
                warn!("Sesión {}: la respuesta falló: {}", self.handle, err);
                let _ = tx.send(err.user_message()).await;
            }
        }

        self.touch();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == SessionState::Responding {
            *state = SessionState::Ready;
        }
    }

    /// Cierra la sesión: aborta la respuesta en curso y libera la memoria.
    pub fn close(&self) {
        self.set_state(SessionState::Closed);
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!("Sesión {} cerrada.", self.handle);
    }
}

/// Registro de sesiones vivas, propiedad de la capa HTTP.
pub struct SessionRegistry {
    engine: Arc<ChatEngine>,
    memory_token_limit: usize,
    sessions: Mutex<HashMap<SessionHandle, Arc<ChatSession>>>,
}

impl SessionRegistry {
    pub fn new(engine: Arc<ChatEngine>, memory_token_limit: usize) -> Self {
        Self {
            engine,
            memory_token_limit,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<ChatEngine> {
        &self.engine
    }

    pub async fn create(&self) -> Arc<ChatSession> {
        let session = ChatSession::start(Arc::clone(&self.engine), self.memory_token_limit).await;
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.handle(), Arc::clone(&session));
        session
    }

    pub fn get(&self, handle: SessionHandle) -> Option<Arc<ChatSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
    }

    pub fn remove(&self, handle: SessionHandle) -> Option<Arc<ChatSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn on_session_start(&self) -> SessionHandle {
        self.create().await.handle()
    }

    /// `None` si la sesión no existe.
    pub fn on_user_message(
        &self,
        handle: SessionHandle,
        text: &str,
    ) -> Option<mpsc::Receiver<String>> {
        self.get(handle).map(|session| session.on_user_message(text))
    }

    /// Cierra las sesiones sin actividad durante al menos `ttl` (clientes que
    /// se fueron sin cerrar la sesión). Las que están respondiendo se
    /// respetan. Devuelve cuántas se cerraron.
    pub fn reap_idle(&self, ttl: Duration) -> usize {
        let idle: Vec<SessionHandle> = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.state() != SessionState::Responding && s.idle_for() >= ttl)
            .map(|s| s.handle())
            .collect();

        let reaped = idle
            .into_iter()
            .filter(|handle| self.on_session_end(*handle))
            .count();
        if reaped > 0 {
            info!("{} sesiones inactivas cerradas.", reaped);
        }
        reaped
    }

    /// Devuelve `false` si la sesión no existía.
    pub fn on_session_end(&self, handle: SessionHandle) -> bool {
        match self.remove(handle) {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }
}
