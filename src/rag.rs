//! Motor de chat RAG en modo "contexto".
//!
//! Flujo por mensaje:
//!   1. Recuperar los `top_k` chunks más similares a la pregunta.
//!   2. Construir el prompt: instrucción de sistema + contexto recuperado +
//!      historial acotado + nuevo turno del usuario.
//!   3. Abrir el stream del modelo con un plazo máximo; si falla antes de
//!      producir ningún token se reintenta una sola vez.
//!   4. Reenviar cada token al consumidor según llega.
//!
//! Si el consumidor cierra su canal (cliente desconectado o sesión cerrada)
//! la generación se cancela en el siguiente punto de suspensión.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

use crate::error::ChatError;
use crate::llm::{GenerationModel, GenerationRequest, SYSTEM_PROMPT};
use crate::models::{ScoredRecord, Turn};
use crate::retriever::Retriever;
use crate::vector_store::VectorStore;

/// Reintentos de reconexión del stream (sólo antes del primer token).
const MAX_STREAM_RETRIES: usize = 1;

pub struct ChatEngine {
    retriever: Retriever,
    model: Arc<dyn GenerationModel>,
    system_prompt: String,
    timeout: Duration,
}

impl ChatEngine {
    pub fn new(retriever: Retriever, model: Arc<dyn GenerationModel>, timeout: Duration) -> Self {
        Self {
            retriever,
            model,
            system_prompt: SYSTEM_PROMPT.to_string(),
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        self.retriever.store()
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Genera la respuesta a `user_text` enviando los tokens por `out`.
    /// Devuelve la respuesta completa ya ensamblada.
    pub async fn respond(
        &self,
        history: &[Turn],
        user_text: &str,
        out: &mpsc::Sender<String>,
    ) -> Result<String, ChatError> {
        let context = tokio::select! {
            _ = out.closed() => return Err(ChatError::Cancelled),
            context = self.retriever.retrieve(user_text) => context?,
        };

        let request = GenerationRequest {
            system: build_system_prompt(&self.system_prompt, &context),
            history: history.to_vec(),
            prompt: user_text.trim().to_string(),
        };

        let mut attempt = 0;
        loop {
            let mut answer = String::new();
            match self.stream_once(request.clone(), out, &mut answer).await {
                Ok(()) => return Ok(answer),
                Err(ChatError::Cancelled) => return Err(ChatError::Cancelled),
                Err(err) if answer.is_empty() && attempt < MAX_STREAM_RETRIES => {
                    attempt += 1;
                    warn!("Fallo al abrir el stream del modelo ({err}); reintentando una vez.");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Un intento completo: abrir el stream y consumirlo hasta el final o
    /// hasta agotar el plazo.
    async fn stream_once(
        &self,
        request: GenerationRequest,
        out: &mpsc::Sender<String>,
        answer: &mut String,
    ) -> Result<(), ChatError> {
        let deadline = Instant::now() + self.timeout;

        let mut upstream = tokio::select! {
            _ = out.closed() => return Err(ChatError::Cancelled),
            opened = timeout_at(deadline, self.model.stream_chat(request)) => match opened {
                Ok(stream) => stream?,
                Err(_) => return Err(ChatError::Timeout(self.timeout)),
            },
        };

        loop {
            let next = tokio::select! {
                _ = out.closed() => return Err(ChatError::Cancelled),
                next = timeout_at(deadline, upstream.recv()) => next,
            };
            match next {
                Err(_) => return Err(ChatError::Timeout(self.timeout)),
                Ok(None) => break,
                Ok(Some(Err(err))) => return Err(err),
                Ok(Some(Ok(token))) => {
                    answer.push_str(&token);
                    if out.send(token).await.is_err() {
                        return Err(ChatError::Cancelled);
                    }
                }
            }
        }

        info!(
            "Respuesta generada con {} ({} caracteres)",
            self.model.model_id(),
            answer.chars().count()
        );
        Ok(())
    }
}

/// Instrucción de sistema con el contexto recuperado incrustado.
pub fn build_system_prompt(system_prompt: &str, context: &[ScoredRecord]) -> String {
    if context.is_empty() {
        return format!(
            "{system_prompt}\n\nNo relevant help-centre information was found for this question. \
             Say so if you cannot answer it."
        );
    }
    let chunks: Vec<&str> = context.iter().map(|hit| hit.record.text.as_str()).collect();
    format!(
        "{system_prompt}\n\nContext information is below.\n--------------------\n{}\n--------------------\n",
        chunks.join("\n\n---\n\n")
    )
}
