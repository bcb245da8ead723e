//! Abstracción sobre Rig para el modelo de generación (Groq).
//!
//! La respuesta se entrega como una secuencia perezosa y finita de tokens:
//! una tarea productora empuja cada token a un canal y el consumidor los
//! recibe según llegan. Si el consumidor cierra el canal, la tarea
//! productora se detiene en el siguiente token y se abandona la petición.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use rig::client::CompletionClient as _;
use rig::completion::{CompletionModel as _, Message};
use rig::providers::groq;
use rig::streaming::StreamedAssistantContent;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ChatError;
use crate::models::{Role, Turn};

/// Instrucción de sistema del asistente de soporte.
pub const SYSTEM_PROMPT: &str = "You are a helpful Flipkart customer support assistant. \
Use the provided context to answer the question in detail. \
Keep your answer **under 200 words**. \
If relevant, provide step-by-step guidance or examples. \
Do not just give one sentence unless the question is very simple.";

/// Capacidad del canal de tokens entre productor y consumidor.
pub const TOKEN_CHANNEL_CAPACITY: usize = 32;

/// Secuencia de tokens de una respuesta; `None` marca el fin del stream.
pub type TokenStream = mpsc::Receiver<Result<String, ChatError>>;

/// Petición completa al modelo: instrucción de sistema (con el contexto ya
/// incluido), historial y el nuevo turno del usuario.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub history: Vec<Turn>,
    pub prompt: String,
}

#[async_trait]
pub trait GenerationModel: Send + Sync {
    fn model_id(&self) -> &str;

    /// Abre el stream de la respuesta. Un error aquí significa que no se
    /// pudo establecer la conexión; los errores a mitad de stream llegan
    /// como elementos `Err` del canal.
    async fn stream_chat(&self, request: GenerationRequest) -> Result<TokenStream, ChatError>;
}

/// Modelo de chat de Groq a través de Rig.
#[derive(Clone)]
pub struct GroqModel {
    client: groq::Client,
    model: String,
}

impl GroqModel {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: groq::Client::new(api_key),
            model: model.to_string(),
        }
    }

    /// Igual que `new`, contra un endpoint compatible con la API de Groq.
    pub fn with_base_url(api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            client: groq::Client::builder(api_key).base_url(base_url).build(),
            model: model.to_string(),
        }
    }
}

/// Reenvía los fragmentos de texto al canal. `None` (contenido que no es
/// texto) y los fragmentos vacíos se saltan; un error se entrega una sola vez
/// y corta el stream. Termina en cuanto el consumidor cierra el canal.
async fn forward_tokens<S, E>(stream: S, tx: mpsc::Sender<Result<String, ChatError>>)
where
    S: Stream<Item = Result<Option<String>, E>>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    while let Some(item) = stream.next().await {
        let token = match item {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => continue,
            Err(err) => {
                let _ = tx.send(Err(ChatError::generation(err))).await;
                return;
            }
        };
        if tx.send(Ok(token)).await.is_err() {
            debug!("Consumidor cerrado; se abandona el stream de Groq.");
            return;
        }
    }
}

fn to_message(turn: &Turn) -> Option<Message> {
    match turn.role {
        Role::User => Some(Message::user(turn.content.clone())),
        Role::Assistant => Some(Message::assistant(turn.content.clone())),
        // La instrucción de sistema viaja como preámbulo.
        Role::System => None,
    }
}

#[async_trait]
impl GenerationModel for GroqModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, request: GenerationRequest) -> Result<TokenStream, ChatError> {
        let model = self.client.completion_model(&self.model);
        let history: Vec<Message> = request.history.iter().filter_map(to_message).collect();

        let completion = model
            .completion_request(Message::user(request.prompt))
            .preamble(request.system)
            .messages(history)
            .build();

        let stream = model.stream(completion).await.map_err(ChatError::generation)?;
        let tokens = stream.map(|item| {
            item.map(|content| match content {
                StreamedAssistantContent::Text(text) => Some(text.text),
                _ => None,
            })
        });

        let (tx, rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);
        tokio::spawn(forward_tokens(tokens, tx));

        Ok(rx)
    }
}
