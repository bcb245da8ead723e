//! Memoria de conversación acotada por un presupuesto de tokens.
//!
//! Los turnos más antiguos se descartan primero. Si un único turno no cabe
//! ni siquiera con la memoria vacía, se trunca en vez de fallar.

use std::collections::VecDeque;

use tracing::warn;

use crate::models::Turn;

/// Estimación aproximada: ~4 bytes por token en inglés.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

#[derive(Debug, Clone)]
pub struct ConversationMemory {
    token_limit: usize,
    turns: VecDeque<Turn>,
    total_tokens: usize,
}

impl ConversationMemory {
    pub fn new(token_limit: usize) -> Self {
        Self {
            token_limit,
            turns: VecDeque::new(),
            total_tokens: 0,
        }
    }

    pub fn token_limit(&self) -> usize {
        self.token_limit
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Turnos en orden cronológico.
    pub fn turns(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    pub fn push(&mut self, mut turn: Turn) {
        let max_bytes = self.token_limit.saturating_mul(4);
        if turn.content.len() > max_bytes {
            warn!(
                "Turno de {} tokens estimados excede el presupuesto de {}; se trunca.",
                estimate_tokens(&turn.content),
                self.token_limit
            );
            let mut cut = max_bytes;
            while !turn.content.is_char_boundary(cut) {
                cut -= 1;
            }
            turn.content.truncate(cut);
        }

        self.total_tokens += estimate_tokens(&turn.content);
        self.turns.push_back(turn);

        while self.total_tokens > self.token_limit {
            match self.turns.pop_front() {
                Some(evicted) => self.total_tokens -= estimate_tokens(&evicted.content),
                None => break,
            }
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.total_tokens = 0;
    }
}
