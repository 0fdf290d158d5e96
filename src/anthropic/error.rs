//! Erros do cliente da API Anthropic.
//!
//! O motor de decisão nunca propaga estes erros para os ciclos: qualquer
//! falha aqui vira a decisão padrão.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnthropicError {
    /// HTTP 429. `retry_after_ms` vem do cabeçalho `retry-after` (1s se ausente).
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Qualquer outra resposta 4xx/5xx, com o corpo devolvido pela API.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Falha de rede, timeout do cliente ou corpo JSON inválido.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}
