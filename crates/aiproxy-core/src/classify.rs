/// Message fragments that mark an error as permanently failed. The list
/// documents upstream quirks: several providers report auth and validation
/// failures only in prose, so retry decisions check the text as well as the
/// error variant.
const NON_RETRYABLE_TOKENS: &[&str] = &[
    "context canceled",
    "context deadline exceeded",
    "authentication",
    "authorization",
    "forbidden",
    "not found",
    "bad request",
];

pub fn is_non_retryable_message(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    NON_RETRYABLE_TOKENS
        .iter()
        .any(|token| lowered.contains(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_tokens_are_non_retryable() {
        for message in [
            "request failed: context canceled",
            "Post: context deadline exceeded",
            "upstream authentication required",
            "Authorization header rejected",
            "403 Forbidden",
            "model not found",
            "400 Bad Request",
        ] {
            assert!(is_non_retryable_message(message), "{message}");
        }
    }

    #[test]
    fn transient_transport_errors_stay_retryable() {
        for message in [
            "connection reset by peer",
            "tls handshake eof",
            "502 Bad Gateway",
        ] {
            assert!(!is_non_retryable_message(message), "{message}");
        }
    }
}
