//! Runtime - signal handling for long-running bridge listeners

use tokio_util::sync::CancellationToken;

/// Cancel the returned token on SIGINT/SIGTERM (Ctrl+C elsewhere).
///
/// Hand the token to [`BridgeClient::subscribe`](crate::bridge::BridgeClient::subscribe)
/// or a connector call; cancellation is a clean shutdown for both.
pub fn install_signal_handlers() -> CancellationToken {
    let token = CancellationToken::new();
    let handle = token.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(mut sigterm), Ok(mut sigint)) => {
                    tokio::select! {
                        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                        _ = sigint.recv() => tracing::info!("Received SIGINT"),
                    }
                }
                _ => {
                    tracing::warn!("Signal handlers unavailable, falling back to Ctrl+C");
                    if tokio::signal::ctrl_c().await.is_err() {
                        return;
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            tracing::info!("Received Ctrl+C");
        }

        handle.cancel();
    });

    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_starts_live() {
        let token = install_signal_handlers();
        assert!(!token.is_cancelled());
        let child = token.child_token();
        token.cancel();
        assert!(child.is_cancelled());
    }
}
