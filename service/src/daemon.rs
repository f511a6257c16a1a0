//! Newline-delimited JSON front end.
//!
//! One request per input line, one response per output line, in request
//! order. Requests run concurrently as spawned tasks; the service's in-flight
//! bound decides how many reach the engine at once.

use std::future::Future;
use std::sync::Arc;

use futures::stream::{FuturesOrdered, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::info;

use cafeledger_ledger::LedgerStore;

use crate::request::{LedgerRequest, LedgerResponse, RequestError};
use crate::service::LedgerService;

/// Serve requests from `input` until it closes or `shutdown` resolves.
///
/// Stops the service before returning, writes the response of every request
/// that was already read, and logs the final metrics.
pub async fn serve_lines<S, R, W>(
    service: Arc<LedgerService<S>>,
    input: R,
    mut output: W,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()>
where
    S: LedgerStore + 'static,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // Unread input stays in the pipe once this many responses are pending.
    let max_pending = service.max_in_flight().max(1) * 2;

    let mut lines = input.lines();
    let mut pending = FuturesOrdered::new();
    let mut input_open = true;
    tokio::pin!(shutdown);

    loop {
        if !input_open && pending.is_empty() {
            break;
        }

        tokio::select! {
            line = lines.next_line(), if input_open && pending.len() < max_pending => {
                match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        let service = service.clone();
                        pending.push_back(tokio::spawn(async move { respond(&service, &line).await }));
                    }
                    None => input_open = false,
                }
            }
            Some(response) = pending.next() => {
                write_response(&mut output, &response?).await?;
            }
            _ = &mut shutdown => {
                info!(pending = pending.len(), "Shutdown signal received");
                break;
            }
        }
    }

    service.stop().await;

    while let Some(response) = pending.next().await {
        write_response(&mut output, &response?).await?;
    }

    let snapshot = service.metrics().snapshot();
    info!(
        operations = snapshot.operations_total,
        completed = snapshot.operations_completed,
        rejected = snapshot.operations_rejected,
        failed = snapshot.operations_failed,
        "Request stream closed"
    );
    info!("Final metrics\n{}", service.metrics().to_prometheus());
    Ok(())
}

async fn respond<S: LedgerStore>(service: &LedgerService<S>, line: &str) -> LedgerResponse {
    match serde_json::from_str::<LedgerRequest>(line) {
        Ok(request) => service.handle(request).await,
        Err(err) => LedgerResponse::malformed(&RequestError::Malformed(err.to_string())),
    }
}

async fn write_response<W: AsyncWrite + Unpin>(
    output: &mut W,
    response: &LedgerResponse,
) -> anyhow::Result<()> {
    let mut encoded = serde_json::to_vec(response)?;
    encoded.push(b'\n');
    output.write_all(&encoded).await?;
    output.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use cafeledger_common::AccountId;
    use cafeledger_ledger::{AtomicUnit, LedgerEngine, MemoryLedgerStore};
    use tokio::io::BufReader;

    use crate::config::ServiceConfig;

    async fn create_test_service(accounts: &[i64]) -> Arc<LedgerService<MemoryLedgerStore>> {
        let engine = LedgerEngine::new(Arc::new(MemoryLedgerStore::new()));
        let service = LedgerService::new(ServiceConfig::default(), engine);
        for &id in accounts {
            service.open_account(AccountId::new(id)).await.unwrap();
        }
        service.start();
        Arc::new(service)
    }

    fn responses(output: &[u8]) -> Vec<serde_json::Value> {
        output
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).unwrap())
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocked_request_does_not_hold_up_others() {
        let service = create_test_service(&[1, 2]).await;

        // Hold account 1 so the first request waits on its row.
        let mut blocker = service.engine().store().begin().await.unwrap();
        blocker.balance_for_update(AccountId::new(1)).await.unwrap();

        let (mut client, server) = tokio::io::duplex(1024);
        let daemon = {
            let service = service.clone();
            tokio::spawn(async move {
                let mut output = Vec::new();
                serve_lines(service, BufReader::new(server), &mut output, std::future::pending())
                    .await
                    .unwrap();
                output
            })
        };

        client
            .write_all(
                b"{\"kind\":\"deposit\",\"account_id\":1,\"amount\":5}\n\
                  {\"kind\":\"deposit\",\"account_id\":2,\"amount\":7}\n\
                  not json\n",
            )
            .await
            .unwrap();

        // The second deposit commits while the first is still waiting.
        tokio::time::timeout(Duration::from_secs(2), async {
            while service.engine().balance(AccountId::new(2)).await.unwrap() != 7 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        blocker.rollback().await.unwrap();
        drop(client);

        let output = daemon.await.unwrap();
        let responses = responses(&output);
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["transaction"]["receiver_id"], 1);
        assert_eq!(responses[1]["transaction"]["receiver_id"], 2);
        assert_eq!(responses[2]["code"], "MALFORMED_REQUEST");
        assert_eq!(service.engine().balance(AccountId::new(1)).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_shutdown_while_input_stays_open() {
        let service = create_test_service(&[1]).await;

        let (mut client, server) = tokio::io::duplex(1024);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let daemon = {
            let service = service.clone();
            tokio::spawn(async move {
                let mut output = Vec::new();
                serve_lines(service, BufReader::new(server), &mut output, async {
                    let _ = stop_rx.await;
                })
                .await
                .unwrap();
                output
            })
        };

        client
            .write_all(b"{\"kind\":\"deposit\",\"account_id\":1,\"amount\":3}\n")
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while service.engine().balance(AccountId::new(1)).await.unwrap() != 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        stop_tx.send(()).unwrap();
        let output = tokio::time::timeout(Duration::from_secs(2), daemon)
            .await
            .unwrap()
            .unwrap();

        assert!(service.state().is_terminal());
        let responses = responses(&output);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["status"], "completed");
        assert!(service
            .metrics()
            .to_prometheus()
            .contains("cafeledger_operations_completed 1"));
        drop(client);
    }
}
