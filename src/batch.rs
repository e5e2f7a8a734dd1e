use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::mpsc;

use crate::provider::namecheap::{split_domain, Credentials, NamecheapClient};
use crate::provider::DomainResult;

const SUCCESS_MESSAGE: &str = "Nameservers updated successfully";

/// A validated update request.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub credentials: Credentials,
    pub domains: Vec<String>,
    pub nameservers: Vec<String>,
}

/// Runs the domains of `job` one after another, sending each result to `tx`
/// as soon as it is known.
///
/// Sleeps `delay` after every emitted result, the last one included. Stops
/// early once the receiving side is gone, i.e. the client hung up.
/// Returns how many results were delivered.
pub async fn run(
    client: NamecheapClient,
    job: BatchJob,
    delay: Duration,
    tx: mpsc::Sender<DomainResult>,
) -> usize {
    let mut emitted = 0usize;

    for domain in &job.domains {
        if domain.is_empty() {
            continue;
        }

        info!("Processing domain: {}", domain);
        let result = update_domain(&client, &job, domain).await;

        if tx.send(result).await.is_err() {
            warn!("Client disconnected, skipping remaining domains after {}", domain);
            return emitted;
        }
        emitted += 1;

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = tx.closed() => {
                warn!("Client disconnected, skipping remaining domains after {}", domain);
                return emitted;
            }
        }
    }

    info!("Finished batch, {} result(s) sent", emitted);
    emitted
}

async fn update_domain(client: &NamecheapClient, job: &BatchJob, domain: &str) -> DomainResult {
    let Some((sld, tld)) = split_domain(domain) else {
        let message = format!("Invalid domain format: {}", domain);
        info!("Error for {}: {}", domain, message);
        return DomainResult::error(domain, message);
    };

    info!("Calling Namecheap for {}...", domain);
    match client
        .set_custom_nameservers(&job.credentials, sld, tld, &job.nameservers)
        .await
    {
        Ok(reply) if reply.is_ok() => {
            info!("Success for {}", domain);
            DomainResult::success(domain, SUCCESS_MESSAGE)
        }
        Ok(reply) => {
            let message = reply.error_message();
            info!("Error for {}: {}", domain, message);
            DomainResult::error(domain, message)
        }
        Err(e) => {
            error!("Exception for {}: {:#}", domain, e);
            let message = format!("{:#}", e);
            if message.is_empty() {
                DomainResult::error(domain, "Request failed")
            } else {
                DomainResult::error(domain, message)
            }
        }
    }
}
