use coalesce_rs::{BoxError, Manager, Ttl};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const FETCH_DELAY_MS: u64 = 200;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coalesce_rs=debug".into()),
        )
        .init();

    // Pretend each lookup is an expensive remote call. With Ttl::Forever the
    // manager turns into a lazily populated, process-lifetime cache.
    let manager = Arc::new(Manager::new(
        |_token, zip_code: String| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(FETCH_DELAY_MS)).await;
                Ok::<_, BoxError>(format!("place info for {}", zip_code))
            })
        },
        Ttl::Forever,
    ));

    let token = CancellationToken::new();

    println!("Loading value for AT-1010...");
    let info = manager.get_result(&token, "AT-1010".to_string()).await?;
    println!("Got: {}", info);

    println!("Loading AT-1010 again (served from cache, no delay)...");
    let info = manager.get_result(&token, "AT-1010".to_string()).await?;
    println!("Got: {}", info);

    println!("Issuing 8 concurrent lookups for DE-01067 (one fetch total)...");
    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            let token = CancellationToken::new();
            manager.get_result(&token, "DE-01067".to_string()).await
        }));
    }
    for handle in handles {
        println!("Got: {}", handle.await??);
    }

    println!("Cached entries: {}", manager.size().await);

    manager.delete_all().await;
    println!("Cached entries after clear: {}", manager.size().await);

    Ok(())
}
