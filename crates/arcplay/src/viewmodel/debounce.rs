use std::time::Duration;
use tokio::sync::mpsc;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Forward a query only once no newer one arrived for `delay`.  Repeats of
/// the last forwarded query are dropped.  The output closes with the input.
pub fn debounce(mut input: mpsc::Receiver<String>, delay: Duration) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);

    tokio::spawn(async move {
        let mut last_sent: Option<String> = None;

        while let Some(first) = input.recv().await {
            let mut latest = first;
            let closed = loop {
                tokio::select! {
                    next = input.recv() => match next {
                        Some(query) => latest = query,
                        None => break true,
                    },
                    _ = tokio::time::sleep(delay) => break false,
                }
            };

            if last_sent.as_deref() != Some(latest.as_str()) {
                if tx.send(latest.clone()).await.is_err() {
                    return;
                }
                last_sent = Some(latest);
            }
            if closed {
                return;
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_only_settled_queries_pass() {
        let (tx, rx) = mpsc::channel(16);
        let mut settled = debounce(rx, DEFAULT_DEBOUNCE);

        for q in ["g", "gr", "gra"] {
            tx.send(q.to_string()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(settled.recv().await.as_deref(), Some("gra"));

        tx.send("grat".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        tx.send("grateful".to_string()).await.unwrap();
        assert_eq!(settled.recv().await.as_deref(), Some("grat"));
        assert_eq!(settled.recv().await.as_deref(), Some("grateful"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_query_is_dropped_and_close_flushes() {
        let (tx, rx) = mpsc::channel(16);
        let mut settled = debounce(rx, DEFAULT_DEBOUNCE);

        tx.send("dead".to_string()).await.unwrap();
        assert_eq!(settled.recv().await.as_deref(), Some("dead"));

        tx.send("dead".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send("phish".to_string()).await.unwrap();
        drop(tx);

        assert_eq!(settled.recv().await.as_deref(), Some("phish"));
        assert_eq!(settled.recv().await, None);
    }
}
