use camtrap_lookahead::*;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pretends to look at an image. Every seventh image hits a short
/// concurrency limit on its first attempt.
#[derive(Clone, Default)]
struct FakeAnalyzer {
    limited: std::sync::Arc<std::sync::Mutex<Vec<PathBuf>>>,
}

impl ImageAnalyzer for FakeAnalyzer {
    type Output = String;

    async fn analyze(&self, image: &Path) -> Result<String, ErrorSignal> {
        tokio::time::sleep(Duration::from_millis(300)).await;

        let name = image.display().to_string();
        if name.ends_with("7.jpg") {
            let mut limited = self.limited.lock().unwrap();
            if !limited.iter().any(|p| p == image) {
                limited.push(image.to_path_buf());
                return Err(ErrorSignal::http(
                    429,
                    "Rate limit of 2 per 0s exceeded for UserConcurrentRequests",
                ));
            }
        }
        Ok(format!("Gams (1) in {}", name))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let buffer = AnalysisBuffer::new(BufferConfig::default(), FakeAnalyzer::default()).unwrap();
    let mut events = buffer.subscribe();

    let images: Vec<PathBuf> = (0..12).map(|i| PathBuf::from(format!("IMG_{:04}.jpg", i))).collect();
    let session = buffer.start_session(images).unwrap();
    println!("Session {} started", session);

    // The viewer opens the first image; the buffer analyzes ahead of it.
    buffer.ensure_window(0);

    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event.index() {
                Some(index) => println!("  {:<22} #{}", event.name(), index),
                None => println!("  {}", event.name()),
            }
        }
    });

    // Step through the images the way a reviewer would.
    for active in 0..12 {
        loop {
            match buffer.analyze_now(active) {
                Lookup::Done(text) => {
                    println!("[{}] {}", active, text);
                    break;
                }
                Lookup::Failed(failure) => {
                    println!("[{}] {}", active, failure.friendly_message());
                    if !failure.is_rate_limited() {
                        break;
                    }
                }
                Lookup::NotReady => {}
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        buffer.ensure_window(active + 1);
    }

    let status = buffer.status();
    println!();
    println!("Done: {}  Failed: {}  Pending: {}", status.done, status.failed, status.pending);

    buffer.shutdown();
    printer.abort();
}
