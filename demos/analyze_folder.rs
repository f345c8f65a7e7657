use camtrap_lookahead::*;
use std::path::PathBuf;
use std::time::Duration;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let folder = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let Some(config) = GithubModelsConfig::from_env() else {
        eprintln!("Set GITHUB_MODELS_TOKEN or GITHUB_TOKEN first");
        return;
    };

    let images = image_sequence(&folder, SequenceOrder::OldestFirst).unwrap();
    if images.is_empty() {
        println!("No images in {}", folder.display());
        return;
    }
    println!("Found {} images in {}", images.len(), folder.display());

    let buffer = AnalysisBuffer::new(BufferConfig::default(), GithubModelsAnalyzer::new(config)).unwrap();
    buffer.start_session(images.clone()).unwrap();
    buffer.ensure_window(0);

    for (index, image) in images.iter().enumerate() {
        buffer.ensure_window(index);
        loop {
            match buffer.get_result(index) {
                Lookup::Done(observation) => {
                    println!(
                        "{}: {} | {} | {} {}",
                        image.display(),
                        observation.animals,
                        observation.location,
                        observation.date,
                        observation.time
                    );
                    break;
                }
                Lookup::Failed(FailureKind::Fatal { message }) => {
                    println!("{}: failed ({})", image.display(), message);
                    break;
                }
                Lookup::Failed(failure) => {
                    if buffer.status().manual_resume_required {
                        println!("{}", failure.friendly_message());
                        return;
                    }
                }
                Lookup::NotReady => {}
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    buffer.shutdown();
}
