//! framepipe demo: test pattern -> grayscale worker -> consumer

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::Result;
use ndarray::Array3;
use tracing::{debug, error, info, warn};

use framepipe::capture::{FrameSource, TestPatternSource};
use framepipe::pipeline::FnWorker;
use framepipe::{ArrayView, Config, Processor, WorkResult};

#[derive(Parser, Debug)]
#[command(name = "framepipe", version, about = "Threaded frame processing demo")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "FRAMEPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Frames to produce before end-of-stream
    #[arg(long)]
    frames: Option<u64>,

    /// Simulated worker cost per frame
    #[arg(long, default_value_t = 50)]
    latency_ms: u64,

    /// Queue every frame instead of skipping while busy
    #[arg(long)]
    queue_all: bool,

    /// Write the last processed frame as PNG
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

/// BT.601 luma, packed to one channel
fn grayscale(array: ArrayView) -> ArrayView {
    if array.channels() < 3 {
        return array;
    }
    array.map_pixels(|pixels| {
        let (height, width, _) = pixels.dim();
        Array3::from_shape_fn((height, width, 1), |(y, x, _)| {
            let r = pixels[[y, x, 0]] as u32;
            let g = pixels[[y, x, 1]] as u32;
            let b = pixels[[y, x, 2]] as u32;
            ((r * 77 + g * 150 + b * 29) >> 8) as u8
        })
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("framepipe=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();
    info!("framepipe launching...");

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(frames) = cli.frames {
        config.source.frame_count = Some(frames);
    }
    if cli.queue_all {
        config.processor.skip_if_running = false;
    }
    debug!(?config, "Configuration loaded");

    let latency = Duration::from_millis(cli.latency_ms);
    let worker = FnWorker::new("grayscale", move |array: ArrayView| {
        std::thread::sleep(latency);
        Ok(grayscale(array))
    });

    let processor = Arc::new(Processor::with_config("preview", worker, &config.processor));
    let results = processor.subscribe_results();
    let errors = processor.subscribe_errors();
    processor.start()?;

    let mut source = TestPatternSource::new(config.source.clone())?;

    // Producer: one frame per tick, never waits for the worker
    let producer = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(source.frame_interval());
            loop {
                ticker.tick().await;
                match source.next_frame() {
                    Ok(Some(frame)) => {
                        if let Err(e) = processor.submit_frame(frame) {
                            error!("Failed to submit frame: {}", e);
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("Source error: {:#}", e);
                        break;
                    }
                }
            }
        })
    };

    let mut last: Option<WorkResult> = None;
    let mut delivered = 0u64;
    loop {
        tokio::select! {
            result = results.recv_async() => match result {
                Some(result) if result.array.is_empty() => {
                    info!("End of stream after frame {}", result.sequence());
                    break;
                }
                Some(result) => {
                    delivered += 1;
                    debug!(
                        sequence = result.sequence(),
                        latency_ms = result.latency().as_millis() as u64,
                        "Frame processed"
                    );
                    last = Some(result);
                }
                None => break,
            },
            Some(err) = errors.recv_async() => {
                warn!("{}", err);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    producer.abort();
    let _ = producer.await;
    processor.stop()?;

    let stats = processor.stats();
    info!(
        "Done: {} submitted, {} delivered ({} seen), {} skipped, {} failed, avg {} us/frame",
        stats.submitted,
        stats.delivered,
        delivered,
        stats.skipped,
        stats.failed,
        stats.avg_process_us
    );

    if let (Some(path), Some(result)) = (cli.snapshot, last) {
        result.array.to_image()?.save(&path)?;
        info!("Snapshot of frame {} written to {}", result.sequence(), path.display());
    }

    Ok(())
}
