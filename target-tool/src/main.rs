mod dump;

use anyhow::{bail, ensure, Result};
use center_target::{
    dataset::{load_classes_file, CocoDataset, ImageCrateDecoder},
    sink::DebugSink,
    EncoderConfig, Split, TargetEncoderInit,
};
use clap::Parser;
use dump::PngDumpSink;
use futures::stream::{self, StreamExt as _};
use log::{info, warn};
use prettytable::{cell, row, Table};
use std::{env, path::PathBuf, sync::Arc, time::Instant};

#[derive(Debug, Clone, Parser)]
/// Training target encoder tools
enum Opts {
    /// Encode the samples of a COCO dataset
    Encode {
        /// encoder configuration file
        #[clap(long)]
        config: PathBuf,
        /// COCO instance annotation file
        #[clap(long)]
        annotations: PathBuf,
        /// image directory
        #[clap(long)]
        images: PathBuf,
        /// class name file, one name per line
        #[clap(long)]
        classes: PathBuf,
        /// dataset split, one of train, val and test
        #[clap(long, default_value = "train", parse(try_from_str = parse_split))]
        split: Split,
        /// encode at most this many samples
        #[clap(long)]
        limit: Option<usize>,
        /// write debug images to this directory
        #[clap(long)]
        dump_dir: Option<PathBuf>,
        /// dump every n-th sample
        #[clap(long, default_value = "30")]
        dump_interval: usize,
    },
    /// Count the objects per class
    Stats {
        /// COCO instance annotation file
        #[clap(long)]
        annotations: PathBuf,
        /// class name file, one name per line
        #[clap(long)]
        classes: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filters = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    pretty_env_logger::formatted_builder()
        .parse_filters(&filters)
        .init();

    match Opts::parse() {
        Opts::Encode {
            config,
            annotations,
            images,
            classes,
            split,
            limit,
            dump_dir,
            dump_interval,
        } => {
            encode(
                config,
                annotations,
                images,
                classes,
                split,
                limit,
                dump_dir,
                dump_interval,
            )
            .await?;
        }
        Opts::Stats {
            annotations,
            classes,
        } => {
            stats(annotations, classes).await?;
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn encode(
    config_file: PathBuf,
    annotation_file: PathBuf,
    image_dir: PathBuf,
    classes_file: PathBuf,
    split: Split,
    limit: Option<usize>,
    dump_dir: Option<PathBuf>,
    dump_interval: usize,
) -> Result<()> {
    let config = EncoderConfig::open(&config_file)?;
    let classes = load_classes_file(&classes_file).await?;
    ensure!(
        classes.len() == config.num_classes.get(),
        "the config expects {} classes, but '{}' lists {}",
        config.num_classes,
        classes_file.display(),
        classes.len()
    );

    let dataset = Arc::new(CocoDataset::load(&annotation_file, &image_dir, classes).await?);
    let num_samples = dataset.num_samples();
    let num_encode = limit.map_or(num_samples, |limit| limit.min(num_samples));

    let encoder = {
        let encoder = TargetEncoderInit {
            config,
            split,
            num_samples,
        }
        .build()?;
        let encoder = match dump_dir {
            Some(dir) => {
                let sink: Arc<dyn DebugSink> = Arc::new(PngDumpSink::new(dir, dump_interval)?);
                encoder.with_sink(sink)
            }
            None => encoder,
        };
        Arc::new(encoder)
    };

    info!("encoding {} of {} samples", num_encode, num_samples);
    let since = Instant::now();

    let (num_ok, num_failed, num_objects) = stream::iter(0..num_encode)
        .map(|index| {
            let dataset = dataset.clone();
            let encoder = encoder.clone();

            async move {
                let result = tokio::task::spawn_blocking(move || {
                    encoder.encode_index(&*dataset, &ImageCrateDecoder, index)
                })
                .await?;
                Ok::<_, anyhow::Error>((index, result))
            }
        })
        .buffer_unordered(num_cpus::get())
        .fold(
            Ok((0, 0, 0)),
            |summary: Result<(usize, usize, usize)>, result| async move {
                let (num_ok, num_failed, num_objects) = summary?;
                let (index, result) = result?;

                let summary = match result {
                    Ok(bundle) => {
                        info!(
                            "sample {} has {} objects, input shape {:?}",
                            index,
                            bundle.num_objects,
                            bundle.input.shape()
                        );
                        (num_ok + 1, num_failed, num_objects + bundle.num_objects)
                    }
                    Err(err) => {
                        warn!("sample {} failed: {:#}", index, err);
                        (num_ok, num_failed + 1, num_objects)
                    }
                };
                Ok::<_, anyhow::Error>(summary)
            },
        )
        .await?;

    let mut table = Table::new();
    table.add_row(row!["encoded", "failed", "objects", "elapsed"]);
    table.add_row(row![
        num_ok,
        num_failed,
        num_objects,
        format!("{:.2?}", since.elapsed())
    ]);
    table.printstd();

    if num_ok == 0 && num_encode > 0 {
        bail!("no sample was encoded");
    }

    Ok(())
}

async fn stats(annotation_file: PathBuf, classes_file: PathBuf) -> Result<()> {
    let classes = load_classes_file(&classes_file).await?;
    let dataset = CocoDataset::load(&annotation_file, ".", classes).await?;
    let histogram = dataset.class_histogram();

    let mut table = Table::new();
    table.add_row(row!["class", "objects"]);
    histogram.iter().for_each(|(name, count)| {
        table.add_row(row![name, count]);
    });
    let total: usize = histogram.values().sum();
    table.add_row(row!["(total)", total]);
    table.printstd();

    info!("{} images", dataset.num_samples());
    Ok(())
}

fn parse_split(text: &str) -> Result<Split> {
    let split = match text {
        "train" => Split::Train,
        "val" => Split::Val,
        "test" => Split::Test,
        _ => bail!("invalid split '{}', expect train, val or test", text),
    };
    Ok(split)
}
